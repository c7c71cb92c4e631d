//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration straight from environment variables.

use crate::config::{self, EffectiveConfig};

/// Print effective config as key-value pairs, or JSON, to stdout.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("SAMPLER_HEAP_INTERNAL_BYTES={}", config::DEFAULT_INTERNAL_BYTES);
    println!("SAMPLER_HEAP_EXTERNAL_BYTES={}", config::DEFAULT_EXTERNAL_BYTES);
    println!("SAMPLER_HEAP_MIN_ALIGN={}", config::DEFAULT_MIN_ALIGN);
    println!("SAMPLER_HEAP_MAX_ALIGN={}", config::DEFAULT_MAX_ALIGN);
    println!("SAMPLER_HEAP_PIVOT={}", config::DEFAULT_PIVOT);
    println!("SAMPLER_HEAP_BLOCK_BYTES={}", config::DEFAULT_BLOCK_BYTES);
    println!("SAMPLER_HEAP_LOAD_BATCH={}", config::DEFAULT_LOAD_BATCH);
    println!("SAMPLER_HEAP_LOOKAHEAD={}", config::DEFAULT_LOOKAHEAD);
    println!("SAMPLER_HEAP_LOG_LEVEL=info");
    println!("SAMPLER_HEAP_LOG_FORMAT=json");
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let env = config::load();
    let cfg = env.effective_config();
    let mut warnings = 0;

    for region in [&env.allocator.internal, &env.allocator.external] {
        if let Err(e) = region.validate() {
            eprintln!("WARNING: {e}");
            warnings += 1;
        }
    }

    // Block plus its tags must fit the external region's free capacity.
    if cfg.block_bytes + 16 > cfg.external_bytes {
        eprintln!(
            "WARNING: SAMPLER_HEAP_BLOCK_BYTES ({}) does not fit SAMPLER_HEAP_EXTERNAL_BYTES ({})",
            cfg.block_bytes, cfg.external_bytes
        );
        warnings += 1;
    }

    if cfg.pivot > cfg.external_bytes {
        eprintln!(
            "WARNING: SAMPLER_HEAP_PIVOT ({}) exceeds the external region; every allocation counts as small",
            cfg.pivot
        );
        warnings += 1;
    }

    if tracing_subscriber::EnvFilter::try_new(&cfg.log_level).is_err() {
        eprintln!("WARNING: SAMPLER_HEAP_LOG_LEVEL ({}) is not a valid filter", cfg.log_level);
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("SAMPLER_HEAP_INTERNAL_BYTES={}", cfg.internal_bytes);
    println!("SAMPLER_HEAP_EXTERNAL_BYTES={}", cfg.external_bytes);
    println!("SAMPLER_HEAP_MIN_ALIGN={}", cfg.min_align);
    println!("SAMPLER_HEAP_MAX_ALIGN={}", cfg.max_align);
    println!("SAMPLER_HEAP_PIVOT={}", cfg.pivot);
    println!("SAMPLER_HEAP_BLOCK_BYTES={}", cfg.block_bytes);
    println!("SAMPLER_HEAP_LOAD_BATCH={}", cfg.load_batch);
    println!("SAMPLER_HEAP_LOOKAHEAD={}", cfg.lookahead);
    println!("SAMPLER_HEAP_LOG_LEVEL={}", cfg.log_level);
    println!("SAMPLER_HEAP_LOG_FORMAT={}", format_name(cfg));
    if let Some(path) = &cfg.log_file {
        println!("SAMPLER_HEAP_LOG_FILE={}", path.display());
    }
}

fn format_name(cfg: &EffectiveConfig) -> &'static str {
    match cfg.log_format {
        crate::telemetry::LogFormat::Json => "json",
        crate::telemetry::LogFormat::Pretty => "pretty",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env_vars, ENV_LOCK};

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let code = run_validate();
        assert_eq!(code, 0, "default config should pass validation");
    }

    #[test]
    fn test_validate_flags_oversized_block() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SAMPLER_HEAP_EXTERNAL_BYTES", "65536");
        std::env::set_var("SAMPLER_HEAP_BLOCK_BYTES", "65536");
        let code = run_validate();
        assert_eq!(code, 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_flags_bad_log_filter() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SAMPLER_HEAP_LOG_LEVEL", "sampler_heap=verbose");
        assert_eq!(run_validate(), 1);
        clear_env_vars();
    }

    #[test]
    fn test_show_json() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(run_show(true), 0);
        assert_eq!(run_show(false), 0);
    }
}

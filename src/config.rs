//! Configuration loading from environment variables.
//!
//! All values come from `SAMPLER_HEAP_*` variables with defaults. Missing or
//! malformed values fall back to the default; values that would produce an
//! unusable region are raised to a floor or replaced by the default.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `SAMPLER_HEAP_INTERNAL_BYTES` | 2097152 | Internal region size (bytes) |
//! | `SAMPLER_HEAP_EXTERNAL_BYTES` | 33554432 | External region size (bytes) |
//! | `SAMPLER_HEAP_MIN_ALIGN` | 16 | Smallest span footprint (power of two) |
//! | `SAMPLER_HEAP_MAX_ALIGN` | 512 | Large span chunk size (power of two) |
//! | `SAMPLER_HEAP_PIVOT` | 8192 | Small/large placement threshold (bytes) |
//! | `SAMPLER_HEAP_BLOCK_BYTES` | 32768 | Cache block size (power of two, >= 512) |
//! | `SAMPLER_HEAP_LOAD_BATCH` | 16 | Loads served per main-loop tick |
//! | `SAMPLER_HEAP_LOOKAHEAD` | 2 | Blocks a reader queues ahead |
//! | `SAMPLER_HEAP_LOG_LEVEL` | info | `tracing` filter directive |
//! | `SAMPLER_HEAP_LOG_FORMAT` | json | `json` or `pretty` |
//! | `SAMPLER_HEAP_LOG_FILE` | (stderr) | Write logs to this file |

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::CacheConfig;
use crate::memory::{AllocatorConfig, RegionConfig, RegionId};
use crate::resource::ReaderConfig;
use crate::storage::SECTOR_BYTES;
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_INTERNAL_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_EXTERNAL_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_MIN_ALIGN: usize = 16;
pub const DEFAULT_MAX_ALIGN: usize = 512;
pub const DEFAULT_PIVOT: usize = 8192;
pub const DEFAULT_BLOCK_BYTES: usize = 32 * 1024;
pub const DEFAULT_LOAD_BATCH: usize = 16;
pub const DEFAULT_LOOKAHEAD: u32 = 2;

const MIN_REGION_BYTES: usize = 64 * 1024;
const MAX_REGION_BYTES: usize = 1 << 30;
const MAX_LOOKAHEAD: u32 = 64;

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub internal_bytes: usize,
    pub external_bytes: usize,
    pub min_align: usize,
    pub max_align: usize,
    pub pivot: usize,
    pub block_bytes: usize,
    pub load_batch: usize,
    pub lookahead: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub allocator: AllocatorConfig,
    pub cache: CacheConfig,
    pub reader: ReaderConfig,
    pub logging: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Power-of-two env var of at least `floor`; anything else is the default.
fn parse_pow2(key: &str, default: usize, floor: usize) -> usize {
    let val = parse_usize(key, default);
    if val.is_power_of_two() && val >= floor {
        val
    } else {
        default
    }
}

fn region_config(name: &'static str, len: usize, template: &RegionConfig) -> RegionConfig {
    RegionConfig {
        name,
        len,
        ..template.clone()
    }
}

/// Load both region configurations from environment.
fn load_allocator_config() -> AllocatorConfig {
    let internal = parse_usize("SAMPLER_HEAP_INTERNAL_BYTES", DEFAULT_INTERNAL_BYTES);
    let external = parse_usize("SAMPLER_HEAP_EXTERNAL_BYTES", DEFAULT_EXTERNAL_BYTES);
    let internal = internal.clamp(MIN_REGION_BYTES, MAX_REGION_BYTES);
    let external = external.clamp(MIN_REGION_BYTES, MAX_REGION_BYTES);

    let min_align = parse_pow2("SAMPLER_HEAP_MIN_ALIGN", DEFAULT_MIN_ALIGN, 16);
    let max_align = parse_pow2("SAMPLER_HEAP_MAX_ALIGN", DEFAULT_MAX_ALIGN, 16).max(min_align);
    let pivot = parse_usize("SAMPLER_HEAP_PIVOT", DEFAULT_PIVOT);

    let template = RegionConfig {
        min_align,
        max_align,
        pivot,
        ..RegionConfig::new("template", 0)
    };
    AllocatorConfig {
        internal: region_config(RegionId::Internal.name(), internal, &template),
        external: region_config(RegionId::External.name(), external, &template),
    }
}

/// Load streaming cache configuration from environment.
fn load_cache_config() -> CacheConfig {
    let block_bytes = parse_pow2("SAMPLER_HEAP_BLOCK_BYTES", DEFAULT_BLOCK_BYTES, SECTOR_BYTES);
    let max_loads_per_service = parse_usize("SAMPLER_HEAP_LOAD_BATCH", DEFAULT_LOAD_BATCH).max(1);
    CacheConfig {
        block_bytes,
        max_loads_per_service,
    }
}

/// Load logging configuration from environment.
fn load_log_config() -> LogConfig {
    let level = std::env::var("SAMPLER_HEAP_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let format = std::env::var("SAMPLER_HEAP_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let output_path = std::env::var_os("SAMPLER_HEAP_LOG_FILE").map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to defaults without panicking.
pub fn load() -> EnvConfig {
    let lookahead = parse_u32("SAMPLER_HEAP_LOOKAHEAD", DEFAULT_LOOKAHEAD).min(MAX_LOOKAHEAD);
    EnvConfig {
        allocator: load_allocator_config(),
        cache: load_cache_config(),
        reader: ReaderConfig { lookahead },
        logging: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let external = &self.allocator.external;
        EffectiveConfig {
            internal_bytes: self.allocator.internal.len,
            external_bytes: external.len,
            min_align: external.min_align,
            max_align: external.max_align,
            pivot: external.pivot,
            block_bytes: self.cache.block_bytes,
            load_batch: self.cache.max_loads_per_service,
            lookahead: self.reader.lookahead,
            log_level: self.logging.level.clone(),
            log_format: self.logging.format,
            log_file: self.logging.output_path.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) const ENV_KEYS: &[&str] = &[
        "SAMPLER_HEAP_INTERNAL_BYTES",
        "SAMPLER_HEAP_EXTERNAL_BYTES",
        "SAMPLER_HEAP_MIN_ALIGN",
        "SAMPLER_HEAP_MAX_ALIGN",
        "SAMPLER_HEAP_PIVOT",
        "SAMPLER_HEAP_BLOCK_BYTES",
        "SAMPLER_HEAP_LOAD_BATCH",
        "SAMPLER_HEAP_LOOKAHEAD",
        "SAMPLER_HEAP_LOG_LEVEL",
        "SAMPLER_HEAP_LOG_FORMAT",
        "SAMPLER_HEAP_LOG_FILE",
    ];

    pub(crate) fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.allocator.internal.len, 2 * 1024 * 1024);
        assert_eq!(cfg.allocator.external.len, 32 * 1024 * 1024);
        assert_eq!(cfg.allocator.internal.name, "internal");
        assert_eq!(cfg.allocator.external.min_align, 16);
        assert_eq!(cfg.allocator.external.max_align, 512);
        assert_eq!(cfg.allocator.external.pivot, 8192);
        assert_eq!(cfg.cache.block_bytes, 32768);
        assert_eq!(cfg.cache.max_loads_per_service, 16);
        assert_eq!(cfg.reader.lookahead, 2);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.logging.output_path.is_none());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SAMPLER_HEAP_EXTERNAL_BYTES", "8388608");
        std::env::set_var("SAMPLER_HEAP_MIN_ALIGN", "32");
        std::env::set_var("SAMPLER_HEAP_BLOCK_BYTES", "4096");
        std::env::set_var("SAMPLER_HEAP_LOOKAHEAD", "4");
        std::env::set_var("SAMPLER_HEAP_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.allocator.external.len, 8 * 1024 * 1024);
        assert_eq!(cfg.allocator.internal.min_align, 32);
        assert_eq!(cfg.cache.block_bytes, 4096);
        assert_eq!(cfg.reader.lookahead, 4);
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SAMPLER_HEAP_INTERNAL_BYTES", "lots");
        std::env::set_var("SAMPLER_HEAP_MIN_ALIGN", "24");
        std::env::set_var("SAMPLER_HEAP_BLOCK_BYTES", "100");
        std::env::set_var("SAMPLER_HEAP_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.allocator.internal.len, DEFAULT_INTERNAL_BYTES);
        assert_eq!(cfg.allocator.internal.min_align, DEFAULT_MIN_ALIGN);
        assert_eq!(cfg.cache.block_bytes, DEFAULT_BLOCK_BYTES);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_floors_and_clamps() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SAMPLER_HEAP_INTERNAL_BYTES", "10");
        std::env::set_var("SAMPLER_HEAP_EXTERNAL_BYTES", "4294967296");
        std::env::set_var("SAMPLER_HEAP_LOAD_BATCH", "0");
        std::env::set_var("SAMPLER_HEAP_LOOKAHEAD", "1000");
        std::env::set_var("SAMPLER_HEAP_MIN_ALIGN", "1024");
        std::env::set_var("SAMPLER_HEAP_MAX_ALIGN", "64");
        let cfg = load();
        assert_eq!(cfg.allocator.internal.len, MIN_REGION_BYTES);
        assert_eq!(cfg.allocator.external.len, MAX_REGION_BYTES);
        assert_eq!(cfg.cache.max_loads_per_service, 1);
        assert_eq!(cfg.reader.lookahead, MAX_LOOKAHEAD);
        assert!(cfg.allocator.external.max_align >= cfg.allocator.external.min_align);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_serializes() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let json = serde_json::to_value(load().effective_config()).unwrap();
        assert_eq!(json["block_bytes"], 32768);
        assert_eq!(json["log_format"], "json");
    }
}

//! sampler-heap entry point.
//!
//! ## CLI Subcommands
//!
//! - `sampler-heap soak` - Randomized allocator workload (default)
//! - `sampler-heap config show|defaults|validate` - Inspect configuration
//! - `sampler-heap version` - Print the version

use std::process::ExitCode;

use sampler_heap::cli::{config_cmd, soak};
use sampler_heap::config;
use sampler_heap::telemetry;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("soak");

    match command {
        "soak" => {
            let env = config::load();
            if let Err(e) = telemetry::init_logging(&env.logging) {
                eprintln!("Logging disabled: {e}");
            }
            telemetry::describe_metrics();
            let rest = args.get(2..).unwrap_or_default();
            ExitCode::from(soak::run(rest) as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    let json = args.get(3).map(|s| s.as_str()) == Some("--json");
                    ExitCode::from(config_cmd::run_show(json) as u8)
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("sampler-heap {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "sampler-heap v{version}

USAGE:
    sampler-heap [COMMAND] [OPTIONS]

COMMANDS:
    soak         Run a randomized allocator workload (default)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    sampler-heap soak --workload packing --rounds 1000
    sampler-heap soak --region-bytes 10000000 --seed 7 --json
    sampler-heap config show --json
    sampler-heap config validate

ENVIRONMENT:
    SAMPLER_HEAP_*            See `sampler-heap config defaults`
    SAMPLER_HEAP_LOG_LEVEL    Log filter (default: info)
    SAMPLER_HEAP_LOG_FORMAT   json or pretty (default: json)

EXIT CODES:
    0  Success
    1  Failure
    2  Usage error
"
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "soak" => {
            eprintln!(
                "sampler-heap soak - Randomized allocator workload

USAGE:
    sampler-heap soak [OPTIONS]

OPTIONS:
    --workload NAME    packing, fragmentation (default) or stealable
    --rounds N         Rounds to run (default: 1000)
    --region-bytes N   Region length in bytes (default: 10000000)
    --seed N           RNG seed (default: 1)
    --json             Print the report as JSON

DESCRIPTION:
    packing        fills the region with log-distributed sizes and frees
                   everything each round
    fragmentation  frees about a quarter of live blocks each round and
                   refills the gaps with new sizes
    stealable      allocates 1 MiB stealable blocks past capacity so that
                   eviction runs
"
            );
        }
        "config" => {
            eprintln!(
                "sampler-heap config - Inspect configuration

USAGE:
    sampler-heap config show [--json]
    sampler-heap config defaults
    sampler-heap config validate

DESCRIPTION:
    Values come from SAMPLER_HEAP_* environment variables. `validate`
    exits 1 if any value would produce an unusable heap.
"
            );
        }
        _ => print_usage(),
    }
}

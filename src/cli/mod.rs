//! `sampler-heap` subcommands.
//!
//! ## Usage
//!
//! ```bash
//! sampler-heap soak --workload fragmentation --rounds 1000
//! sampler-heap config show --json
//! sampler-heap config validate
//! ```

pub mod config_cmd;
pub mod soak;

pub use soak::{run_workload, SoakError, SoakOptions, SoakReport, Workload};

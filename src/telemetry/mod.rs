//! Telemetry: structured logging setup and metrics recording.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    describe_metrics, record_allocation, record_allocation_failure, record_block_load,
    record_block_lookup, record_region_free, record_steal,
};

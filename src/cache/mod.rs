//! Streaming block cache over a stealable memory region.
//!
//! Resource data lives on slow storage and is read in fixed-size blocks on
//! demand. Cached blocks stay in memory, unreserved, until the region needs
//! the space for something else.

mod block;
mod error;
mod layout;
mod manager;

pub use block::{BlockHandle, BlockKey, DataClass, LoadState};
pub use error::CacheError;
pub use layout::StreamLayout;
pub use manager::{
    CacheBlockManager, CacheConfig, CacheStats, LoadOutcome, LoadPolicy, LoadTicket, ServiceReport,
};

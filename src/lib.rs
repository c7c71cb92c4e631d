//! sampler-heap
//!
//! Heap and streaming cache for a sampler's firmware: two boundary-tag
//! regions whose cacheable contents can be evicted under memory pressure,
//! and a block cache that streams resource data from storage into the
//! external region on demand.
//!
//! # Layout
//!
//! - [`memory`]: regions, stealable eviction queues, reservation counts
//! - [`scheduler`]: the load priority queue
//! - [`cache`]: the get-or-load block cache
//! - [`resource`]: sequential readers over the cache
//! - [`storage`]: sector-level storage the cache reads from
//!
//! # Threading
//!
//! Each region is guarded by a lock that is only ever tried, never waited
//! on. A call that finds the region busy fails with a `Busy` error instead
//! of blocking, so the audio path can give up and retry on its next tick.

pub mod cache;
pub mod cli;
pub mod config;
pub mod memory;
pub mod resource;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;

use cache::{CacheBlockManager, CacheConfig, CacheError};
use memory::{AllocatorConfig, GeneralAllocator, RegionId};
use resource::ReaderConfig;
use storage::BlockStorage;

/// Heap configuration.
#[derive(Debug, Clone, Default)]
pub struct SamplerHeapConfig {
    pub allocator: AllocatorConfig,
    pub cache: CacheConfig,
    pub reader: ReaderConfig,
}

impl From<config::EnvConfig> for SamplerHeapConfig {
    fn from(env: config::EnvConfig) -> Self {
        Self {
            allocator: env.allocator,
            cache: env.cache,
            reader: env.reader,
        }
    }
}

/// Both regions plus the block cache living in the external one.
pub struct SamplerHeap<S> {
    pub allocator: GeneralAllocator,
    pub cache: CacheBlockManager<S>,
    pub reader: ReaderConfig,
}

impl<S: BlockStorage> SamplerHeap<S> {
    /// Create the regions and attach the cache to `storage`.
    pub fn new(config: SamplerHeapConfig, storage: S) -> Result<Self, CacheError> {
        telemetry::describe_metrics();
        let allocator = GeneralAllocator::new(config.allocator)?;
        let external = Arc::clone(allocator.region(RegionId::External));
        let cache = CacheBlockManager::new(external, storage, config.cache)?;
        Ok(Self {
            allocator,
            cache,
            reader: config.reader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RegionConfig, EXTERNAL_ONLY};
    use crate::storage::MemoryCard;

    #[test]
    fn test_cache_shares_external_region() {
        let config = SamplerHeapConfig {
            allocator: AllocatorConfig {
                internal: RegionConfig::new("internal", 1 << 16),
                external: RegionConfig::new("external", 1 << 20),
            },
            ..SamplerHeapConfig::default()
        };
        let heap = SamplerHeap::new(config, MemoryCard::default()).unwrap();
        assert!(Arc::ptr_eq(
            heap.cache.region(),
            heap.allocator.region(RegionId::External)
        ));
        let placed = heap.allocator.allocate(1000, EXTERNAL_ONLY, true, None).unwrap();
        assert_eq!(placed.region, RegionId::External);
        heap.allocator.deallocate(placed).unwrap();
    }
}

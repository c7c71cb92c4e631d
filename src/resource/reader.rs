//! Sequential block reader with look-ahead.
//!
//! The reader keeps one reservation on the block being played and one on
//! each look-ahead block. Moving on always reserves the new blocks before
//! letting go of the old ones, so a block shared by both windows is never
//! released to the eviction queues in between.

use tracing::{debug, warn};

use crate::cache::{BlockHandle, BlockKey, CacheBlockManager, CacheError, LoadPolicy};
use crate::memory::ResourceId;
use crate::scheduler::Priority;
use crate::storage::BlockStorage;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Blocks queued ahead of the current one.
    pub lookahead: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { lookahead: 2 }
    }
}

pub struct SampleReader {
    resource: ResourceId,
    blocks: u32,
    lookahead: u32,
    current: Option<BlockHandle>,
    prefetch: Vec<BlockHandle>,
    unplayable: bool,
}

impl SampleReader {
    pub fn new<S: BlockStorage>(
        cache: &CacheBlockManager<S>,
        resource: ResourceId,
        config: &ReaderConfig,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            resource,
            blocks: cache.block_count(resource)?,
            lookahead: config.lookahead,
            current: None,
            prefetch: Vec::new(),
            unplayable: false,
        })
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Index of the block currently held.
    pub fn position(&self) -> Option<u32> {
        self.current.map(|h| h.index())
    }

    pub fn is_unplayable(&self) -> bool {
        self.unplayable
    }

    /// Make block `index` current, reading it now if it is not cached, and
    /// queue the look-ahead window behind it.
    pub fn seek<S: BlockStorage>(&mut self, cache: &mut CacheBlockManager<S>, index: u32) -> Result<(), CacheError> {
        if self.unplayable {
            return Err(CacheError::Unplayable(self.resource));
        }
        let current = match cache.get_block(self.resource, index, LoadPolicy::LoadNow) {
            Ok(handle) => handle,
            Err(err) if err.is_io() => {
                warn!(resource = %self.resource, index, error = %err, "resource unplayable");
                self.unplayable = true;
                self.close(cache)?;
                return Err(CacheError::Unplayable(self.resource));
            }
            Err(err) => return Err(err),
        };

        let mut prefetch = Vec::with_capacity(self.lookahead as usize);
        let last = index.saturating_add(self.lookahead).min(self.blocks.saturating_sub(1));
        for ahead in index + 1..=last {
            let distance = ahead - index;
            match cache.get_block(self.resource, ahead, LoadPolicy::Enqueue(Priority(distance))) {
                Ok(handle) => prefetch.push(handle),
                Err(err) if err.is_out_of_memory() => {
                    debug!(resource = %self.resource, index = ahead, "look-ahead skipped, no memory");
                    break;
                }
                Err(err) => {
                    release_all(cache, prefetch.into_iter().chain(Some(current)))?;
                    return Err(err);
                }
            }
        }

        let old = self.current.replace(current);
        let old_prefetch = std::mem::replace(&mut self.prefetch, prefetch);
        release_all(cache, old.into_iter().chain(old_prefetch))
    }

    /// Move to the next block. Returns false at the end of the resource.
    pub fn advance<S: BlockStorage>(&mut self, cache: &mut CacheBlockManager<S>) -> Result<bool, CacheError> {
        let next = self.position().map_or(0, |i| i + 1);
        if next >= self.blocks {
            return Ok(false);
        }
        self.seek(cache, next)?;
        Ok(true)
    }

    /// Run `f` over the current block's data.
    pub fn read<S: BlockStorage, R>(
        &self,
        cache: &CacheBlockManager<S>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, CacheError> {
        if self.unplayable {
            return Err(CacheError::Unplayable(self.resource));
        }
        let handle = self.current.ok_or(CacheError::NotResident(BlockKey {
            resource: self.resource,
            index: 0,
        }))?;
        cache.with_block_data(&handle, f)
    }

    /// Let go of every block held.
    pub fn close<S: BlockStorage>(&mut self, cache: &mut CacheBlockManager<S>) -> Result<(), CacheError> {
        let current = self.current.take();
        let prefetch = std::mem::take(&mut self.prefetch);
        release_all(cache, current.into_iter().chain(prefetch))
    }
}

/// Release every handle, reporting the first failure.
fn release_all<S: BlockStorage>(
    cache: &mut CacheBlockManager<S>,
    handles: impl IntoIterator<Item = BlockHandle>,
) -> Result<(), CacheError> {
    let mut first = Ok(());
    for handle in handles {
        if let Err(err) = cache.release_block(handle) {
            if first.is_ok() {
                first = Err(err);
            }
        }
    }
    first
}

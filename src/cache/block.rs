//! Cache block identity, load state and its stealable owner.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::memory::{ResourceId, Stealable, StealableId, StealableQueue, StealReason};

/// One block of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub resource: ResourceId,
    pub index: u32,
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource, self.index)
    }
}

/// Where a block is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LoadState {
    /// Allocated, no read requested. The caller fills it.
    Unrequested,
    /// Waiting in the load queue.
    Queued,
    /// The read is in flight.
    Loading,
    /// Data present.
    Resident,
    /// The read failed; the block is freed when its last holder lets go.
    Failed,
}

/// Kind of data a resource streams, which decides how hard its blocks are
/// protected from eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum DataClass {
    #[default]
    SampleData,
    SampleDataConverted,
    RepitchedCache,
    PercCache,
    WaveTableBand,
}

impl DataClass {
    pub fn queue(self, active: bool) -> StealableQueue {
        match (self, active) {
            (Self::SampleData, true) => StealableQueue::ActiveSongSampleData,
            (Self::SampleData, false) => StealableQueue::IdleSampleData,
            (Self::SampleDataConverted, true) => StealableQueue::ActiveSongSampleDataConverted,
            (Self::SampleDataConverted, false) => StealableQueue::IdleSampleDataConverted,
            (Self::RepitchedCache, true) => StealableQueue::ActiveSongRepitchedCache,
            (Self::RepitchedCache, false) => StealableQueue::IdleRepitchedCache,
            (Self::PercCache, true) => StealableQueue::ActiveSongPercCache,
            (Self::PercCache, false) => StealableQueue::IdlePercCache,
            (Self::WaveTableBand, _) => StealableQueue::IdleWaveTableBandData,
        }
    }
}

/// Keys of blocks evicted since the manager last looked.
pub(crate) type StolenLog = Arc<Mutex<Vec<BlockKey>>>;

/// Stealable owner registered for every cache block.
pub(crate) struct CacheBlock {
    key: BlockKey,
    class: DataClass,
    active: Arc<AtomicBool>,
    stolen: StolenLog,
}

impl CacheBlock {
    pub fn new(key: BlockKey, class: DataClass, active: Arc<AtomicBool>, stolen: StolenLog) -> Self {
        Self {
            key,
            class,
            active,
            stolen,
        }
    }
}

impl Stealable for CacheBlock {
    fn may_be_stolen(&self, exclude: Option<ResourceId>) -> bool {
        exclude != Some(self.key.resource)
    }

    fn steal(&mut self, _reason: StealReason) {
        self.stolen.lock().push(self.key);
    }

    fn appropriate_queue(&self) -> StealableQueue {
        self.class.queue(self.active.load(Ordering::Relaxed))
    }
}

/// A reservation on a cache block. Give it back with
/// [`CacheBlockManager::release_block`](super::CacheBlockManager::release_block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pub(crate) key: BlockKey,
    pub(crate) id: StealableId,
}

impl BlockHandle {
    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn resource(&self) -> ResourceId {
        self.key.resource
    }

    pub fn index(&self) -> u32 {
        self.key.index
    }
}

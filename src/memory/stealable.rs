//! The stealable capability and eviction queue identities.

use std::fmt;

/// Identity of a resource that owns stealable memory (a sample, a cache, ...).
///
/// Passed as the exclusion target of an allocation so the resource being
/// built is never evicted to make room for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Handle to a stealable entry in a region.
///
/// The generation makes handles to evicted or destroyed entries detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StealableId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// Why a stealable is being told to let go of its memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealReason {
    /// Evicted to satisfy an allocation.
    Reclaimed,
    /// The owning region is being dropped.
    RegionTeardown,
}

/// Eviction queues, index 0 most protected.
///
/// Eviction drains the highest index first. Within the active song, data
/// that took work to produce (converted, repitched, percussion caches) ranks
/// above raw sample data, which can simply be read again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StealableQueue {
    ActiveSongPercCache = 0,
    ActiveSongRepitchedCache = 1,
    ActiveSongSampleDataConverted = 2,
    ActiveSongSampleData = 3,
    IdleAudioFileObjects = 4,
    IdlePercCache = 5,
    IdleRepitchedCache = 6,
    IdleWaveTableBandData = 7,
    IdleSampleDataConverted = 8,
    IdleSampleData = 9,
}

impl StealableQueue {
    pub const COUNT: usize = 10;

    pub const ALL: [StealableQueue; Self::COUNT] = [
        Self::ActiveSongPercCache,
        Self::ActiveSongRepitchedCache,
        Self::ActiveSongSampleDataConverted,
        Self::ActiveSongSampleData,
        Self::IdleAudioFileObjects,
        Self::IdlePercCache,
        Self::IdleRepitchedCache,
        Self::IdleWaveTableBandData,
        Self::IdleSampleDataConverted,
        Self::IdleSampleData,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Queues in the order eviction visits them, least protected first.
    pub fn eviction_order() -> impl Iterator<Item = StealableQueue> {
        Self::ALL.into_iter().rev()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ActiveSongPercCache => "active_perc_cache",
            Self::ActiveSongRepitchedCache => "active_repitched_cache",
            Self::ActiveSongSampleDataConverted => "active_sample_converted",
            Self::ActiveSongSampleData => "active_sample",
            Self::IdleAudioFileObjects => "idle_audio_file",
            Self::IdlePercCache => "idle_perc_cache",
            Self::IdleRepitchedCache => "idle_repitched_cache",
            Self::IdleWaveTableBandData => "idle_wavetable_band",
            Self::IdleSampleDataConverted => "idle_sample_converted",
            Self::IdleSampleData => "idle_sample",
        }
    }
}

/// Contract for memory the allocator may evict.
///
/// The allocator only calls these while it holds its region guard, so
/// implementations must not call back into the same region (such calls fail
/// with `Busy`).
pub trait Stealable: Send {
    /// Veto eviction. `exclude` names the resource an allocation is being
    /// made for; its own memory must not be taken.
    fn may_be_stolen(&self, exclude: Option<ResourceId>) -> bool;

    /// Drop every reference to the memory. The region frees the span once
    /// this returns.
    fn steal(&mut self, reason: StealReason);

    /// Queue this entry belongs in while unreserved.
    fn appropriate_queue(&self) -> StealableQueue;
}

//! Heap management: boundary-tag regions, stealable eviction and reservations.
//!
//! A [`MemoryRegion`] manages one contiguous span. Cacheable data is
//! allocated as stealable spans owned by a [`Stealable`] implementation;
//! when a request cannot be met from free space the region evicts unreserved
//! stealables, least protected queue first.

mod allocator;
mod error;
mod free_index;
mod reclaim;
mod region;
mod reservation;
mod stealable;
mod tag;

pub use allocator::{
    AllocatorConfig, GeneralAllocator, PlacedBlock, RegionId, EXTERNAL_FIRST, EXTERNAL_ONLY,
    INTERNAL_FIRST, INTERNAL_ONLY,
};
pub use error::{AllocError, HeapCorruption, ReservationError};
pub use free_index::FreeSpan;
pub use region::{
    Block, Extension, HeapReport, MemoryRegion, RegionConfig, RegionStats, Shortened, FENCE_BYTES,
};
pub use reservation::{ReleaseHint, Released};
pub use stealable::{ResourceId, Stealable, StealableId, StealableQueue, StealReason};
pub use tag::{SpanKind, SPAN_OVERHEAD};

//! The two named regions and caller-ordered allocation across them.

use std::sync::Arc;

use tracing::trace;

use super::error::AllocError;
use super::region::{Block, MemoryRegion, RegionConfig};
use super::stealable::{ResourceId, Stealable, StealableId};

/// Which region a block lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionId {
    /// Fast, small on-chip memory.
    Internal,
    /// Slow, large external memory. Streaming caches live here.
    External,
}

impl RegionId {
    pub fn name(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// A block together with the region that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlacedBlock {
    pub region: RegionId,
    pub block: Block,
}

/// Preference orders callers commonly pass to [`GeneralAllocator::allocate`].
pub const INTERNAL_ONLY: &[RegionId] = &[RegionId::Internal];
pub const EXTERNAL_ONLY: &[RegionId] = &[RegionId::External];
pub const INTERNAL_FIRST: &[RegionId] = &[RegionId::Internal, RegionId::External];
pub const EXTERNAL_FIRST: &[RegionId] = &[RegionId::External, RegionId::Internal];

/// Configuration for both regions.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub internal: RegionConfig,
    pub external: RegionConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            internal: RegionConfig::new(RegionId::Internal.name(), 2 * 1024 * 1024),
            external: RegionConfig::new(RegionId::External.name(), 32 * 1024 * 1024),
        }
    }
}

/// Owner of the internal and external regions.
///
/// Nothing spills between regions on its own: each call names the regions
/// to try, in order.
pub struct GeneralAllocator {
    internal: Arc<MemoryRegion>,
    external: Arc<MemoryRegion>,
}

impl GeneralAllocator {
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
        Ok(Self {
            internal: Arc::new(MemoryRegion::new(config.internal)?),
            external: Arc::new(MemoryRegion::new(config.external)?),
        })
    }

    pub fn region(&self, id: RegionId) -> &Arc<MemoryRegion> {
        match id {
            RegionId::Internal => &self.internal,
            RegionId::External => &self.external,
        }
    }

    /// Try each region in `order` until one satisfies the request.
    ///
    /// `Busy` from a region stops the search; the caller is re-entering and
    /// must not fall back to a different region behind the allocator's back.
    pub fn allocate(
        &self,
        size: usize,
        order: &[RegionId],
        may_steal: bool,
        exclude: Option<ResourceId>,
    ) -> Result<PlacedBlock, AllocError> {
        let mut last = None;
        for &id in order {
            match self.region(id).allocate(size, may_steal, exclude) {
                Ok(block) => return Ok(PlacedBlock { region: id, block }),
                Err(err) if err.is_busy() || !err.is_recoverable() => return Err(err),
                Err(err) => {
                    trace!(region = id.name(), size, %err, "trying next region");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or(AllocError::OutOfMemory {
            region: "none",
            requested: size,
        }))
    }

    /// Allocate a stealable span in one region.
    pub fn allocate_stealable(
        &self,
        region: RegionId,
        size: usize,
        owner: Box<dyn Stealable>,
        exclude: Option<ResourceId>,
    ) -> Result<StealableId, AllocError> {
        self.region(region).allocate_stealable(size, owner, exclude)
    }

    pub fn deallocate(&self, placed: PlacedBlock) -> Result<(), AllocError> {
        self.region(placed.region).deallocate(placed.block)
    }

    pub fn allocated_size_of(&self, placed: PlacedBlock) -> Result<usize, AllocError> {
        self.region(placed.region).allocated_size_of(placed.block)
    }
}

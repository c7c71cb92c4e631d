//! Streaming cache errors.

use thiserror::Error;

use super::block::BlockKey;
use crate::memory::{AllocError, ReservationError, ResourceId};
use crate::storage::StorageError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("reading {key} failed: {source}")]
    Io {
        key: BlockKey,
        #[source]
        source: StorageError,
    },

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("resource {0} is already registered")]
    DuplicateResource(ResourceId),

    #[error("invalid layout for {resource}: {reason}")]
    InvalidLayout { resource: ResourceId, reason: String },

    #[error("{resource} has {blocks} blocks, index {index} is out of range")]
    IndexOutOfRange {
        resource: ResourceId,
        index: u32,
        blocks: u32,
    },

    #[error("a load is already in flight")]
    LoadInFlight,

    #[error("block {0} holds no readable data yet")]
    NotResident(BlockKey),

    #[error("block {0} failed to load")]
    LoadFailed(BlockKey),

    #[error("handle for {0} no longer names a live block")]
    StaleHandle(BlockKey),

    #[error("resource {0} is unplayable")]
    Unplayable(ResourceId),

    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Memory could not be found for a new block.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::Alloc(AllocError::OutOfMemory { .. } | AllocError::TooLarge { .. })
        )
    }

    /// A region or the load slot was occupied; retry from the main loop.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Alloc(AllocError::Busy { .. })
                | Self::Reservation(ReservationError::Busy { .. })
                | Self::LoadInFlight
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::LoadFailed(_) | Self::Unplayable(_))
    }
}

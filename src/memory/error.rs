//! Error types for region operations.

use thiserror::Error;

use super::stealable::StealableId;

/// Errors returned by allocation entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("region {region}: out of memory for {requested} bytes")]
    OutOfMemory { region: &'static str, requested: usize },

    #[error("region {region}: {requested} bytes exceeds capacity {capacity}")]
    TooLarge {
        region: &'static str,
        requested: usize,
        capacity: usize,
    },

    #[error("region {region} is busy")]
    Busy { region: &'static str },

    #[error("region {region}: no live allocation at offset {addr}")]
    InvalidBlock { region: &'static str, addr: usize },

    #[error("region {region}: stale stealable handle {id:?}")]
    StaleHandle { region: &'static str, id: StealableId },

    #[error("region {region}: boundary tags corrupted at offset {addr}")]
    Corrupted { region: &'static str, addr: usize },

    #[error("invalid region configuration: {0}")]
    Config(String),
}

impl AllocError {
    /// Reentrant call rejected by the region guard.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Everything except corruption leaves the region consistent.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupted { .. })
    }
}

/// Errors from the reservation protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReservationError {
    #[error("region {region}: reservation count of {id:?} would go below zero")]
    Underflow { region: &'static str, id: StealableId },

    #[error("region {region}: stale stealable handle {id:?}")]
    Stale { region: &'static str, id: StealableId },

    #[error("region {region} is busy")]
    Busy { region: &'static str },

    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Inconsistency found by a heap walk.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeapCorruption {
    #[error("region busy, walk skipped")]
    Busy,

    #[error("unreadable tag at offset {addr}")]
    InvalidTag { addr: usize },

    #[error("header and footer disagree for span at {addr}")]
    TagMismatch { addr: usize },

    #[error("free span at {addr} ({len} bytes) missing from the index")]
    Unindexed { addr: usize, len: usize },

    #[error("adjacent free spans at {addr} were not coalesced")]
    Uncoalesced { addr: usize },

    #[error("stealable span at {addr} has no registered owner")]
    Orphaned { addr: usize },

    #[error("walk accounted for {accounted} of {expected} bytes")]
    Accounting { accounted: usize, expected: usize },

    #[error("index holds {indexed} free records, walk found {walked}")]
    IndexSize { indexed: usize, walked: usize },
}

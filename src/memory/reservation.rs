//! Reservation counts ("reasons to exist") on stealable entries.
//!
//! A reserved entry is pinned: it sits in no eviction queue. The last release
//! either parks it in the queue its owner asks for or, when the caller knows
//! the data will not be wanted again soon, frees it on the spot.

use tracing::{trace, warn};

use super::error::{AllocError, ReservationError};
use super::region::MemoryRegion;
use super::stealable::{StealableId, StealableQueue};

/// What the caller expects to happen to the data after the last release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseHint {
    /// Keep it around until memory pressure evicts it.
    #[default]
    KeepCached,
    /// Not needed again soon; free it now.
    Discard,
}

/// Outcome of removing one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    StillReserved(u32),
    Cached(StealableQueue),
    TornDown,
}

impl MemoryRegion {
    /// Pin an entry. The 0→1 transition takes it out of its eviction queue.
    pub fn add_reservation(&self, id: StealableId) -> Result<u32, ReservationError> {
        let mut state = self.enter().map_err(|e| self.reservation_error(e))?;
        let occupant = state.stealables.get_mut(id).ok_or(ReservationError::Stale {
            region: self.name(),
            id,
        })?;
        occupant.reservations += 1;
        let count = occupant.reservations;
        if count == 1 {
            state.stealables.dequeue(id);
        }
        trace!(region = self.name(), ?id, count, "reservation added");
        Ok(count)
    }

    /// Unpin an entry once.
    ///
    /// Removing a reservation from an entry that has none is reported as
    /// `Underflow`; the count stays at zero.
    pub fn remove_reservation(
        &self,
        id: StealableId,
        hint: ReleaseHint,
    ) -> Result<Released, ReservationError> {
        let mut state = self.enter().map_err(|e| self.reservation_error(e))?;
        let occupant = state.stealables.get_mut(id).ok_or(ReservationError::Stale {
            region: self.name(),
            id,
        })?;

        if occupant.reservations == 0 {
            warn!(region = self.name(), ?id, "reservation count underflow");
            return Err(ReservationError::Underflow {
                region: self.name(),
                id,
            });
        }
        occupant.reservations -= 1;
        let count = occupant.reservations;
        if count > 0 {
            return Ok(Released::StillReserved(count));
        }

        match hint {
            ReleaseHint::KeepCached => {
                let queue = occupant.owner.appropriate_queue();
                state.stealables.enqueue(id, queue);
                trace!(region = self.name(), ?id, queue = queue.name(), "released to eviction queue");
                Ok(Released::Cached(queue))
            }
            ReleaseHint::Discard => {
                self.destroy_locked(&mut state, id)?;
                trace!(region = self.name(), ?id, "released and torn down");
                Ok(Released::TornDown)
            }
        }
    }

    /// Current reservation count of an entry.
    pub fn reservations(&self, id: StealableId) -> Result<u32, ReservationError> {
        let state = self.enter().map_err(|e| self.reservation_error(e))?;
        state
            .stealables
            .get(id)
            .map(|o| o.reservations)
            .ok_or(ReservationError::Stale {
                region: self.name(),
                id,
            })
    }

    fn reservation_error(&self, err: AllocError) -> ReservationError {
        match err {
            AllocError::Busy { region } => ReservationError::Busy { region },
            other => ReservationError::Alloc(other),
        }
    }
}

//! Reservation count protocol tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use sampler_heap::memory::{
    AllocError, MemoryRegion, RegionConfig, ReleaseHint, Released, ReservationError, ResourceId, Stealable,
    StealableQueue, StealReason,
};

struct Counted {
    steals: Arc<AtomicU32>,
}

impl Stealable for Counted {
    fn may_be_stolen(&self, _: Option<ResourceId>) -> bool {
        true
    }

    fn steal(&mut self, reason: StealReason) {
        if reason == StealReason::Reclaimed {
            self.steals.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn appropriate_queue(&self) -> StealableQueue {
        StealableQueue::IdleRepitchedCache
    }
}

fn setup() -> (MemoryRegion, Arc<AtomicU32>) {
    let region = MemoryRegion::new(RegionConfig::new("reasons", 1 << 16)).unwrap();
    (region, Arc::new(AtomicU32::new(0)))
}

#[test]
fn new_stealable_starts_pinned() {
    let (region, steals) = setup();
    let id = region
        .allocate_stealable(1000, Box::new(Counted { steals }), None)
        .unwrap();
    assert_eq!(region.reservations(id).unwrap(), 1);
    assert_eq!(region.queue_len(StealableQueue::IdleRepitchedCache).unwrap(), 0);
}

#[test]
fn counts_move_in_steps_and_last_release_caches() {
    let (region, steals) = setup();
    let id = region
        .allocate_stealable(1000, Box::new(Counted { steals }), None)
        .unwrap();
    assert_eq!(region.add_reservation(id).unwrap(), 2);
    assert_eq!(region.add_reservation(id).unwrap(), 3);

    assert_eq!(
        region.remove_reservation(id, ReleaseHint::KeepCached).unwrap(),
        Released::StillReserved(2)
    );
    assert_eq!(
        region.remove_reservation(id, ReleaseHint::Discard).unwrap(),
        Released::StillReserved(1)
    );
    assert_eq!(
        region.remove_reservation(id, ReleaseHint::KeepCached).unwrap(),
        Released::Cached(StealableQueue::IdleRepitchedCache)
    );
    assert_eq!(region.reservations(id).unwrap(), 0);
    assert_eq!(region.queue_len(StealableQueue::IdleRepitchedCache).unwrap(), 1);

    // pinning again takes it back out of the queue
    region.add_reservation(id).unwrap();
    assert_eq!(region.queue_len(StealableQueue::IdleRepitchedCache).unwrap(), 0);
}

#[test]
fn underflow_is_an_error_and_count_stays_zero() {
    let (region, steals) = setup();
    let id = region
        .allocate_stealable(1000, Box::new(Counted { steals }), None)
        .unwrap();
    region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();

    let err = region.remove_reservation(id, ReleaseHint::KeepCached).unwrap_err();
    assert!(matches!(err, ReservationError::Underflow { .. }));
    assert_eq!(region.reservations(id).unwrap(), 0);
    assert_eq!(region.queue_len(StealableQueue::IdleRepitchedCache).unwrap(), 1);
}

#[test]
fn discard_hint_frees_immediately() {
    let (region, steals) = setup();
    let before = region.stats().unwrap();
    let id = region
        .allocate_stealable(1000, Box::new(Counted { steals: steals.clone() }), None)
        .unwrap();
    assert_eq!(
        region.remove_reservation(id, ReleaseHint::Discard).unwrap(),
        Released::TornDown
    );
    assert!(!region.is_live(id).unwrap());
    assert_eq!(region.stats().unwrap().free_bytes, before.free_bytes);
    // owner teardown is not an eviction
    assert_eq!(steals.load(Ordering::Relaxed), 0);
}

#[test]
fn stale_ids_are_detected() {
    let (region, steals) = setup();
    let id = region
        .allocate_stealable(1000, Box::new(Counted { steals: steals.clone() }), None)
        .unwrap();
    region.destroy_stealable(id).unwrap();

    assert!(matches!(region.add_reservation(id), Err(ReservationError::Stale { .. })));
    assert!(matches!(region.destroy_stealable(id), Err(AllocError::StaleHandle { .. })));
    assert!(matches!(region.block_of(id), Err(AllocError::StaleHandle { .. })));

    // the slot is reused under a new generation
    let fresh = region
        .allocate_stealable(1000, Box::new(Counted { steals }), None)
        .unwrap();
    assert_ne!(fresh, id);
    assert!(region.is_live(fresh).unwrap());
    assert!(!region.is_live(id).unwrap());
}

#[test]
fn evicted_entry_reports_stale() {
    let region = MemoryRegion::new(RegionConfig::new("evict", 1 << 16)).unwrap();
    let steals = Arc::new(AtomicU32::new(0));
    let id = region
        .allocate_stealable(40_000, Box::new(Counted { steals: steals.clone() }), None)
        .unwrap();
    region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();

    region.allocate(40_000, true, None).unwrap();
    assert_eq!(steals.load(Ordering::Relaxed), 1);
    assert!(matches!(region.reservations(id), Err(ReservationError::Stale { .. })));
}

#[test]
fn stealable_survives_shorten_and_extend() {
    let (region, steals) = setup();
    let id = region
        .allocate_stealable(20_000, Box::new(Counted { steals }), None)
        .unwrap();
    let block = region.block_of(id).unwrap();
    let moved = region.shorten_left(block, 8192).unwrap().block;
    assert_eq!(region.block_of(id).unwrap(), moved);

    let grown = region.extend(moved, 0, 4096).unwrap();
    assert_eq!(region.block_of(id).unwrap(), grown.block);
    region.destroy_stealable(id).unwrap();
    assert_eq!(region.stats().unwrap().free_spans, 1);
}

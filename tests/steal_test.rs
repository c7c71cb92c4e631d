//! Eviction tests: steal counts, queue order, vetoes and re-entrancy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use sampler_heap::memory::{
    AllocError, MemoryRegion, RegionConfig, ReleaseHint, ResourceId, Stealable, StealableId, StealableQueue,
    StealReason, SPAN_OVERHEAD,
};

const TEN_MB: usize = 10_000_000;
const ONE_MB: usize = 1 << 20;

/// Records its tag in a shared log when stolen.
struct Probe {
    tag: u32,
    resource: ResourceId,
    queue: StealableQueue,
    log: Arc<Mutex<Vec<(u32, StealReason)>>>,
}

impl Stealable for Probe {
    fn may_be_stolen(&self, exclude: Option<ResourceId>) -> bool {
        exclude != Some(self.resource)
    }

    fn steal(&mut self, reason: StealReason) {
        self.log.lock().push((self.tag, reason));
    }

    fn appropriate_queue(&self) -> StealableQueue {
        self.queue
    }
}

struct Harness {
    region: Arc<MemoryRegion>,
    log: Arc<Mutex<Vec<(u32, StealReason)>>>,
}

impl Harness {
    fn new(len: usize) -> Self {
        Self {
            region: Arc::new(MemoryRegion::new(RegionConfig::new("steal", len)).unwrap()),
            log: Arc::default(),
        }
    }

    fn probe(&self, tag: u32, resource: u32, queue: StealableQueue) -> Box<Probe> {
        Box::new(Probe {
            tag,
            resource: ResourceId(resource),
            queue,
            log: self.log.clone(),
        })
    }

    /// Allocate and immediately release to the eviction queues.
    fn cached(&self, size: usize, tag: u32, queue: StealableQueue) -> StealableId {
        let id = self
            .region
            .allocate_stealable(size, self.probe(tag, tag, queue), None)
            .unwrap();
        self.region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();
        id
    }

    fn stolen(&self) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter(|(_, r)| *r == StealReason::Reclaimed)
            .map(|(t, _)| *t)
            .collect()
    }
}

#[test]
fn uniform_stealables_steal_exactly_the_overflow() {
    let h = Harness::new(TEN_MB);
    let requested = 1024;
    for i in 0..requested {
        let id = h.cached(ONE_MB, i, StealableQueue::IdleSampleData);
        assert_eq!(h.region.allocated_size_of(h.region.block_of(id).unwrap()).unwrap(), ONE_MB);
    }
    let fits = TEN_MB / (ONE_MB + SPAN_OVERHEAD);
    assert_eq!(h.stolen().len(), requested as usize - fits);
    assert_eq!(h.region.stats().unwrap().steals, (requested as usize - fits) as u64);
    assert_eq!(h.region.check_integrity().unwrap().accounted(), h.region.len());
}

#[test]
fn oldest_entry_in_a_queue_goes_first() {
    let h = Harness::new(TEN_MB);
    for i in 0..9 {
        h.cached(ONE_MB, i, StealableQueue::IdleSampleData);
    }
    h.cached(ONE_MB, 9, StealableQueue::IdleSampleData);
    h.cached(ONE_MB, 10, StealableQueue::IdleSampleData);
    assert_eq!(h.stolen(), vec![0, 1]);
}

#[test]
fn least_protected_queue_is_drained_first() {
    let h = Harness::new(TEN_MB);
    let queues = [
        StealableQueue::ActiveSongPercCache,
        StealableQueue::IdleSampleData,
        StealableQueue::ActiveSongSampleData,
        StealableQueue::IdleWaveTableBandData,
    ];
    for i in 0..9 {
        h.cached(ONE_MB, i, queues[i as usize % queues.len()]);
    }
    for i in 100..104 {
        h.cached(ONE_MB, i, StealableQueue::ActiveSongPercCache);
    }
    // IdleSampleData (9) holds 1 and 5, IdleWaveTableBandData (7) holds 3 and 7
    assert_eq!(h.stolen(), vec![1, 5, 3, 7]);
}

#[test]
fn reserved_entries_are_never_stolen() {
    let h = Harness::new(TEN_MB);
    let mut pinned = Vec::new();
    for i in 0..9 {
        let id = h
            .region
            .allocate_stealable(ONE_MB, h.probe(i, i, StealableQueue::IdleSampleData), None)
            .unwrap();
        pinned.push(id);
    }
    let err = h
        .region
        .allocate_stealable(ONE_MB, h.probe(99, 99, StealableQueue::IdleSampleData), None)
        .unwrap_err();
    assert!(matches!(err, AllocError::OutOfMemory { .. }));
    assert!(h.stolen().is_empty());

    h.region.remove_reservation(pinned[4], ReleaseHint::KeepCached).unwrap();
    h.region
        .allocate_stealable(ONE_MB, h.probe(99, 99, StealableQueue::IdleSampleData), None)
        .unwrap();
    assert_eq!(h.stolen(), vec![4]);
    assert!(!h.region.is_live(pinned[4]).unwrap());
}

#[test]
fn excluded_resource_vetoes_its_own_eviction() {
    let h = Harness::new(TEN_MB);
    for i in 0..9 {
        let id = h
            .region
            .allocate_stealable(ONE_MB, h.probe(i, 7, StealableQueue::IdleSampleData), None)
            .unwrap();
        h.region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();
    }

    let err = h.region.allocate(ONE_MB, true, Some(ResourceId(7))).unwrap_err();
    assert!(matches!(err, AllocError::OutOfMemory { .. }));
    assert!(h.stolen().is_empty());

    h.region.allocate(ONE_MB, true, Some(ResourceId(8))).unwrap();
    assert_eq!(h.stolen(), vec![0]);
}

#[test]
fn plain_allocation_without_steal_permission_fails() {
    let h = Harness::new(TEN_MB);
    for i in 0..9 {
        h.cached(ONE_MB, i, StealableQueue::IdleSampleData);
    }
    assert!(matches!(
        h.region.allocate(ONE_MB, false, None),
        Err(AllocError::OutOfMemory { .. })
    ));
    assert!(h.stolen().is_empty());
}

#[test]
fn small_free_space_is_used_before_stealing() {
    let h = Harness::new(TEN_MB);
    for i in 0..9 {
        h.cached(ONE_MB, i, StealableQueue::IdleSampleData);
    }
    h.region.allocate(4096, true, None).unwrap();
    assert!(h.stolen().is_empty());
}

#[test]
fn requeue_follows_the_owners_new_queue() {
    struct Switchable {
        active: Arc<AtomicUsize>,
    }
    impl Stealable for Switchable {
        fn may_be_stolen(&self, _: Option<ResourceId>) -> bool {
            true
        }
        fn steal(&mut self, _: StealReason) {}
        fn appropriate_queue(&self) -> StealableQueue {
            if self.active.load(Ordering::Relaxed) == 1 {
                StealableQueue::ActiveSongSampleData
            } else {
                StealableQueue::IdleSampleData
            }
        }
    }

    let region = MemoryRegion::new(RegionConfig::new("requeue", 1 << 16)).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let id = region
        .allocate_stealable(1000, Box::new(Switchable { active: active.clone() }), None)
        .unwrap();
    region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();
    assert_eq!(region.queue_len(StealableQueue::IdleSampleData).unwrap(), 1);

    active.store(1, Ordering::Relaxed);
    region.requeue(id).unwrap();
    assert_eq!(region.queue_len(StealableQueue::IdleSampleData).unwrap(), 0);
    assert_eq!(region.queue_len(StealableQueue::ActiveSongSampleData).unwrap(), 1);
}

/// Tries to allocate from its own region while being stolen.
struct Reentrant {
    region: Weak<MemoryRegion>,
    seen: Arc<Mutex<Option<AllocError>>>,
}

impl Stealable for Reentrant {
    fn may_be_stolen(&self, _: Option<ResourceId>) -> bool {
        true
    }

    fn steal(&mut self, reason: StealReason) {
        if reason != StealReason::Reclaimed {
            return;
        }
        if let Some(region) = self.region.upgrade() {
            *self.seen.lock() = region.allocate(64, false, None).err();
        }
    }

    fn appropriate_queue(&self) -> StealableQueue {
        StealableQueue::IdleSampleData
    }
}

#[test]
fn reentrant_call_during_steal_is_busy() {
    let region = Arc::new(MemoryRegion::new(RegionConfig::new("reenter", 1 << 16)).unwrap());
    let seen = Arc::new(Mutex::new(None));
    let owner = Reentrant {
        region: Arc::downgrade(&region),
        seen: seen.clone(),
    };
    let id = region.allocate_stealable(60_000, Box::new(owner), None).unwrap();
    region.remove_reservation(id, ReleaseHint::KeepCached).unwrap();

    region.allocate(60_000, true, None).unwrap();
    assert_eq!(
        *seen.lock(),
        Some(AllocError::Busy { region: "reenter" })
    );
    assert_eq!(region.check_integrity().unwrap().accounted(), region.len());
}

#[test]
fn dropping_region_notifies_remaining_owners() {
    let h = Harness::new(1 << 20);
    h.cached(1000, 1, StealableQueue::IdleSampleData);
    let pinned = h
        .region
        .allocate_stealable(1000, h.probe(2, 2, StealableQueue::IdleSampleData), None)
        .unwrap();
    assert!(h.region.is_live(pinned).unwrap());
    let log = h.log.clone();
    drop(h);
    let mut tags: Vec<u32> = log
        .lock()
        .iter()
        .filter(|(_, r)| *r == StealReason::RegionTeardown)
        .map(|(t, _)| *t)
        .collect();
    tags.sort_unstable();
    assert_eq!(tags, vec![1, 2]);
}

#[test]
fn guard_contention_returns_busy_instead_of_blocking() {
    let region = Arc::new(MemoryRegion::new(RegionConfig::new("busy", 1 << 16)).unwrap());
    let other = region.clone();
    let result = region
        .with_payload_mut(region.allocate(100, false, None).unwrap(), |_| {
            other.allocate(100, false, None)
        })
        .unwrap();
    assert!(matches!(result, Err(AllocError::Busy { .. })));
    assert!(result.unwrap_err().is_busy());
}

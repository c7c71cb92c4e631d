//! Arena of stealable entries and the eviction queues threaded through it.
//!
//! Each queue is a doubly-linked list of arena slot indices, so insertion at
//! the tail and removal from anywhere are O(1). Entries sit in exactly one
//! queue while their reservation count is zero and in none otherwise.

use std::collections::HashMap;

use super::stealable::{ResourceId, Stealable, StealableId, StealableQueue};

const QUEUES: usize = StealableQueue::COUNT;

pub(crate) struct Occupant {
    pub owner: Box<dyn Stealable>,
    pub payload: usize,
    pub reservations: u32,
    queue: Option<StealableQueue>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl Occupant {
    pub fn queue(&self) -> Option<StealableQueue> {
        self.queue
    }
}

struct Slot {
    generation: u32,
    occupant: Option<Occupant>,
}

#[derive(Default)]
pub(crate) struct ReclaimQueues {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    heads: [Option<u32>; QUEUES],
    tails: [Option<u32>; QUEUES],
    lens: [usize; QUEUES],
    by_payload: HashMap<usize, u32>,
}

impl ReclaimQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner for the span at `payload`. Not queued.
    pub fn insert(&mut self, owner: Box<dyn Stealable>, payload: usize, reservations: u32) -> StealableId {
        let occupant = Occupant {
            owner,
            payload,
            reservations,
            queue: None,
            prev: None,
            next: None,
        };
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot as usize].occupant = Some(occupant);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    occupant: Some(occupant),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.by_payload.insert(payload, slot);
        StealableId {
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    /// Take an entry out of the arena, unlinking it from its queue.
    pub fn remove(&mut self, id: StealableId) -> Option<Occupant> {
        self.get(id)?;
        self.unlink(id.slot);
        let slot = &mut self.slots[id.slot as usize];
        let occupant = slot.occupant.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(id.slot);
        self.by_payload.remove(&occupant.payload);
        Some(occupant)
    }

    pub fn get(&self, id: StealableId) -> Option<&Occupant> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.occupant.as_ref()
    }

    pub fn get_mut(&mut self, id: StealableId) -> Option<&mut Occupant> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.occupant.as_mut()
    }

    pub fn id_at(&self, payload: usize) -> Option<StealableId> {
        let slot = *self.by_payload.get(&payload)?;
        Some(StealableId {
            slot,
            generation: self.slots[slot as usize].generation,
        })
    }

    /// Follow a span whose payload start moved.
    pub fn relocate(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        if let Some(slot) = self.by_payload.remove(&from) {
            if let Some(occupant) = self.slots[slot as usize].occupant.as_mut() {
                occupant.payload = to;
            }
            self.by_payload.insert(to, slot);
        }
    }

    /// Append to the tail of `queue`, leaving any previous queue first.
    pub fn enqueue(&mut self, id: StealableId, queue: StealableQueue) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.unlink(id.slot);
        let q = queue.index();
        let old_tail = self.tails[q];
        if let Some(occupant) = self.slots[id.slot as usize].occupant.as_mut() {
            occupant.queue = Some(queue);
            occupant.prev = old_tail;
            occupant.next = None;
        }
        match old_tail {
            Some(tail) => self.link_next(tail, Some(id.slot)),
            None => self.heads[q] = Some(id.slot),
        }
        self.tails[q] = Some(id.slot);
        self.lens[q] += 1;
        true
    }

    pub fn dequeue(&mut self, id: StealableId) {
        if self.get(id).is_some() {
            self.unlink(id.slot);
        }
    }

    /// First entry, least protected queue first and oldest first within a
    /// queue, that has no reservations and does not veto.
    pub fn find_victim(&self, exclude: Option<ResourceId>) -> Option<StealableId> {
        for queue in StealableQueue::eviction_order() {
            let mut cursor = self.heads[queue.index()];
            while let Some(slot) = cursor {
                let entry = &self.slots[slot as usize];
                let occupant = entry.occupant.as_ref()?;
                if occupant.reservations == 0 && occupant.owner.may_be_stolen(exclude) {
                    return Some(StealableId {
                        slot,
                        generation: entry.generation,
                    });
                }
                cursor = occupant.next;
            }
        }
        None
    }

    pub fn queue_len(&self, queue: StealableQueue) -> usize {
        self.lens[queue.index()]
    }

    pub fn queued(&self) -> usize {
        self.lens.iter().sum()
    }

    pub fn live(&self) -> usize {
        self.by_payload.len()
    }

    /// Remove every entry, queued or not.
    pub fn drain(&mut self) -> Vec<Occupant> {
        let ids: Vec<StealableId> = self
            .by_payload
            .values()
            .map(|&slot| StealableId {
                slot,
                generation: self.slots[slot as usize].generation,
            })
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    fn link_next(&mut self, slot: u32, next: Option<u32>) {
        if let Some(occupant) = self.slots[slot as usize].occupant.as_mut() {
            occupant.next = next;
        }
    }

    fn link_prev(&mut self, slot: u32, prev: Option<u32>) {
        if let Some(occupant) = self.slots[slot as usize].occupant.as_mut() {
            occupant.prev = prev;
        }
    }

    fn unlink(&mut self, slot: u32) {
        let Some(occupant) = self.slots[slot as usize].occupant.as_mut() else {
            return;
        };
        let Some(queue) = occupant.queue.take() else {
            return;
        };
        let (prev, next) = (occupant.prev.take(), occupant.next.take());
        let q = queue.index();
        match prev {
            Some(p) => self.link_next(p, next),
            None => self.heads[q] = next,
        }
        match next {
            Some(n) => self.link_prev(n, prev),
            None => self.tails[q] = prev,
        }
        self.lens[q] -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::stealable::StealReason;

    struct Tagged {
        resource: ResourceId,
        queue: StealableQueue,
    }

    impl Stealable for Tagged {
        fn may_be_stolen(&self, exclude: Option<ResourceId>) -> bool {
            exclude != Some(self.resource)
        }
        fn steal(&mut self, _reason: StealReason) {}
        fn appropriate_queue(&self) -> StealableQueue {
            self.queue
        }
    }

    fn entry(queues: &mut ReclaimQueues, resource: u32, payload: usize) -> StealableId {
        let owner = Box::new(Tagged {
            resource: ResourceId(resource),
            queue: StealableQueue::IdleSampleData,
        });
        queues.insert(owner, payload, 0)
    }

    #[test]
    fn test_victims_are_fifo_within_queue() {
        let mut queues = ReclaimQueues::new();
        let a = entry(&mut queues, 1, 8);
        let b = entry(&mut queues, 2, 64);
        queues.enqueue(a, StealableQueue::IdleSampleData);
        queues.enqueue(b, StealableQueue::IdleSampleData);

        assert_eq!(queues.find_victim(None), Some(a));
        queues.remove(a);
        assert_eq!(queues.find_victim(None), Some(b));
    }

    #[test]
    fn test_least_protected_queue_drains_first() {
        let mut queues = ReclaimQueues::new();
        let protected = entry(&mut queues, 1, 8);
        let idle = entry(&mut queues, 2, 64);
        queues.enqueue(protected, StealableQueue::ActiveSongSampleData);
        queues.enqueue(idle, StealableQueue::IdleWaveTableBandData);

        assert_eq!(queues.find_victim(None), Some(idle));
    }

    #[test]
    fn test_veto_skips_to_next_entry() {
        let mut queues = ReclaimQueues::new();
        let a = entry(&mut queues, 7, 8);
        let b = entry(&mut queues, 8, 64);
        queues.enqueue(a, StealableQueue::IdleSampleData);
        queues.enqueue(b, StealableQueue::IdleSampleData);

        assert_eq!(queues.find_victim(Some(ResourceId(7))), Some(b));
    }

    #[test]
    fn test_stale_handle_after_remove() {
        let mut queues = ReclaimQueues::new();
        let a = entry(&mut queues, 1, 8);
        assert!(queues.remove(a).is_some());
        let b = entry(&mut queues, 2, 8);
        assert_eq!(a.slot, b.slot);
        assert!(queues.get(a).is_none());
        assert!(queues.get(b).is_some());
    }

    #[test]
    fn test_unlink_middle_keeps_list_intact() {
        let mut queues = ReclaimQueues::new();
        let ids: Vec<_> = (0..3).map(|i| entry(&mut queues, i, 8 + i as usize * 64)).collect();
        for &id in &ids {
            queues.enqueue(id, StealableQueue::IdleSampleData);
        }
        queues.dequeue(ids[1]);
        assert_eq!(queues.queue_len(StealableQueue::IdleSampleData), 2);
        queues.remove(ids[0]);
        assert_eq!(queues.find_victim(None), Some(ids[2]));
        queues.remove(ids[2]);
        assert_eq!(queues.queued(), 0);
        assert_eq!(queues.find_victim(None), None);
    }

    #[test]
    fn test_relocate_moves_lookup() {
        let mut queues = ReclaimQueues::new();
        let a = entry(&mut queues, 1, 8);
        queues.relocate(8, 128);
        assert_eq!(queues.id_at(128), Some(a));
        assert_eq!(queues.id_at(8), None);
        assert_eq!(queues.get(a).map(|o| o.payload), Some(128));
    }
}

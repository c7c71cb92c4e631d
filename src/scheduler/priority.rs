//! Keyed priority queue.
//!
//! Lower ratings are served first; equal ratings are served in arrival
//! order. Keys are unique, so a queued entry can be found again to cancel it
//! or make it more urgent.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Priority rating. Lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u32);

impl Priority {
    pub const URGENT: Self = Self(0);
    pub const LOWEST: Self = Self(u32::MAX);
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Position of one entry: rating, then arrival.
#[derive(Debug, Clone, Copy)]
pub struct PrioritizedItem {
    pub priority: Priority,
    pub sequence: u64,
}

impl PartialEq for PrioritizedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for PrioritizedItem {}

impl PartialOrd for PrioritizedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => self.sequence.cmp(&other.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

pub struct PriorityQueue<K> {
    order: BTreeMap<PrioritizedItem, K>,
    positions: HashMap<K, PrioritizedItem>,
    next_sequence: u64,
}

impl<K: Copy + Eq + Hash> PriorityQueue<K> {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            positions: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Queue `key`. Returns false if it is already queued.
    pub fn push(&mut self, key: K, priority: Priority) -> bool {
        if self.positions.contains_key(&key) {
            return false;
        }
        let item = PrioritizedItem {
            priority,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.order.insert(item, key);
        self.positions.insert(key, item);
        true
    }

    /// Raise a queued entry to `priority` if that is more urgent. It keeps
    /// its place among entries that arrived before it.
    pub fn promote(&mut self, key: K, priority: Priority) -> bool {
        let Some(item) = self.positions.get_mut(&key) else {
            return false;
        };
        if priority >= item.priority {
            return false;
        }
        self.order.remove(&*item);
        item.priority = priority;
        self.order.insert(*item, key);
        true
    }

    pub fn pop(&mut self) -> Option<(K, Priority)> {
        let (item, key) = self.order.pop_first()?;
        self.positions.remove(&key);
        Some((key, item.priority))
    }

    pub fn peek(&self) -> Option<(&K, Priority)> {
        self.order
            .first_key_value()
            .map(|(item, key)| (key, item.priority))
    }

    /// Cancel a queued entry.
    pub fn remove(&mut self, key: &K) -> Option<Priority> {
        let item = self.positions.remove(key)?;
        self.order.remove(&item);
        Some(item.priority)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for PriorityQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

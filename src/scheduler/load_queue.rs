//! Backlog of pending physical reads with a single in-flight slot.

use std::hash::Hash;

use super::priority::{Priority, PriorityQueue};

/// Pending reads, served one at a time in priority order.
pub struct LoadQueue<K> {
    pending: PriorityQueue<K>,
    in_flight: Option<K>,
}

impl<K: Copy + Eq + Hash> LoadQueue<K> {
    pub fn new() -> Self {
        Self {
            pending: PriorityQueue::new(),
            in_flight: None,
        }
    }

    /// Queue a read. An already queued key is promoted if `priority` is more
    /// urgent. Returns false if the key is the one in flight.
    pub fn enqueue(&mut self, key: K, priority: Priority) -> bool {
        if self.in_flight == Some(key) {
            return false;
        }
        if !self.pending.push(key, priority) {
            self.pending.promote(key, priority);
        }
        true
    }

    /// Drop a queued read that has not started.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Start the most urgent pending read. `None` while another read is in
    /// flight or when nothing is queued.
    pub fn take_highest_priority(&mut self) -> Option<(K, Priority)> {
        if self.in_flight.is_some() {
            return None;
        }
        let (key, priority) = self.pending.pop()?;
        self.in_flight = Some(key);
        Some((key, priority))
    }

    /// Give up the in-flight read of `key` and queue it again at `priority`.
    pub fn retry(&mut self, key: K, priority: Priority) -> bool {
        self.finish(&key) && self.enqueue(key, priority)
    }

    /// Claim the in-flight slot for a read issued outside the queue,
    /// cancelling any queued request for the same key.
    pub fn begin(&mut self, key: K) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.pending.remove(&key);
        self.in_flight = Some(key);
        true
    }

    /// Release the in-flight slot held by `key`.
    pub fn finish(&mut self, key: &K) -> bool {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub fn in_flight(&self) -> Option<&K> {
        self.in_flight.as_ref()
    }

    pub fn is_queued(&self, key: &K) -> bool {
        self.pending.contains(key)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }
}

impl<K: Copy + Eq + Hash> Default for LoadQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

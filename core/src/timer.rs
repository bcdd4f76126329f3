//! Keyed deadline queue.
//!
//! Callers supply a monotonic `now_ms`; nothing here reads a clock. Scheduling
//! a key that is already pending replaces its deadline, which is exactly the
//! debounce behavior the ring feedback labels need.

use std::collections::HashMap;
use std::hash::Hash;

pub struct TimerQueue<K> {
    deadlines: HashMap<K, u64>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `key` at `now_ms + delay_ms`, replacing any pending deadline for it.
    pub fn schedule(&mut self, key: K, now_ms: u64, delay_ms: u64) {
        self.deadlines.insert(key, now_ms.saturating_add(delay_ms));
    }

    /// Returns true if the key was pending
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// Cancel every pending key matching the predicate. Returns how many were cancelled.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let before = self.deadlines.len();
        self.deadlines.retain(|k, _| !pred(k));
        before - self.deadlines.len()
    }

    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.deadlines.get(key).copied()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every key whose deadline is at or before `now_ms`,
    /// earliest first.
    pub fn due(&mut self, now_ms: u64) -> Vec<K> {
        let mut fired: Vec<(u64, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .map(|(k, at)| (*at, k.clone()))
            .collect();
        fired.sort_by_key(|(at, _)| *at);
        for (_, key) in &fired {
            self.deadlines.remove(key);
        }
        fired.into_iter().map(|(_, k)| k).collect()
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().min().copied()
    }
}

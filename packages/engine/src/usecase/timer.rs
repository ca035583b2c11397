//! Keyed deadlines.
//!
//! Every debounce/expiry in the engine is a deadline stored under a key, so a
//! key has at most one pending expiry: scheduling again replaces it, and
//! cancelling removes it. The event loop sleeps until [`DeadlineMap::next`]
//! and then pops whatever expired.

use std::{collections::HashMap, hash::Hash};

use tokio::time::Instant;

#[derive(Debug)]
pub struct DeadlineMap<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K> Default for DeadlineMap<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> DeadlineMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) the deadline for `key`.
    pub fn schedule(&mut self, key: K, at: Instant) {
        self.deadlines.insert(key, at);
    }

    /// Cancel the deadline for `key`; returns whether one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    /// Earliest pending deadline.
    pub fn next(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// ordered by deadline.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<K> {
        let mut expired: Vec<(K, Instant)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (key.clone(), *at))
            .collect();
        expired.sort_by_key(|(_, at)| *at);

        for (key, _) in &expired {
            self.deadlines.remove(key);
        }
        expired.into_iter().map(|(key, _)| key).collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

//! # Time-Bounded LRU Cache
//!
//! A small in-memory map whose entries expire a fixed time after they were last
//! touched. Reads through [`TtlCache::get`] and writes through
//! [`TtlCache::insert`] both refresh the entry. An optional capacity evicts the
//! least recently touched entry first.
//!
//! The cache is deliberately not synchronised: each owner wraps it in the lock
//! that matches its access pattern.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

struct Entry<V> {
    value: V,
    touched: Instant,
}

/// One serialisable cache entry with its wall-clock expiry.
///
/// Monotonic instants do not survive a restart, so snapshots carry the
/// absolute moment the entry dies instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

/// Map with per-entry time-to-live measured from the last touch.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: Option<usize>,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Unbounded cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: None,
            entries: HashMap::new(),
        }
    }

    /// Cache holding at most `capacity` entries.
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: Some(capacity.max(1)),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Returns the live value for `key` and refreshes its expiry.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    /// Mutable access to the live value for `key`; refreshes its expiry.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let now = Instant::now();
        if self.is_expired(key, now) {
            self.entries.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.touched = now;
        Some(&mut entry.value)
    }

    /// Returns the live value for `key` without touching it.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.touched) < self.ttl)
            .map(|entry| &entry.value)
    }

    /// Stores `value`, replacing any previous entry, and evicts the least
    /// recently touched entry when over capacity.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Number of stored entries, including ones that expired but were not purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<&V> {
        if self.is_expired(key, now) {
            self.entries.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.touched = now;
        Some(&entry.value)
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, Entry { value, touched: now });

        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.touched)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        self.entries.remove(&key);
                    }
                    None => break,
                }
            }
        }
    }

    fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.touched) < ttl);
        before - self.entries.len()
    }

    fn is_expired(&self, key: &K, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| now.saturating_duration_since(entry.touched) >= self.ttl)
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Serialisable copy of every live entry.
    pub fn snapshot(&self) -> Vec<CacheEntry<K, V>> {
        self.snapshot_at(Instant::now(), Utc::now())
    }

    /// Loads entries from a snapshot. Entries whose expiry already passed,
    /// for instance while the process was down, are dropped.
    pub fn restore(&mut self, entries: Vec<CacheEntry<K, V>>) {
        self.restore_at(entries, Instant::now(), Utc::now());
    }

    fn snapshot_at(&self, now: Instant, wall_now: DateTime<Utc>) -> Vec<CacheEntry<K, V>> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| {
                let age = now.saturating_duration_since(entry.touched);
                let remaining = self.ttl.checked_sub(age).filter(|r| !r.is_zero())?;
                let remaining = TimeDelta::from_std(remaining).ok()?;
                Some(CacheEntry {
                    key: key.clone(),
                    value: entry.value.clone(),
                    expires_at: wall_now + remaining,
                })
            })
            .collect()
    }

    fn restore_at(&mut self, entries: Vec<CacheEntry<K, V>>, now: Instant, wall_now: DateTime<Utc>) {
        for entry in entries {
            // Negative deltas fail the conversion.
            let Ok(remaining) = (entry.expires_at - wall_now).to_std() else {
                continue;
            };
            if remaining.is_zero() {
                continue;
            }
            let age = self.ttl.saturating_sub(remaining);
            let touched = now.checked_sub(age).unwrap_or(now);
            self.insert_at(entry.key, entry.value, touched);
        }
    }
}

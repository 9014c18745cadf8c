//! In-memory cache table
//!
//! Stores adapted results keyed by their argument list, together with the
//! timestamps needed to decide freshness. Expired entries are kept until they
//! are overwritten or cleared; they are only skipped by freshness lookups.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use super::key::{ArgsKey, CacheKey};

/// A single stored result
#[derive(Debug)]
struct CacheEntry<D> {
    /// The cached data
    data: Arc<D>,
    /// Argument list the data was fetched for
    args: ArgsKey,
    /// Wall-clock time of the write
    cached_at: DateTime<Utc>,
    /// Monotonic time of the write, only tracked when a TTL is configured
    fetched_at: Option<Instant>,
}

/// Result of reading from the table, including freshness metadata
#[derive(Debug)]
pub struct CachedData<D> {
    /// The cached data
    pub data: Arc<D>,
    /// When the data was written
    pub cached_at: DateTime<Utc>,
    /// Whether the entry has outlived the configured TTL
    pub is_expired: bool,
}

/// Table of cached results for one engine
#[derive(Debug)]
pub struct CacheTable<D> {
    entries: BTreeMap<CacheKey, CacheEntry<D>>,
    ttl: Option<Duration>,
}

impl<D> CacheTable<D> {
    /// Creates an empty table; `ttl` of `None` means entries never expire
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl,
        }
    }

    /// Stores `data` under the key, replacing any previous entry
    pub(crate) fn write(&mut self, args: ArgsKey, data: Arc<D>, now: Instant) {
        let key = args.key.clone();
        let entry = CacheEntry {
            data,
            args,
            cached_at: Utc::now(),
            fetched_at: self.ttl.map(|_| now),
        };
        self.entries.insert(key, entry);
    }

    /// Returns the entry's data if it exists and is still fresh at `now`
    pub fn fresh(&self, key: &CacheKey, now: Instant) -> Option<Arc<D>> {
        let entry = self.entries.get(key)?;
        self.is_valid(entry, now).then(|| entry.data.clone())
    }

    /// Reads an entry regardless of freshness
    ///
    /// Returns `None` if nothing was ever stored for the key. Expired entries
    /// come back with `is_expired = true`.
    pub fn read(&self, key: &CacheKey, now: Instant) -> Option<CachedData<D>> {
        let entry = self.entries.get(key)?;
        Some(CachedData {
            data: entry.data.clone(),
            cached_at: entry.cached_at,
            is_expired: !self.is_valid(entry, now),
        })
    }

    /// Removes one entry, returning whether anything was removed
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every entry
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh entries whose argument at `index` equals `value`, in key order
    pub(crate) fn matching(&self, index: Option<usize>, value: &Value, now: Instant) -> Vec<Arc<D>> {
        self.entries
            .values()
            .filter(|entry| self.is_valid(entry, now) && entry.args.matches(index, value))
            .map(|entry| entry.data.clone())
            .collect()
    }

    fn is_valid(&self, entry: &CacheEntry<D>, now: Instant) -> bool {
        match (self.ttl, entry.fetched_at) {
            (Some(ttl), Some(fetched_at)) => now < fetched_at + ttl,
            _ => true,
        }
    }
}

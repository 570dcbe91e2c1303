//! Keyed timestamp-history store with idle eviction.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Default idle duration after which a key's history is evicted.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

/// A single key's recorded state: the admitted timestamps still inside some
/// recent window, oldest first, plus the access time used for idle eviction.
#[derive(Debug)]
pub struct WindowLog {
    history: VecDeque<i64>,
    last_access: Instant,
}

impl WindowLog {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            last_access: Instant::now(),
        }
    }

    /// Drop every timestamp at or before `window_start`.
    ///
    /// The window is half-open on the old side: a timestamp exactly equal to
    /// `window_start` is expired.
    pub fn trim(&mut self, window_start: i64) {
        while let Some(&oldest) = self.history.front() {
            if oldest <= window_start {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an admitted timestamp.
    pub fn record(&mut self, timestamp: i64) {
        self.history.push_back(timestamp);
    }

    /// Number of timestamps currently held.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mark the log as accessed, deferring idle eviction.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }
}

/// A per-key entry. The mutex scopes the whole decision critical section:
/// trim, capacity check, and conditional append happen under one lock.
pub struct WindowEntry {
    log: Mutex<WindowLog>,
}

impl WindowEntry {
    fn new() -> Self {
        Self {
            log: Mutex::new(WindowLog::new()),
        }
    }

    /// Lock this key's log for the duration of a decision.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, WindowLog> {
        self.log.lock()
    }
}

/// Thread-safe, lazily-populated mapping from key to timestamp history.
///
/// The map itself is sharded (`DashMap`), so callers on different keys
/// proceed in parallel; callers on the same key serialize on the entry's
/// mutex. Idle entries are removed by [`KeyedWindowStore::evict_idle`],
/// which is purely a memory bound: a missing key behaves exactly like one
/// with an empty history.
pub struct KeyedWindowStore {
    entries: DashMap<String, WindowEntry>,
    idle_ttl: Duration,
}

impl KeyedWindowStore {
    /// Create a store with the default idle TTL.
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_IDLE_TTL, None)
    }

    /// Create a store with an explicit idle TTL and optional shard amount.
    ///
    /// `shard_amount` must be a power of two, at least 2. The minimum
    /// collapses the table to near-single-lock behavior for single-consumer
    /// deployments; `None` uses the default sized from available parallelism.
    pub fn with_settings(idle_ttl: Duration, shard_amount: Option<usize>) -> Self {
        let entries = match shard_amount {
            Some(shards) => DashMap::with_shard_amount(shards),
            None => DashMap::new(),
        };
        Self { entries, idle_ttl }
    }

    /// Fetch the entry for `key`, creating an empty one atomically if absent.
    ///
    /// The returned guard holds the shard lock, so eviction of this key is
    /// deferred until the guard (and any per-entry lock taken through it) is
    /// dropped.
    pub(crate) fn entry(&self, key: &str) -> Ref<'_, String, WindowEntry> {
        if let Some(entry) = self.entries.get(key) {
            return entry;
        }
        debug!(key = %key, "Creating window log for new key");
        self.entries
            .entry(key.to_string())
            .or_insert_with(WindowEntry::new)
            .downgrade()
    }

    /// Remove every entry that has not been accessed within the idle TTL.
    ///
    /// Returns the number of evicted keys.
    pub fn evict_idle(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.log.lock().last_access.elapsed() < self.idle_ttl);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle keys");
        }
        evicted
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all per-key state. Primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for KeyedWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Core rate limiter implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{FloodgateError, Result};

use super::rules::RateLimitRules;
use super::store::KeyedWindowStore;

/// Sliding-window-log rate limiter.
///
/// Every admitted request's timestamp is kept per key; a new request is
/// admitted when fewer than the key's quota of timestamps fall inside the
/// trailing window `(current_time - window, current_time]`.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Callers on distinct keys never contend; callers on the same key serialize
/// around that key's own lock, so the quota is never exceeded by concurrent
/// check-then-append races.
///
/// The limiter holds no clock: callers supply `current_time` on every call,
/// and are expected to supply non-decreasing values per key. A timestamp
/// older than one already recorded is still processed by the same trimming
/// logic rather than rejected.
pub struct RateLimiter {
    /// Default quota, window length and per-key overrides, read-only
    rules: RateLimitRules,
    /// Per-key timestamp histories
    store: KeyedWindowStore,
}

impl RateLimiter {
    /// Create a limiter with a default quota and no per-key overrides.
    ///
    /// Fails with [`FloodgateError::InvalidArgument`] if `default_rate` or
    /// `window_secs` is not positive.
    pub fn new(default_rate: i64, window_secs: i64) -> Result<Self> {
        Self::from_rules(RateLimitRules::new(default_rate, window_secs))
    }

    /// Create a limiter with per-key quota overrides.
    ///
    /// Fails with [`FloodgateError::InvalidArgument`] if any quota or the
    /// window is not positive. A non-positive override is a construction
    /// error, never a silent fallback to the default.
    pub fn with_overrides(
        default_rate: i64,
        window_secs: i64,
        overrides: HashMap<String, i64>,
    ) -> Result<Self> {
        let mut rules = RateLimitRules::new(default_rate, window_secs);
        rules.overrides = overrides;
        Self::from_rules(rules)
    }

    /// Create a limiter from validated rules with the default store settings.
    pub fn from_rules(rules: RateLimitRules) -> Result<Self> {
        Self::from_rules_with_store(rules, KeyedWindowStore::new())
    }

    /// Create a limiter from rules and a pre-configured store.
    pub fn from_rules_with_store(rules: RateLimitRules, store: KeyedWindowStore) -> Result<Self> {
        rules.validate()?;
        Ok(Self { rules, store })
    }

    /// Decide whether a request for `key` at `current_time` is admitted.
    ///
    /// Returns `Ok(true)` and records the timestamp when admitted, `Ok(false)`
    /// leaving the history untouched when the quota is exhausted. A rejected
    /// request is a normal outcome, not an error.
    ///
    /// Fails with [`FloodgateError::InvalidArgument`] on a blank key or a
    /// negative timestamp, before any state is mutated.
    pub fn is_allowed(&self, key: &str, current_time: i64) -> Result<bool> {
        if key.trim().is_empty() {
            return Err(FloodgateError::InvalidArgument(
                "key must be non-blank".to_string(),
            ));
        }
        if current_time < 0 {
            return Err(FloodgateError::InvalidArgument(format!(
                "current_time must be non-negative, got {}",
                current_time
            )));
        }

        let effective_rate = self.rules.effective_rate(key);

        trace!(
            key = %key,
            current_time = current_time,
            effective_rate = effective_rate,
            "Checking rate limit"
        );

        // The whole trim/check/append sequence runs under this key's lock.
        let entry = self.store.entry(key);
        let mut log = entry.lock();
        log.touch();
        log.trim(current_time - self.rules.window_secs);

        if (log.len() as i64) < effective_rate {
            log.record(current_time);
            Ok(true)
        } else {
            debug!(
                key = %key,
                current_time = current_time,
                "Rate limit exceeded"
            );
            Ok(false)
        }
    }

    /// The rules this limiter was built with.
    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    /// Remove per-key state that has been idle longer than the store's TTL.
    ///
    /// Returns the number of evicted keys. Eviction never changes decisions:
    /// an evicted key behaves like one that never made a request.
    pub fn evict_idle(&self) -> usize {
        self.store.evict_idle()
    }

    /// Spawn a background task that sweeps idle keys every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.evict_idle();
            }
        })
    }

    /// Get the number of keys with live state.
    pub fn key_count(&self) -> usize {
        self.store.key_count()
    }

    /// Clear all per-key state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhaustion() {
        let limiter = RateLimiter::new(3, 10).unwrap();

        assert!(limiter.is_allowed("u", 1).unwrap());
        assert!(limiter.is_allowed("u", 2).unwrap());
        assert!(limiter.is_allowed("u", 3).unwrap());
        assert!(!limiter.is_allowed("u", 4).unwrap());
    }

    #[test]
    fn test_window_slide_readmits() {
        let limiter = RateLimiter::new(3, 10).unwrap();

        limiter.is_allowed("u", 1).unwrap();
        limiter.is_allowed("u", 2).unwrap();
        limiter.is_allowed("u", 3).unwrap();
        assert!(!limiter.is_allowed("u", 4).unwrap());

        // At t=12 the window starts at 2; the timestamp at 1 is expired,
        // leaving {2, 3} and room for one more.
        assert!(limiter.is_allowed("u", 12).unwrap());
    }

    #[test]
    fn test_key_independence() {
        let limiter = RateLimiter::new(3, 10).unwrap();

        limiter.is_allowed("u", 1).unwrap();
        limiter.is_allowed("u", 2).unwrap();
        limiter.is_allowed("u", 3).unwrap();
        assert!(!limiter.is_allowed("u", 4).unwrap());

        assert!(limiter.is_allowed("u2", 5).unwrap());
    }

    #[test]
    fn test_boundary_timestamp_is_expired() {
        let limiter = RateLimiter::new(1, 10).unwrap();

        assert!(limiter.is_allowed("u", 5).unwrap());
        // Window start at t=15 is 5; the recorded timestamp equals it and
        // must be trimmed, freeing the single slot.
        assert!(limiter.is_allowed("u", 15).unwrap());
    }

    #[test]
    fn test_rejection_has_no_side_effect() {
        let limiter = RateLimiter::new(2, 10).unwrap();

        limiter.is_allowed("u", 1).unwrap();
        limiter.is_allowed("u", 2).unwrap();

        // Repeating the same rejected call keeps rejecting; the rejected
        // timestamps were never recorded.
        assert!(!limiter.is_allowed("u", 3).unwrap());
        assert!(!limiter.is_allowed("u", 3).unwrap());
        assert!(limiter.is_allowed("u", 11).unwrap());
    }

    #[test]
    fn test_burst_in_single_instant() {
        let limiter = RateLimiter::new(10, 5).unwrap();

        for _ in 0..10 {
            assert!(limiter.is_allowed("u", 1).unwrap());
        }
        assert!(!limiter.is_allowed("u", 1).unwrap());

        // At t=7 the window starts at 2; every timestamp at 1 is expired.
        assert!(limiter.is_allowed("u", 7).unwrap());
    }

    #[test]
    fn test_construction_rejects_non_positive_settings() {
        assert!(matches!(
            RateLimiter::new(0, 10),
            Err(FloodgateError::InvalidArgument(_))
        ));
        assert!(matches!(
            RateLimiter::new(3, -1),
            Err(FloodgateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_construction_rejects_non_positive_override() {
        let overrides = HashMap::from([("u".to_string(), -5)]);
        assert!(matches!(
            RateLimiter::with_overrides(3, 10, overrides),
            Err(FloodgateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_override_replaces_default_quota() {
        let overrides = HashMap::from([("vip".to_string(), 5i64)]);
        let limiter = RateLimiter::with_overrides(2, 10, overrides).unwrap();

        for t in 0..5 {
            assert!(limiter.is_allowed("vip", t).unwrap());
        }
        assert!(!limiter.is_allowed("vip", 5).unwrap());

        assert!(limiter.is_allowed("regular", 0).unwrap());
        assert!(limiter.is_allowed("regular", 1).unwrap());
        assert!(!limiter.is_allowed("regular", 2).unwrap());
    }

    #[test]
    fn test_blank_key_rejected() {
        let limiter = RateLimiter::new(3, 10).unwrap();

        assert!(matches!(
            limiter.is_allowed("", 1),
            Err(FloodgateError::InvalidArgument(_))
        ));
        assert!(matches!(
            limiter.is_allowed("   ", 1),
            Err(FloodgateError::InvalidArgument(_))
        ));
        // A failed call leaves the limiter unchanged.
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_negative_timestamp_rejected() {
        let limiter = RateLimiter::new(3, 10).unwrap();

        assert!(matches!(
            limiter.is_allowed("u", -1),
            Err(FloodgateError::InvalidArgument(_))
        ));
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_small_timestamps_do_not_underflow() {
        // current_time < window makes the window start negative; every
        // non-negative timestamp is inside the window.
        let limiter = RateLimiter::new(2, 60).unwrap();

        assert!(limiter.is_allowed("u", 0).unwrap());
        assert!(limiter.is_allowed("u", 1).unwrap());
        assert!(!limiter.is_allowed("u", 2).unwrap());
    }

    #[test]
    fn test_demo_sequence() {
        // 5 requests per 60s, the sequence the demo binary replays.
        let limiter = RateLimiter::new(5, 60).unwrap();

        for t in [100, 110, 115, 120, 125] {
            assert!(limiter.is_allowed("user123", t).unwrap());
        }
        assert!(!limiter.is_allowed("user123", 130).unwrap());
        // 170 - 60 = 110: the timestamp at 100 has expired.
        assert!(limiter.is_allowed("user123", 170).unwrap());
    }

    #[test]
    fn test_concurrent_same_key_never_exceeds_quota() {
        use std::sync::Arc;
        use std::thread;

        let limiter = Arc::new(RateLimiter::new(50, 100).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    let mut admitted = 0usize;
                    for _ in 0..100 {
                        if limiter.is_allowed("shared", 10).unwrap() {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_concurrent_distinct_keys_all_admitted() {
        use std::sync::Arc;
        use std::thread;

        let limiter = Arc::new(RateLimiter::new(100, 100).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    let key = format!("key{}", i);
                    for t in 0..100 {
                        assert!(limiter.is_allowed(&key, t).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.key_count(), 8);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_keys() {
        let store = KeyedWindowStore::with_settings(Duration::from_millis(20), None);
        let limiter = Arc::new(
            RateLimiter::from_rules_with_store(RateLimitRules::new(3, 10), store).unwrap(),
        );

        limiter.is_allowed("u", 1).unwrap();
        assert_eq!(limiter.key_count(), 1);

        let sweeper = limiter.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        sweeper.abort();

        assert_eq!(limiter.key_count(), 0);
        // Eviction is equivalent to the key never having made a request.
        assert!(limiter.is_allowed("u", 2).unwrap());
    }
}

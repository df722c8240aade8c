/// Failed-Attempt Rate Limiting
///
/// Sliding window with a hard lockout. Failures are counted per opaque key
/// (`address:username` for logins, `register:address` for registrations).
/// Reaching `max_attempts` inside the window locks the key for `lockout`.
///
/// Counters live in a sharded concurrent map. Every read-check-write on a
/// key goes through that key's entry, which holds the shard lock for the
/// duration of the update, so concurrent failures on the same key never lose
/// an increment and different keys rarely contend.
///
/// The table is process-local and not persisted; several serving instances
/// each keep their own counts.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::configuration::RateLimitSettings;

/// Thresholds for the limiter
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::seconds(900),
            lockout: Duration::seconds(1800),
        }
    }
}

impl From<&RateLimitSettings> for RateLimitPolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            window: Duration::seconds(settings.window_seconds),
            lockout: Duration::seconds(settings.lockout_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptCounter {
    window_start: DateTime<Utc>,
    attempts: u32,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptCounter {
    fn lock_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    fn lock_lapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until <= now)
    }

    fn window_expired(&self, policy: &RateLimitPolicy, now: DateTime<Utc>) -> bool {
        now > self.window_start + policy.window
    }

    /// Counter that no longer affects any decision and may be dropped
    fn is_stale(&self, policy: &RateLimitPolicy, now: DateTime<Utc>) -> bool {
        if self.locked_until.is_some() {
            self.lock_lapsed(now)
        } else {
            self.window_expired(policy, now)
        }
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    counters: DashMap<String, AttemptCounter>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            counters: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn is_limited(&self, key: &str) -> bool {
        self.is_limited_at(key, Utc::now())
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Utc::now())
    }

    /// Clears all state for `key`
    pub fn record_success(&self, key: &str) {
        self.counters.remove(key);
    }

    pub fn remaining_attempts(&self, key: &str) -> u32 {
        self.remaining_attempts_at(key, Utc::now())
    }

    pub fn seconds_until_unlock(&self, key: &str) -> i64 {
        self.seconds_until_unlock_at(key, Utc::now())
    }

    pub fn is_limited_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.counters.entry(key.to_string()) {
            Entry::Vacant(_) => false,
            Entry::Occupied(entry) => {
                let counter = *entry.get();
                if counter.lock_active(now) {
                    return true;
                }
                if counter.is_stale(&self.policy, now) {
                    entry.remove();
                    return false;
                }
                counter.attempts >= self.policy.max_attempts
            }
        }
    }

    pub fn record_failure_at(&self, key: &str, now: DateTime<Utc>) {
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = self.next_counter(Some(entry.get()), now);
                entry.insert(next);
            }
            Entry::Vacant(entry) => {
                entry.insert(self.next_counter(None, now));
            }
        }
    }

    pub fn remaining_attempts_at(&self, key: &str, now: DateTime<Utc>) -> u32 {
        match self.counters.get(key) {
            Some(counter) if !counter.is_stale(&self.policy, now) => {
                self.policy.max_attempts.saturating_sub(counter.attempts)
            }
            _ => self.policy.max_attempts,
        }
    }

    /// Whole seconds until the lock lifts, rounded up; 0 when not locked.
    pub fn seconds_until_unlock_at(&self, key: &str, now: DateTime<Utc>) -> i64 {
        match self.counters.get(key).and_then(|c| c.locked_until) {
            Some(until) if until > now => {
                let millis = (until - now).num_milliseconds();
                (millis + 999) / 1000
            }
            _ => 0,
        }
    }

    /// Drop counters whose window and lock have both lapsed. Returns how many
    /// were dropped.
    pub fn purge_stale_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_stale(&self.policy, now));
        before.saturating_sub(self.counters.len())
    }

    fn next_counter(&self, current: Option<&AttemptCounter>, now: DateTime<Utc>) -> AttemptCounter {
        let mut next = match current {
            // An active lock is neither extended nor cleared
            Some(counter) if counter.lock_active(now) => {
                return AttemptCounter {
                    attempts: counter.attempts.saturating_add(1),
                    ..*counter
                };
            }
            Some(counter) if !counter.is_stale(&self.policy, now) => AttemptCounter {
                attempts: counter.attempts.saturating_add(1),
                ..*counter
            },
            _ => AttemptCounter {
                window_start: now,
                attempts: 1,
                locked_until: None,
            },
        };

        if next.attempts >= self.policy.max_attempts {
            next.locked_until = Some(now + self.policy.lockout);
        }
        next
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fail_times(limiter: &RateLimiter, key: &str, times: u32, now: DateTime<Utc>) {
        for _ in 0..times {
            limiter.record_failure_at(key, now);
        }
    }

    #[test]
    fn test_unknown_key_is_not_limited() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_limited("10.0.0.1:alice"));
        assert_eq!(limiter.remaining_attempts("10.0.0.1:alice"), 5);
        assert_eq!(limiter.seconds_until_unlock("10.0.0.1:alice"), 0);
    }

    #[test]
    fn test_few_failures_do_not_limit() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 4, now);

        assert!(!limiter.is_limited_at("k", now));
        assert_eq!(limiter.remaining_attempts_at("k", now), 1);
    }

    #[test]
    fn test_max_failures_lock_the_key() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 5, now);

        assert!(limiter.is_limited_at("k", now));
        assert_eq!(limiter.remaining_attempts_at("k", now), 0);
        assert_eq!(limiter.seconds_until_unlock_at("k", now), 1800);
    }

    #[test]
    fn test_lock_lifts_after_lockout_and_count_resets() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 5, now);

        let later = now + Duration::seconds(1801);
        assert!(limiter.is_limited_at("k", now + Duration::seconds(1799)));
        assert!(!limiter.is_limited_at("k", later));
        assert_eq!(limiter.remaining_attempts_at("k", later), 5);
        assert_eq!(limiter.seconds_until_unlock_at("k", later), 0);
    }

    #[test]
    fn test_expired_lock_starts_fresh_window_on_next_failure() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 5, now);

        // Lock lapsed but never re-checked, so the counter is still in the table
        let later = now + Duration::seconds(2000);
        limiter.record_failure_at("k", later);

        assert!(!limiter.is_limited_at("k", later));
        assert_eq!(limiter.remaining_attempts_at("k", later), 4);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 4, now);

        let later = now + Duration::seconds(901);
        assert_eq!(limiter.remaining_attempts_at("k", later), 5);

        limiter.record_failure_at("k", later);
        assert_eq!(limiter.remaining_attempts_at("k", later), 4);
        assert!(!limiter.is_limited_at("k", later));
    }

    #[test]
    fn test_failure_during_lock_does_not_extend_it() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "k", 5, now);

        limiter.record_failure_at("k", now + Duration::seconds(1000));

        assert_eq!(
            limiter.seconds_until_unlock_at("k", now + Duration::seconds(1000)),
            800
        );
    }

    #[test]
    fn test_success_clears_counter() {
        let limiter = RateLimiter::default();
        fail_times(&limiter, "k", 3, Utc::now());

        limiter.record_success("k");

        assert_eq!(limiter.remaining_attempts("k"), 5);
        assert!(!limiter.is_limited("k"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "a", 5, now);

        assert!(limiter.is_limited_at("a", now));
        assert!(!limiter.is_limited_at("b", now));
        assert_eq!(limiter.remaining_attempts_at("b", now), 5);
    }

    #[test]
    fn test_purge_drops_only_stale_counters() {
        let limiter = RateLimiter::default();
        let now = Utc::now();
        fail_times(&limiter, "locked", 5, now);
        fail_times(&limiter, "counting", 2, now);

        assert_eq!(limiter.purge_stale_at(now), 0);
        // Window over, lock still running
        assert_eq!(limiter.purge_stale_at(now + Duration::seconds(1000)), 1);
        assert!(limiter.is_limited_at("locked", now + Duration::seconds(1000)));
        assert_eq!(limiter.purge_stale_at(now + Duration::seconds(1801)), 1);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy {
            max_attempts: 1000,
            ..RateLimitPolicy::default()
        }));
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        limiter.record_failure_at("shared", now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.remaining_attempts_at("shared", now), 600);
    }
}

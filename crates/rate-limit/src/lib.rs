//! Account-health rate-limit tracking.
//!
//! A different concern from client-facing request throttling: this tracks
//! which *upstream* accounts a 429 response told us to back off from, so
//! `AccountSelector` can skip them until the reset deadline passes (spec.md
//! §6, §7).

use std::time::{Duration, Instant};

use mini_moka::sync::Cache;

/// The dimension an upstream rate limit was reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKind {
    /// The account hit a request-count limit.
    Requests,
    /// The account hit a token-count limit.
    Tokens,
}

impl RateLimitKind {
    fn as_str(self) -> &'static str {
        match self {
            RateLimitKind::Requests => "requests",
            RateLimitKind::Tokens => "tokens",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    expires_at: Instant,
    session_hash: String,
}

/// Process-shared, concurrency-safe tracker of which accounts are currently
/// rate-limited (spec.md §5, §6).
#[derive(Clone)]
pub struct RateLimitTracker {
    cache: Cache<String, Entry>,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitTracker {
    /// Creates an empty tracker. Entries are capped so a misbehaving upstream
    /// reporting many distinct accounts can't grow this unboundedly.
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(24 * 3600))
                .build(),
        }
    }

    /// Flags `account_id` as rate-limited for `resets_in`, per spec.md §7's
    /// detection algorithm.
    pub fn mark_rate_limited(&self, account_id: &str, kind: RateLimitKind, session_hash: &str, resets_in: Duration) {
        log::warn!(
            "account {account_id} rate-limited ({}), resets in {resets_in:?}",
            kind.as_str()
        );
        self.cache.insert(
            Self::key(account_id, kind),
            Entry {
                expires_at: Instant::now() + resets_in,
                session_hash: session_hash.to_string(),
            },
        );
    }

    /// Whether `account_id` currently carries any live rate-limit flag.
    pub fn is_rate_limited(&self, account_id: &str) -> bool {
        [RateLimitKind::Requests, RateLimitKind::Tokens]
            .into_iter()
            .any(|kind| self.check(account_id, kind))
    }

    /// Clears the flag for `account_id`/`kind`, e.g. after a successful dispatch.
    pub fn remove_rate_limit(&self, account_id: &str, kind: RateLimitKind) {
        self.cache.invalidate(&Self::key(account_id, kind));
    }

    fn check(&self, account_id: &str, kind: RateLimitKind) -> bool {
        let key = Self::key(account_id, kind);
        match self.cache.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => true,
            Some(_) => {
                self.cache.invalidate(&key);
                false
            }
            None => false,
        }
    }

    fn key(account_id: &str, kind: RateLimitKind) -> String {
        format!("{account_id}:{}", kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_clears_rate_limit() {
        let tracker = RateLimitTracker::new();
        assert!(!tracker.is_rate_limited("acct_1"));

        tracker.mark_rate_limited("acct_1", RateLimitKind::Requests, "hash_1", Duration::from_secs(60));
        assert!(tracker.is_rate_limited("acct_1"));

        tracker.remove_rate_limit("acct_1", RateLimitKind::Requests);
        assert!(!tracker.is_rate_limited("acct_1"));
    }

    #[test]
    fn expired_entries_are_treated_as_cleared() {
        let tracker = RateLimitTracker::new();
        tracker.mark_rate_limited("acct_1", RateLimitKind::Tokens, "hash_1", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tracker.is_rate_limited("acct_1"));
    }

    #[test]
    fn distinct_accounts_do_not_interfere() {
        let tracker = RateLimitTracker::new();
        tracker.mark_rate_limited("acct_1", RateLimitKind::Requests, "hash_1", Duration::from_secs(60));
        assert!(tracker.is_rate_limited("acct_1"));
        assert!(!tracker.is_rate_limited("acct_2"));
    }
}

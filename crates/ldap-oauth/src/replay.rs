//! Spent refresh token ids.
//!
//! A refresh token may be exchanged once. Its id is remembered only until the
//! token's own expiry; past that point the token is rejected as expired
//! anyway, so retention is bounded by the refresh token lifetime.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct UsedTokenSet {
    /// token id -> expiry of the token it belonged to
    used: DashMap<String, DateTime<Utc>>,
}

impl UsedTokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `jti` as spent. Returns `false` if it already was.
    pub fn mark_used(&self, jti: &str, expires_at: DateTime<Utc>) -> bool {
        self.mark_used_at(jti, expires_at, Utc::now())
    }

    pub fn mark_used_at(&self, jti: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.used.entry(jti.to_string()) {
            Entry::Occupied(mut entry) => {
                // A stale entry left for the sweeper no longer blocks reuse
                // checks; the token itself is expired by then.
                if *entry.get() <= now {
                    entry.insert(expires_at);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    pub fn is_used(&self, jti: &str) -> bool {
        self.used.contains_key(jti)
    }

    /// Forget ids whose tokens have expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.used.len();
        self.used.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.used.len())
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

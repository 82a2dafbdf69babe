//! Best-effort duplicate-delivery guard (SPEC_FULL.md §9, "idempotent
//! re-delivery guard").
//!
//! spec.md §4.5 documents platform message-id dedup as a known limitation:
//! "minimum behavior is that re-processing a duplicate produces duplicate
//! expenses — acceptable for v1". This module narrows that gap without
//! adding a durability requirement the spec never asked for: a small
//! in-memory LRU of recently-seen `(provider, platform_message_id)` pairs,
//! reusing [`crate::cache::LruTtlCache`] the same way the teacher's
//! `SeenEventsStore` (`channels/seen_events.rs`) tracks seen Nostr event ids
//! to skip reprocessing on restart — generalized here to an in-memory-only,
//! cross-provider guard instead of a SQLite-backed one, since spec.md
//! explicitly frames this as optional and the cache layer already gives us
//! a bounded, TTL'd set for free.
//!
//! A miss — including every cold start — always falls through to normal
//! processing; this guard only ever prevents reprocessing within its TTL
//! window, it never blocks a message outright.

use std::time::Duration;

use crate::cache::LruTtlCache;

const CAPACITY: usize = 10_000;
const TTL: Duration = Duration::from_secs(6 * 3600);

pub struct MessageDedup {
    seen: LruTtlCache<String, ()>,
}

impl MessageDedup {
    pub fn new() -> Self {
        Self {
            seen: LruTtlCache::new(CAPACITY, Some(TTL)),
        }
    }

    /// Returns `true` if `(provider, message_id)` was already seen within
    /// the TTL window, in which case the caller should skip reprocessing.
    /// Otherwise records it and returns `false`.
    pub async fn already_seen(&self, provider: &str, message_id: &str) -> bool {
        let key = format!("{provider}:{message_id}");
        if self.seen.get(&key).await.is_some() {
            return true;
        }
        self.seen.set(key, ()).await;
        false
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sighting_is_not_a_duplicate() {
        let dedup = MessageDedup::new();
        assert!(!dedup.already_seen("telegram", "msg-1").await);
    }

    #[tokio::test]
    async fn repeat_delivery_is_flagged() {
        let dedup = MessageDedup::new();
        assert!(!dedup.already_seen("telegram", "msg-1").await);
        assert!(dedup.already_seen("telegram", "msg-1").await);
    }

    #[tokio::test]
    async fn same_id_on_different_providers_is_independent() {
        let dedup = MessageDedup::new();
        assert!(!dedup.already_seen("telegram", "1").await);
        assert!(!dedup.already_seen("discord", "1").await);
    }
}

//! Resolved-prompt cache.
//!
//! Keyed by `(user_id, sha256(message))` with a TTL capped at five
//! minutes, plus per-key single-flight so a cold template does not
//! thundering-herd the repository. Template updates invalidate every
//! entry; assignment updates invalidate only the affected user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::router::ResolvedPrompt;

pub const MAX_TTL: Duration = Duration::from_secs(300);

/// Stable hash of a request message for the cache key.
pub fn message_hash(message: &str) -> String {
    let digest = Sha256::digest(message.as_bytes());
    hex::encode(&digest[..16])
}

struct Entry {
    value: ResolvedPrompt,
    expires: Instant,
}

pub struct PromptCache {
    entries: Mutex<HashMap<(String, String), Entry>>,
    /// Per-key single-flight guards.
    inflight: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
}

impl PromptCache {
    /// The TTL is clamped to [`MAX_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn get(&self, user_id: &str, hash: &str) -> Option<ResolvedPrompt> {
        let key = (user_id.to_string(), hash.to_string());
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.expires > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, user_id: &str, hash: &str, value: ResolvedPrompt) {
        let key = (user_id.to_string(), hash.to_string());
        self.entries.lock().insert(
            key,
            Entry {
                value,
                expires: Instant::now() + self.ttl,
            },
        );
    }

    /// Single-flight guard for a key: concurrent resolvers for the same
    /// `(user, message)` serialize on this lock and re-check the cache
    /// after acquiring it.
    pub fn flight_guard(&self, user_id: &str, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = (user_id.to_string(), hash.to_string());
        self.inflight
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Template update: every user's entries go.
    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    /// Assignment update: only the affected user's entries go.
    pub fn invalidate_user(&self, user_id: &str) {
        self.entries.lock().retain(|(uid, _), _| uid != user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::PromptSource;

    fn resolved(content: &str) -> ResolvedPrompt {
        ResolvedPrompt {
            content: content.to_string(),
            template: None,
            source: PromptSource::Default,
        }
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = PromptCache::new(Duration::from_millis(20));
        cache.insert("u1", "h1", resolved("hello"));
        assert_eq!(cache.get("u1", "h1").unwrap().content, "hello");
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("u1", "h1").is_none());
    }

    #[test]
    fn ttl_is_clamped_to_five_minutes() {
        let cache = PromptCache::new(Duration::from_secs(3600));
        assert_eq!(cache.ttl, MAX_TTL);
    }

    #[test]
    fn invalidate_user_is_targeted() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.insert("u1", "h1", resolved("a"));
        cache.insert("u2", "h1", resolved("b"));
        cache.invalidate_user("u1");
        assert!(cache.get("u1", "h1").is_none());
        assert!(cache.get("u2", "h1").is_some());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let cache = PromptCache::new(Duration::from_secs(60));
        cache.insert("u1", "h1", resolved("a"));
        cache.insert("u2", "h2", resolved("b"));
        cache.invalidate_all();
        assert!(cache.get("u1", "h1").is_none());
        assert!(cache.get("u2", "h2").is_none());
    }

    #[test]
    fn message_hash_is_stable_and_distinct() {
        assert_eq!(message_hash("hello"), message_hash("hello"));
        assert_ne!(message_hash("hello"), message_hash("world"));
        assert_eq!(message_hash("x").len(), 32);
    }

    #[tokio::test]
    async fn flight_guard_serializes_same_key() {
        let cache = Arc::new(PromptCache::new(Duration::from_secs(60)));
        let guard = cache.flight_guard("u1", "h1");
        let held = guard.clone().lock_owned().await;

        let cache2 = cache.clone();
        let contender = tokio::spawn(async move {
            let g = cache2.flight_guard("u1", "h1");
            let _held = g.lock().await;
        });

        // The contender cannot finish while we hold the guard.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());
        drop(held);
        contender.await.unwrap();
    }
}

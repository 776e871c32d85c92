//! Response Cache
//!
//! In-memory cache of completed upstream responses, keyed on a fingerprint
//! of the prompt and the context it was sent with. A hit skips the
//! upstream call entirely and is recorded as a zero-cost usage event.
//!
//! The cache is process-local and best-effort; restarting the service
//! just means the next identical prompt pays for one upstream call.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::completion::Completion;
use latchkey_core::{sha256_hex, PlanTier};

/// Point-in-time cache occupancy, reported on the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResponseCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
}

struct CacheEntry {
    completion: Completion,
    expires_at: Instant,
}

/// TTL'd completion cache.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Cache key over everything that affects the response: prompt, the
    /// fingerprints of the context sent with it, and the model tier.
    pub fn key(prompt: &str, context_fingerprints: &[String], tier: PlanTier) -> String {
        let mut material = String::with_capacity(prompt.len() + 64);
        material.push_str(tier.as_str());
        material.push('\n');
        material.push_str(prompt);
        for fp in context_fingerprints {
            material.push('\n');
            material.push_str(fp);
        }
        sha256_hex(material.as_bytes())
    }

    pub fn get(&self, key: &str) -> Option<Completion> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.completion.clone())
    }

    pub fn put(&self, key: String, completion: Completion) {
        if self.entries.len() >= self.capacity {
            self.purge_expired();
        }
        // Still full after purging live entries only: skip rather than
        // evict something that may be about to hit.
        if self.entries.len() >= self.capacity {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                completion,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached response. Returns the number removed.
    pub fn clear(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion() -> Completion {
        Completion {
            content: "fn main() {}".into(),
            model: "claude-3-5-haiku-latest".into(),
            input_tokens: 10,
            output_tokens: 5,
        }
    }

    #[test]
    fn hit_after_put() {
        let cache = ResponseCache::new(Duration::from_secs(60), 16);
        let key = ResponseCache::key("write main", &[], PlanTier::Trial);

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), completion());
        assert_eq!(cache.get(&key).unwrap().content, "fn main() {}");
    }

    #[test]
    fn key_varies_with_context_and_tier() {
        let base = ResponseCache::key("prompt", &[], PlanTier::Trial);
        let with_ctx = ResponseCache::key("prompt", &["abc".into()], PlanTier::Trial);
        let plus = ResponseCache::key("prompt", &[], PlanTier::Plus);

        assert_ne!(base, with_ctx);
        assert_ne!(base, plus);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = ResponseCache::new(Duration::from_millis(0), 16);
        let key = ResponseCache::key("prompt", &[], PlanTier::Trial);
        cache.put(key.clone(), completion());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_skips_inserts() {
        let cache = ResponseCache::new(Duration::from_secs(60), 1);
        cache.put("a".into(), completion());
        cache.put("b".into(), completion());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ResponseCache::new(Duration::from_secs(60), 16);
        cache.put("a".into(), completion());
        cache.put("b".into(), completion());

        assert_eq!(cache.stats().entries, 2);
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}

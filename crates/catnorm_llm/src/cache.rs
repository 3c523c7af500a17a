//! Content-addressed response cache (§4.4 "Caching").
//!
//! Keyed on `(provider, model, prompt-hash)`, TTL-bounded, honored
//! read-through by [`crate::gateway::LlmGateway`]. Optional: a gateway
//! built without a cache always calls through.

use crate::provider::CompletionResult;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider: String,
    model: String,
    prompt_hash: u64,
}

struct Entry {
    result: CompletionResult,
    expires_at: Instant,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn hash_prompt(prompt: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        prompt.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, provider: &str, model: &str, prompt_hash: u64) -> Option<CompletionResult> {
        let key = CacheKey {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_hash,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, provider: &str, model: &str, prompt_hash: u64, result: CompletionResult) {
        let key = CacheKey {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_hash,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            Entry {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    #[test]
    fn hit_after_put() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let hash = ResponseCache::hash_prompt("normalize: болт м6");
        cache.put("generic", "generic-chat-v1", hash, MockProvider::success("cached"));
        let hit = cache.get("generic", "generic-chat-v1", hash);
        assert_eq!(hit.unwrap().text, "cached");
    }

    #[test]
    fn miss_for_unknown_key() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        assert!(cache.get("generic", "generic-chat-v1", 42).is_none());
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache = ResponseCache::new(Duration::from_millis(0));
        let hash = ResponseCache::hash_prompt("prompt");
        cache.put("generic", "generic-chat-v1", hash, MockProvider::success("stale"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("generic", "generic-chat-v1", hash).is_none());
    }
}

//! Memoization for expensive stage calls.
//!
//! Stages receive a [`StageCache`] at construction instead of keeping a
//! process-wide map. [`BoundedCache`] evicts least-recently-used entries once
//! it reaches capacity and can expire entries after a TTL.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Cache key for a piece of text: its SHA256 hex digest
pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Get/put collaborator injected into stages
pub trait StageCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: String, value: String);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl StageCache for NoopCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn put(&self, _key: String, _value: String) {}

    fn len(&self) -> usize {
        0
    }
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Keys from least to most recently used
    recency: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if let Some(k) = self.recency.remove(pos) {
                self.recency.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.recency.retain(|k| k != key);
    }
}

/// LRU cache with a fixed capacity and optional TTL
pub struct BoundedCache {
    capacity: usize,
    ttl: Option<Duration>,
    state: Mutex<CacheState>,
}

impl BoundedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ttl: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl
            .map(|ttl| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

impl StageCache for BoundedCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) => self.is_expired(entry),
            None => return None,
        };
        if expired {
            state.remove(key);
            return None;
        }

        state.touch(key);
        state.entries.get(key).map(|e| e.value.clone())
    }

    fn put(&self, key: String, value: String) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state.lock();
        if state.entries.contains_key(&key) {
            state.touch(&key);
        } else {
            while state.entries.len() >= self.capacity {
                match state.recency.pop_front() {
                    Some(oldest) => {
                        state.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            state.recency.push_back(key.clone());
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_sha256_hex() {
        assert_eq!(
            cache_key("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(cache_key("a").len(), 64);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = BoundedCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());

        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get("a"), Some("1".to_string()));

        cache.put("c".into(), "3".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("c"), Some("3".to_string()));
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache = BoundedCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("a".into(), "2".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some("2".to_string()));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = BoundedCache::new(4).with_ttl(Duration::from_millis(20));
        cache.put("k".into(), "v".into());
        assert_eq!(cache.get("k"), Some("v".to_string()));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_and_noop() {
        let cache = BoundedCache::new(0);
        cache.put("k".into(), "v".into());
        assert!(cache.is_empty());

        let noop = NoopCache;
        noop.put("k".into(), "v".into());
        assert_eq!(noop.get("k"), None);
    }
}

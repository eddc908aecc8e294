use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::http::ResponseSnapshot;
use crate::{config_seconds, ReconConfig};

struct CacheEntry {
    snapshot: ResponseSnapshot,
    inserted_at: Instant,
}

/// TTL-bounded response cache keyed by the exact request URL.
///
/// When full, an insert evicts the single entry with the oldest insertion
/// time (not the least recently read). Expired entries are dropped lazily by
/// `get`. Every operation takes the same lock, so eviction and insertion are
/// never observed half done.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            ttl,
        }
    }

    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(config.cache.max_size, config_seconds(config.cache.ttl))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<ResponseSnapshot> {
        let mut entries = self.lock();
        let fresh = entries.get(key)?.inserted_at.elapsed() < self.ttl;
        if fresh {
            entries.get(key).map(|entry| entry.snapshot.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    /// Inserts or overwrites `key`, resetting its age. A cache with
    /// `max_size == 0` stores nothing.
    pub fn set(&self, key: impl Into<String>, snapshot: ResponseSnapshot) {
        if self.max_size == 0 {
            return;
        }

        let mut entries = self.lock();
        if entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.into(),
            CacheEntry {
                snapshot,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Keys whose TTL has run out. Does not remove them.
    pub fn get_expired_entries(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    fn snapshot(body: &str) -> ResponseSnapshot {
        ResponseSnapshot {
            status: 200,
            headers: BTreeMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_set_then_get() {
        let cache = ResponseCache::new(2, Duration::from_secs(1));
        cache.set("test_url", snapshot("test"));
        assert_eq!(cache.get("test_url"), Some(snapshot("test")));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_expired_entry_is_listed_then_dropped() {
        let cache = ResponseCache::new(2, Duration::from_millis(200));
        cache.set("test_url", snapshot("test"));
        assert!(cache.get_expired_entries().is_empty());

        thread::sleep(Duration::from_millis(250));

        assert_eq!(cache.get_expired_entries(), vec!["test_url".to_string()]);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get("test_url"), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_full_cache_evicts_earliest_insert() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("url1", snapshot("1"));
        thread::sleep(Duration::from_millis(2));
        cache.set("url2", snapshot("2"));
        thread::sleep(Duration::from_millis(2));
        cache.set("url3", snapshot("3"));

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("url1"), None);
        assert!(cache.get("url2").is_some());
        assert!(cache.get("url3").is_some());
    }

    #[test]
    fn test_reads_do_not_protect_from_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("url1", snapshot("1"));
        thread::sleep(Duration::from_millis(2));
        cache.set("url2", snapshot("2"));
        cache.get("url1");
        thread::sleep(Duration::from_millis(2));
        cache.set("url3", snapshot("3"));

        assert_eq!(cache.get("url1"), None);
        assert!(cache.get("url2").is_some());
    }

    #[test]
    fn test_overwrite_resets_age() {
        let cache = ResponseCache::new(5, Duration::from_millis(200));
        cache.set("k", snapshot("old"));
        thread::sleep(Duration::from_millis(150));
        cache.set("k", snapshot("new"));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(cache.get("k"), Some(snapshot("new")));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_clear_and_zero_capacity() {
        let cache = ResponseCache::new(3, Duration::from_secs(60));
        cache.set("a", snapshot("a"));
        cache.set("b", snapshot("b"));
        cache.clear();
        assert_eq!(cache.size(), 0);

        let disabled = ResponseCache::new(0, Duration::from_secs(60));
        disabled.set("a", snapshot("a"));
        assert_eq!(disabled.size(), 0);
    }

    #[test]
    fn test_concurrent_writers_never_exceed_bound() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..50 {
                        cache.set(format!("{}-{}", t, i), snapshot("x"));
                        assert!(cache.size() <= 4);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn test_from_config() {
        let cache = ResponseCache::from_config(&ReconConfig::default());
        assert_eq!(cache.max_size, 1000);
        assert_eq!(cache.ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_from_config_with_huge_ttl_saturates() {
        let config: ReconConfig = serde_json::from_str(r#"{"cache": {"ttl": 1e30}}"#).unwrap();
        let cache = ResponseCache::from_config(&config);
        assert_eq!(cache.ttl, Duration::MAX);

        cache.set("k", snapshot("v"));
        assert!(cache.get("k").is_some());
        assert!(cache.get_expired_entries().is_empty());
    }
}

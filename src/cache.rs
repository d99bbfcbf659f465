use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ENTRY_VERSION: u32 = 1;

/// One cached summary, persisted as a JSON blob under its URL-hash key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub summary_text: String,
    pub created_at_ms: u64,
    pub version: u32,
    pub access_count: u64,
    pub last_accessed_ms: u64,
    pub size_bytes: usize,
}

/// Tunables that the `updateCacheSettings` command can change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Entry lifetime in milliseconds; 0 means entries never expire.
    pub ttl_ms: u64,
    /// When set, reads bump access bookkeeping for future eviction decisions.
    /// Never changes whether a read within TTL succeeds.
    pub priority_mode: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 24 * 60 * 60 * 1000,
            priority_mode: false,
        }
    }
}

/// Storage backend for the cache: an atomic-per-key string blob store.
///
/// Implementations may fail; the cache absorbs every storage error.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> std::io::Result<Option<String>>;
    fn save(&self, key: &str, blob: &str) -> std::io::Result<()>;
    fn remove(&self, key: &str) -> std::io::Result<()>;
    fn clear(&self) -> std::io::Result<()>;
}

/// Default in-process store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> std::io::Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> std::io::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> std::io::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn clear(&self) -> std::io::Result<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

/// TTL-based summary cache keyed by a deterministic hash of the URL.
///
/// The cache is a performance optimization, never required for correctness:
/// storage failures on read or write fail soft (None / false) and surface
/// only through logging.
pub struct SummaryCache {
    store: Box<dyn CacheStore>,
    settings: Mutex<CacheSettings>,
}

impl SummaryCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_store(Box::new(MemoryStore::default()), settings)
    }

    pub fn with_store(store: Box<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self {
            store,
            settings: Mutex::new(settings),
        }
    }

    /// Deterministic, collision-resistant key for a URL. Stable across
    /// process restarts so cache hits survive a worker reload.
    pub fn key_for(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("summary-{:x}", digest)
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.get_at(url, now_ms())
    }

    /// Looks up a summary, treating entries past TTL as absent and purging
    /// them as a side effect of the failed read.
    pub fn get_at(&self, url: &str, now_ms: u64) -> Option<String> {
        let key = Self::key_for(url);
        let blob = match self.store.load(&key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(url, error = %err, "cache read failed");
                return None;
            }
        };

        let mut entry: CacheEntry = match serde_json::from_str(&blob) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(url, error = %err, "discarding unreadable cache entry");
                self.purge(&key, url);
                return None;
            }
        };

        let settings = *self.settings.lock().unwrap();
        let expired = settings.ttl_ms > 0
            && now_ms.saturating_sub(entry.created_at_ms) >= settings.ttl_ms;
        if expired {
            self.purge(&key, url);
            return None;
        }

        if settings.priority_mode {
            entry.access_count += 1;
            entry.last_accessed_ms = now_ms;
            match serde_json::to_string(&entry) {
                Ok(blob) => {
                    if let Err(err) = self.store.save(&key, &blob) {
                        tracing::warn!(url, error = %err, "cache bookkeeping write failed");
                    }
                }
                Err(err) => tracing::warn!(url, error = %err, "cache entry serialization failed"),
            }
        }

        Some(entry.summary_text)
    }

    pub fn put(&self, url: &str, summary: &str) -> bool {
        self.put_at(url, summary, now_ms())
    }

    pub fn put_at(&self, url: &str, summary: &str, now_ms: u64) -> bool {
        let entry = CacheEntry {
            url: url.to_string(),
            summary_text: summary.to_string(),
            created_at_ms: now_ms,
            version: ENTRY_VERSION,
            access_count: 0,
            last_accessed_ms: now_ms,
            size_bytes: summary.len(),
        };
        let blob = match serde_json::to_string(&entry) {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!(url, error = %err, "cache entry serialization failed");
                return false;
            }
        };
        match self.store.save(&Self::key_for(url), &blob) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(url, error = %err, "cache write failed");
                false
            }
        }
    }

    pub fn invalidate_all(&self) -> bool {
        match self.store.clear() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "cache clear failed");
                false
            }
        }
    }

    pub fn update_settings(&self, settings: CacheSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    fn purge(&self, key: &str, url: &str) {
        if let Err(err) = self.store.remove(key) {
            tracing::warn!(url, error = %err, "cache purge failed");
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn load(&self, _key: &str) -> std::io::Result<Option<String>> {
            Err(std::io::Error::other("storage offline"))
        }
        fn save(&self, _key: &str, _blob: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("storage offline"))
        }
        fn remove(&self, _key: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("storage offline"))
        }
        fn clear(&self) -> std::io::Result<()> {
            Err(std::io::Error::other("storage offline"))
        }
    }

    fn cache(ttl_ms: u64) -> SummaryCache {
        SummaryCache::new(CacheSettings {
            ttl_ms,
            priority_mode: false,
        })
    }

    #[test]
    fn round_trip() {
        let cache = cache(60_000);
        assert!(cache.put_at("https://example.com/a", "X", 1_000));
        assert_eq!(
            cache.get_at("https://example.com/a", 1_001),
            Some("X".to_string())
        );
    }

    #[test]
    fn expired_entries_are_purged_and_stay_gone() {
        let cache = cache(10_000);
        cache.put_at("https://example.com/a", "X", 1_000);
        assert_eq!(cache.get_at("https://example.com/a", 11_000), None);
        // The failed read evicted the entry; it must not resurrect.
        assert_eq!(cache.get_at("https://example.com/a", 1_001), None);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = cache(0);
        cache.put_at("https://example.com/a", "X", 1_000);
        assert_eq!(
            cache.get_at("https://example.com/a", u64::MAX),
            Some("X".to_string())
        );
    }

    #[test]
    fn keys_are_deterministic_and_distinct() {
        assert_eq!(
            SummaryCache::key_for("https://example.com/a"),
            SummaryCache::key_for("https://example.com/a")
        );
        assert_ne!(
            SummaryCache::key_for("https://example.com/a"),
            SummaryCache::key_for("https://example.com/b")
        );
        assert!(SummaryCache::key_for("https://example.com/a").starts_with("summary-"));
    }

    #[test]
    fn priority_mode_only_affects_bookkeeping() {
        let cache = SummaryCache::new(CacheSettings {
            ttl_ms: 60_000,
            priority_mode: true,
        });
        cache.put_at("https://example.com/a", "X", 1_000);
        assert_eq!(
            cache.get_at("https://example.com/a", 2_000),
            Some("X".to_string())
        );
        let blob = cache
            .store
            .load(&SummaryCache::key_for("https://example.com/a"))
            .unwrap()
            .unwrap();
        let entry: CacheEntry = serde_json::from_str(&blob).unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed_ms, 2_000);
    }

    #[test]
    fn storage_failures_fail_soft() {
        let cache = SummaryCache::with_store(Box::new(BrokenStore), CacheSettings::default());
        assert_eq!(cache.get("https://example.com/a"), None);
        assert!(!cache.put("https://example.com/a", "X"));
        assert!(!cache.invalidate_all());
    }

    #[test]
    fn settings_update_applies_to_reads() {
        let cache = cache(0);
        cache.put_at("https://example.com/a", "X", 1_000);
        cache.update_settings(CacheSettings {
            ttl_ms: 5_000,
            priority_mode: false,
        });
        assert_eq!(cache.get_at("https://example.com/a", 20_000), None);
    }
}

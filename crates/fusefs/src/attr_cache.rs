//! Positive metadata cache for `getattr` probes.
//!
//! Backed by a TTL cache so repeated `stat` calls within the window skip the
//! backend round trip. Sizes are decrypted sizes; a flush re-caches the
//! plaintext length immediately so a close-then-stat sequence is accurate.

use std::time::{Duration, SystemTime};

use moka::sync::Cache;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAttr {
    /// Size after decryption.
    pub size: u64,
    pub mtime: SystemTime,
    pub is_dir: bool,
}

/// Key → attribute cache with time-based expiry.
pub struct AttrCache {
    entries: Cache<String, CachedAttr>,
}

impl AttrCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedAttr> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: &str, attr: CachedAttr) {
        self.entries.insert(key.to_string(), attr);
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }
}

impl Default for AttrCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(size: u64) -> CachedAttr {
        CachedAttr {
            size,
            mtime: SystemTime::now(),
            is_dir: false,
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = AttrCache::new(Duration::from_secs(30));
        cache.insert("k", attr(7));
        assert_eq!(cache.get("k").unwrap().size, 7);
    }

    #[test]
    fn entries_expire() {
        let cache = AttrCache::new(Duration::from_millis(50));
        cache.insert("k", attr(7));
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn invalidation_forces_a_miss() {
        let cache = AttrCache::new(Duration::from_secs(30));
        cache.insert("k", attr(7));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn reinsert_after_invalidation_updates_size() {
        let cache = AttrCache::new(Duration::from_secs(30));
        cache.insert("k", attr(7));
        cache.invalidate("k");
        cache.insert("k", attr(42));
        assert_eq!(cache.get("k").unwrap().size, 42);
    }
}

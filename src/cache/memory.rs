//! Process-lifetime LRU of decoded images.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::key::CacheKey;
use crate::raster::DecodedImage;

pub const DEFAULT_MEM_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    entries: LruCache<CacheKey, DecodedImage>,
    hits: u64,
    misses: u64,
}

/// Bounded map from key to image. Every operation takes the one lock, so
/// promotion on `get` and eviction on `put` are atomic for concurrent callers.
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    /// `capacity` below one is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns a copy and marks the entry most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key).cloned() {
            Some(img) => {
                inner.hits += 1;
                trace!(key = ?key, "memory cache hit");
                Some(img)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces, evicting the least recently used entry on overflow.
    pub fn put(&self, key: CacheKey, image: DecodedImage) {
        let mut inner = self.inner.lock();
        if let Some((evicted, _)) = inner.entries.push(key, image) {
            if evicted != key {
                trace!(key = ?evicted, "memory cache evicted");
            }
        }
    }

    /// Like `get` but leaves recency and the hit/miss counters alone.
    pub fn peek(&self, key: &CacheKey) -> Option<DecodedImage> {
        self.inner.lock().entries.peek(key).cloned()
    }

    /// Membership test without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let inner = self.inner.lock();
        MemoryCacheStats {
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEM_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{ImageOrigin, RequestedSide};
    use proptest::prelude::*;
    use std::path::Path;

    fn key(n: u64) -> CacheKey {
        CacheKey::from_parts(Path::new("/mem/test"), 0, n, RequestedSide::Bounded(64))
    }

    fn img(shade: u8) -> DecodedImage {
        DecodedImage::solid_rgb(2, 2, [shade; 3], ImageOrigin::Decoded)
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(MemoryCache::new(0).capacity(), 1);
        assert_eq!(MemoryCache::default().capacity(), 512);
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = MemoryCache::new(3);
        for n in 0..4 {
            cache.put(key(n), img(n as u8));
        }
        assert!(!cache.contains(&key(0)));
        for n in 1..4 {
            assert!(cache.contains(&key(n)));
        }
    }

    #[test]
    fn get_promotes_entry() {
        let cache = MemoryCache::new(2);
        cache.put(key(1), img(1));
        cache.put(key(2), img(2));
        assert_eq!(cache.get(&key(1)), Some(img(1)));
        cache.put(key(3), img(3));
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn put_replaces_existing_value() {
        let cache = MemoryCache::new(2);
        cache.put(key(1), img(1));
        cache.put(key(1), img(9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)), Some(img(9)));
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = MemoryCache::new(4);
        cache.put(key(1), img(1));
        let _ = cache.get(&key(1));
        let _ = cache.get(&key(2));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn peek_neither_counts_nor_promotes() {
        let cache = MemoryCache::new(2);
        cache.put(key(1), img(1));
        cache.put(key(2), img(2));
        assert_eq!(cache.peek(&key(1)), Some(img(1)));
        assert_eq!(cache.peek(&key(7)), None);
        cache.put(key(3), img(3));
        assert!(!cache.contains(&key(1)));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    proptest! {
        #[test]
        fn keeps_only_the_most_recent_capacity_keys(capacity in 1usize..16, extra in 1u64..16) {
            let cache = MemoryCache::new(capacity);
            let total = capacity as u64 + extra;
            for n in 0..total {
                cache.put(key(n), img(0));
            }
            prop_assert_eq!(cache.len(), capacity);
            for n in 0..total {
                let recent = n >= total - capacity as u64;
                prop_assert_eq!(cache.contains(&key(n)), recent);
            }
        }
    }
}

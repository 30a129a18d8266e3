//! Provides a thread safe wrapper around an [LRUCache](crate::lru::LRUCache).
//!
//! All operations lock an internal mutex. The critical sections only manipulate the index and the
//! recency list of the cache, no IO or other expensive work is ever performed while the lock is
//! held. Values are handed out as clones, which is cheap for [ByteView](crate::byteview::ByteView)
//! as it only increments a reference count.
//!
//! Note that the underlying cache is only created once the first value is written, so that
//! groups which are declared but never used don't allocate anything.
//!
//! # Example
//!
//! ```
//! # use peercache::lru::cache::SharedCache;
//! # use peercache::byteview::ByteView;
//! let cache = SharedCache::new("example", 1024);
//!
//! assert_eq!(cache.get("Alice"), None);
//! cache.add("Alice", ByteView::from("111"));
//! assert_eq!(cache.get("Alice").unwrap().as_string(), "111");
//! ```
use std::sync::Mutex;

use crate::lru::{ByteSize, LRUCache};

/// Wraps an **LRUCache** so that it can be shared among many tasks.
pub struct SharedCache<V: ByteSize + Clone> {
    name: String,
    max_memory: i64,
    lru: Mutex<Option<LRUCache<V>>>,
}

/// Contains a snapshot of the metrics of a shared cache.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheMetrics {
    /// Contains the number of entries in the cache.
    pub entries: usize,

    /// Contains the number of bytes accounted for all keys and values.
    pub allocated_memory: i64,

    /// Contains the number of lookups since the cache was created.
    pub reads: usize,

    /// Contains the number of lookups which found a value.
    pub hits: usize,

    /// Contains the hit rate in percent.
    pub hit_rate: f32,
}

impl<V: ByteSize + Clone + 'static> SharedCache<V> {
    /// Creates a new cache with the given name and memory limit.
    ///
    /// The name is only used when logging evictions. A **max_memory** of zero or less creates an
    /// unbounded cache.
    pub fn new(name: impl Into<String>, max_memory: i64) -> Self {
        SharedCache {
            name: name.into(),
            max_memory,
            lru: Mutex::new(None),
        }
    }

    /// Stores the given value for the given key.
    pub fn add(&self, key: &str, value: V) {
        let mut lru = self.lru.lock().unwrap();
        lru.get_or_insert_with(|| {
            let name = self.name.clone();
            LRUCache::with_callback(self.max_memory, move |key: &str, _: &V| {
                log::debug!("Evicted {} from {}", key, name);
            })
        })
        .put(key.to_owned(), value);
    }

    /// Returns a copy of the value stored for the given key or **None** if no value is present.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut lru = self.lru.lock().unwrap();
        lru.as_mut()?.get(key).cloned()
    }

    /// Removes the value stored for the given key.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut lru = self.lru.lock().unwrap();
        lru.as_mut()?.remove(key)
    }

    /// Returns the memory limit of this cache.
    pub fn max_memory(&self) -> i64 {
        self.max_memory
    }

    /// Determines if the underlying cache has already been created.
    pub fn is_initialized(&self) -> bool {
        self.lru.lock().unwrap().is_some()
    }

    /// Provides a snapshot of the current metrics.
    ///
    /// A cache which has never been written to reports all metrics as zero.
    pub fn metrics(&self) -> CacheMetrics {
        match self.lru.lock().unwrap().as_ref() {
            Some(lru) => CacheMetrics {
                entries: lru.len(),
                allocated_memory: lru.allocated_memory(),
                reads: lru.reads(),
                hits: lru.hits(),
                hit_rate: lru.hit_rate(),
            },
            None => CacheMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::lru::cache::SharedCache;
    use std::sync::Arc;

    #[test]
    fn cache_is_created_lazily() {
        let cache = SharedCache::<ByteView>::new("test", 64);

        // Reads don't create the underlying cache...
        assert_eq!(cache.get("A"), None);
        assert_eq!(cache.remove("A"), None);
        assert_eq!(cache.is_initialized(), false);
        assert_eq!(cache.metrics().entries, 0);

        // ...but the first write does.
        cache.add("A", ByteView::from("1"));
        assert_eq!(cache.is_initialized(), true);
        assert_eq!(cache.metrics().entries, 1);
        assert_eq!(cache.metrics().allocated_memory, 2);
    }

    #[test]
    fn memory_limit_is_applied() {
        let cache = SharedCache::new("test", 6);
        cache.add("A", ByteView::from("12"));
        cache.add("B", ByteView::from("12"));
        cache.add("C", ByteView::from("12"));

        assert_eq!(cache.get("A"), None);
        assert_eq!(cache.get("B").unwrap().as_string(), "12");
        assert_eq!(cache.get("C").unwrap().as_string(), "12");
        assert_eq!(cache.max_memory(), 6);

        let metrics = cache.metrics();
        assert_eq!(metrics.reads, 3);
        assert_eq!(metrics.hits, 2);
    }

    #[test]
    fn cache_can_be_shared_among_threads() {
        let cache = Arc::new(SharedCache::new("test", 0));
        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.add(&format!("{}-{}", thread, i), ByteView::from("X"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.metrics().entries, 400);
    }
}

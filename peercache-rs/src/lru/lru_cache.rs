use fnv::FnvHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of memory in bytes which is accounted for a value.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a string, this would
    /// be the bytes of its contents and might discard the fields allocated on the stack
    /// used to store the length and capacity as well as the pointer itself.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Represents the callback which is invoked for each entry which is evicted due to memory
/// pressure.
///
/// Note that the callback is invoked while the cache is being modified, therefore it must not
/// try to access the cache itself.
pub type EvictionCallback<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a size constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, once
/// the accounted memory (the length of each key plus the size of its value) grows beyond
/// **max_memory**, old (least recently used) entries will be evicted - hence the name LRU cache.
/// A **max_memory** of zero (or less) disables this check, so that the cache grows unbounded.
///
/// Internally all entries live in a single vector. The recency order is maintained as a doubly
/// linked list of indices into this vector, so that promoting, inserting and evicting an entry
/// are all O(1) operations without any pointer juggling.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// // Specifies a cache which can store up to 16 bytes of keys and values...
/// let mut lru = LRUCache::new(16);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.put("Foo1".to_owned(), "X".repeat(6));
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.put("Foo2".to_owned(), "X".repeat(8));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    max_memory: i64,
    allocated_memory: i64,
    entries: Vec<Entry<V>>,
    index: FnvHashMap<String, usize>,
    newest: Option<usize>,
    oldest: Option<usize>,
    on_evicted: Option<EvictionCallback<V>>,
    reads: usize,
    hits: usize,
    writes: usize,
}

struct Entry<V> {
    key: String,
    value: V,
    mem_size: i64,
    newer: Option<usize>,
    older: Option<usize>,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which keeps entries until they occupy more than **max_memory** bytes.
    ///
    /// Passing zero or a negative value creates an unbounded cache.
    pub fn new(max_memory: i64) -> Self {
        LRUCache {
            max_memory,
            allocated_memory: 0,
            entries: Vec::new(),
            index: FnvHashMap::default(),
            newest: None,
            oldest: None,
            on_evicted: None,
            reads: 0,
            hits: 0,
            writes: 0,
        }
    }

    /// Creates a new cache just like [new](LRUCache::new) which also invokes the given callback
    /// for each entry which is evicted.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut lru = LRUCache::with_callback(6, move |key: &str, _: &String| {
    ///     log.lock().unwrap().push(key.to_owned());
    /// });
    ///
    /// lru.put("A".to_owned(), "123".to_owned());
    /// lru.put("B".to_owned(), "123".to_owned());
    ///
    /// assert_eq!(*evicted.lock().unwrap(), vec!["A".to_owned()]);
    /// ```
    pub fn with_callback<F>(max_memory: i64, on_evicted: F) -> Self
    where
        F: FnMut(&str, &V) + Send + 'static,
    {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(Box::new(on_evicted));
        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If a value is already present, it is replaced and the accounted memory is corrected by
    /// the difference of both sizes. In any case, the entry becomes the most recently used one
    /// and least recently used entries are evicted until the cache fits into **max_memory**
    /// again. Note that an entry which alone exceeds **max_memory** is evicted right away.
    pub fn put(&mut self, key: String, value: V) {
        self.writes += 1;

        let mem_size = (key.len() + value.allocated_size()) as i64;
        if let Some(&index) = self.index.get(&key) {
            let entry = &mut self.entries[index];
            self.allocated_memory += mem_size - entry.mem_size;
            entry.mem_size = mem_size;
            entry.value = value;
            self.promote(index);
        } else {
            let index = self.entries.len();
            self.entries.push(Entry {
                key: key.clone(),
                value,
                mem_size,
                newer: None,
                older: None,
            });
            let _ = self.index.insert(key, index);
            self.push_newest(index);
            self.allocated_memory += mem_size;
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory > 0 && self.allocated_memory > self.max_memory {
            if self.remove_oldest().is_none() {
                return;
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as the most recently used one.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // After inserting a value...
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// // ..it can be retrieved.
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
    /// assert_eq!(lru.get("Unknown"), None);
    ///```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        let index = *self.index.get(key)?;
        self.hits += 1;
        self.promote(index);

        Some(&self.entries[index].value)
    }

    /// Evicts the least recently used entry.
    ///
    /// The eviction callback (if present) is invoked and the evicted entry is returned. If the
    /// cache is empty, **None** is returned.
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let index = self.oldest?;
        let entry = self.detach(index);

        if let Some(callback) = self.on_evicted.as_mut() {
            callback(&entry.key, &entry.value);
        }

        Some((entry.key, entry.value))
    }

    /// Removes the entry for the given key if present.
    ///
    /// Note that this is not considered an eviction, therefore the eviction callback isn't
    /// invoked.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.remove("Foo"), Some("Bar".to_owned()));
    ///
    /// // ..it's no longer accessible.
    /// assert_eq!(lru.get("Foo"), None);
    /// assert_eq!(lru.allocated_memory(), 0);
    /// ```
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.writes += 1;

        let index = *self.index.get(key)?;
        Some(self.detach(index).value)
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits).
    pub fn flush(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.newest = None;
        self.oldest = None;
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
    }

    /// Iterates over all entries, starting with the most recently used one.
    ///
    /// Note that this doesn't alter the recency order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        std::iter::successors(self.newest, move |index| self.entries[*index].older)
            .map(move |index| (self.entries[index].key.as_str(), &self.entries[index].value))
    }

    /// Removes the entry at the given index from both, the recency list and the entry vector.
    ///
    /// As we use **swap_remove**, the last entry of the vector is moved into the given slot,
    /// so that all links pointing to it have to be updated.
    fn detach(&mut self, index: usize) -> Entry<V> {
        self.unlink(index);
        let entry = self.entries.swap_remove(index);
        let _ = self.index.remove(&entry.key);

        if index < self.entries.len() {
            self.relocated(index);
        }

        self.allocated_memory -= entry.mem_size;
        entry
    }

    /// Fixes all links to the entry which has just been moved to the given index.
    fn relocated(&mut self, index: usize) {
        let (newer, older) = (self.entries[index].newer, self.entries[index].older);
        match newer {
            Some(newer) => self.entries[newer].older = Some(index),
            None => self.newest = Some(index),
        }
        match older {
            Some(older) => self.entries[older].newer = Some(index),
            None => self.oldest = Some(index),
        }

        if let Some(slot) = self.index.get_mut(&self.entries[index].key) {
            *slot = index;
        }
    }

    fn unlink(&mut self, index: usize) {
        let (newer, older) = (self.entries[index].newer, self.entries[index].older);
        match newer {
            Some(newer) => self.entries[newer].older = older,
            None => self.newest = older,
        }
        match older {
            Some(older) => self.entries[older].newer = newer,
            None => self.oldest = newer,
        }

        self.entries[index].newer = None;
        self.entries[index].older = None;
    }

    fn push_newest(&mut self, index: usize) {
        self.entries[index].newer = None;
        self.entries[index].older = self.newest;
        match self.newest {
            Some(newest) => self.entries[newest].newer = Some(index),
            None => self.oldest = Some(index),
        }
        self.newest = Some(index);
    }

    fn promote(&mut self, index: usize) {
        if self.newest != Some(index) {
            self.unlink(index);
            self.push_newest(index);
        }
    }

    /// Returns the number of elements in the cache.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// assert_eq!(lru.len(), 0);
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache.
    pub fn max_memory(&self) -> i64 {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be occupied by this cache.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // Add some entries...
    /// lru.put("Foo0".to_owned(), "Bar".to_owned());
    /// lru.put("Foo1".to_owned(), "Bar".to_owned());
    /// lru.put("Foo2".to_owned(), "Bar".to_owned());
    /// lru.put("Foo3".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.len(), 4);
    ///
    /// // Now request that the cache is reduced to only 14 bytes...
    /// lru.set_max_memory(14);
    /// assert_eq!(lru.max_memory(), 14);
    ///
    /// // .. this will kick each but the last two entries out of the cache..
    /// assert_eq!(lru.len(), 2);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: i64) {
        self.max_memory = max_memory;
        self.enforce_constraints();
    }

    /// Returns the amount of memory accounted for the keys and values of this cache.
    pub fn allocated_memory(&self) -> i64 {
        self.allocated_memory
    }

    /// Returns the memory utilization in percent.
    ///
    /// An unbounded cache always reports 0%.
    pub fn memory_utilization(&self) -> f32 {
        if self.max_memory <= 0 {
            0.
        } else {
            self.allocated_memory as f32 / self.max_memory as f32 * 100.
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::LRUCache;
    use std::sync::{Arc, Mutex};

    #[test]
    fn get_reports_hits_and_misses() {
        let mut lru = LRUCache::new(0);
        lru.put("key1".to_owned(), "value1".to_owned());

        assert_eq!(lru.get("key1").unwrap(), "value1");
        assert_eq!(lru.get("key2"), None);
        assert_eq!(lru.reads(), 2);
        assert_eq!(lru.hits(), 1);
    }

    #[test]
    fn oldest_entry_is_evicted() {
        // Provide exactly enough room for the first two entries...
        let capacity = "key1v1key2v2".len() as i64;
        let mut lru = LRUCache::new(capacity);

        lru.put("key1".to_owned(), "v1".to_owned());
        lru.put("key2".to_owned(), "v2".to_owned());
        lru.put("key3".to_owned(), "v3".to_owned());

        // ...so that the third one pushes the first one out.
        assert_eq!(lru.get("key1"), None);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn recently_used_entries_survive() {
        // Each entry occupies 2 bytes, so that exactly three fit into the cache...
        let mut lru = LRUCache::new(6);
        lru.put("A".to_owned(), "1".to_owned());
        lru.put("B".to_owned(), "1".to_owned());
        lru.put("C".to_owned(), "1".to_owned());

        // Touching "A" makes "B" the least recently used entry...
        assert_eq!(lru.get("A").is_some(), true);
        lru.put("D".to_owned(), "1".to_owned());

        assert_eq!(lru.get("B"), None);
        assert_eq!(lru.get("A").is_some(), true);
        assert_eq!(lru.get("C").is_some(), true);
        assert_eq!(lru.get("D").is_some(), true);
    }

    #[test]
    fn evictions_are_reported_in_order() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        let mut lru = LRUCache::with_callback(10, move |key: &str, _: &String| {
            log.lock().unwrap().push(key.to_owned());
        });

        lru.put("key1".to_owned(), "123456".to_owned());
        lru.put("k2".to_owned(), "k2".to_owned());
        lru.put("k3".to_owned(), "k3".to_owned());
        lru.put("k4".to_owned(), "k4".to_owned());

        assert_eq!(
            *evicted.lock().unwrap(),
            vec!["key1".to_owned(), "k2".to_owned()]
        );
    }

    #[test]
    fn max_memory_is_never_exceeded() {
        let mut lru = LRUCache::new(40);

        for i in 0..200 {
            let key = format!("key-{}", i % 17);
            lru.put(key, "X".repeat(i % 23));
            assert!(lru.allocated_memory() <= 40);

            // The accounted memory always matches the contents...
            let expected: i64 = lru
                .iter()
                .map(|(key, value)| (key.len() + value.len()) as i64)
                .sum();
            assert_eq!(lru.allocated_memory(), expected);
        }
    }

    #[test]
    fn unbounded_caches_never_evict() {
        let mut lru = LRUCache::new(0);
        for i in 0..1000 {
            lru.put(format!("key-{}", i), "X".repeat(100));
        }
        assert_eq!(lru.len(), 1000);

        let mut lru = LRUCache::new(-1);
        for i in 0..10 {
            lru.put(format!("key-{}", i), "X".repeat(100));
        }
        assert_eq!(lru.len(), 10);
        assert_eq!(lru.memory_utilization(), 0.);
    }

    #[test]
    fn updates_replace_the_accounted_size() {
        let mut lru = LRUCache::new(24);
        lru.put("Hello0".to_owned(), "World0".to_owned());
        lru.put("Hello1".to_owned(), "World1".to_owned());
        assert_eq!(lru.allocated_memory(), 24);

        // Replacing an entry with a smaller one frees up memory...
        lru.put("Hello1".to_owned(), "".to_owned());
        assert_eq!(lru.allocated_memory(), 18);

        // ...and writing the same value over and over again doesn't grow the cache.
        for _ in 0..10 {
            lru.put("Hello1".to_owned(), "World1".to_owned());
        }
        assert_eq!(lru.allocated_memory(), 24);
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.writes(), 13);
    }

    #[test]
    fn oversized_entries_are_not_kept() {
        let mut lru = LRUCache::new(8);
        lru.put("A".to_owned(), "1".to_owned());
        lru.put("Huge".to_owned(), "X".repeat(100));

        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn links_survive_removals_from_the_middle() {
        let mut lru = LRUCache::new(0);
        for key in ["A", "B", "C", "D", "E"] {
            lru.put(key.to_owned(), key.to_owned());
        }

        // Remove entries from the middle, the front and the back of the vector...
        assert_eq!(lru.remove("C"), Some("C".to_owned()));
        assert_eq!(lru.remove("A"), Some("A".to_owned()));
        assert_eq!(lru.remove("Unknown"), None);
        let _ = lru.get("B");

        let order: Vec<&str> = lru.iter().map(|(key, _)| key).collect();
        assert_eq!(order, vec!["B", "E", "D"]);

        assert_eq!(lru.remove_oldest(), Some(("D".to_owned(), "D".to_owned())));
        assert_eq!(lru.remove_oldest(), Some(("E".to_owned(), "E".to_owned())));
        assert_eq!(lru.remove_oldest(), Some(("B".to_owned(), "B".to_owned())));
        assert_eq!(lru.remove_oldest(), None);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn flush_resets_contents_and_metrics() {
        let mut lru = LRUCache::new(100);
        lru.put("A".to_owned(), "A".to_owned());
        lru.put("B".to_owned(), "B".to_owned());
        assert_eq!(lru.get("A").is_some(), true);
        assert_eq!(lru.get("C").is_none(), true);
        assert_eq!(lru.hit_rate().round() as i32, 50);
        assert_eq!(lru.memory_utilization().round() as i32, 4);

        lru.flush();
        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.allocated_memory(), 0);
        assert_eq!(lru.reads(), 0);
        assert_eq!(lru.hit_rate(), 0.);

        // The cache is still fully functional after a flush...
        lru.put("C".to_owned(), "C".to_owned());
        assert_eq!(lru.get("C").unwrap(), "C");
    }
}

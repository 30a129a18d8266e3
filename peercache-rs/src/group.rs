//! Provides the central orchestration of a cache namespace.
//!
//! A [Group](Group) bundles a main cache, a [Loader](Loader) which computes values on a miss and
//! optionally a [PeerPicker](crate::peers::PeerPicker) which determines if another node owns a
//! key. Each request runs through the following states:
//!
//! 1. The key is looked up in the main cache. A hit is returned immediately.
//! 2. On a miss, the request joins the [SingleFlight](crate::singleflight::SingleFlight) of the
//!    group, so that concurrent requests for the same key perform the remaining steps only once.
//! 3. If a remote peer owns the key, the value is fetched from there. Such values are returned
//!    but never stored locally, as the owner already caches them. If the peer fails, the failure
//!    is logged and the value is loaded locally instead.
//! 4. Otherwise the loader is invoked. Successfully loaded values are stored in the main cache,
//!    errors are handed to all waiting callers but never cached.
//!
//! # Example
//!
//! ```
//! # use peercache::group::{Group, loader_fn};
//! # use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() {
//! let group = Group::new(
//!     "scores",
//!     2048,
//!     Arc::new(loader_fn(|key: &str| match key {
//!         "Alice" => Ok(b"111".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not found", key)),
//!     })),
//! );
//!
//! assert_eq!(group.get("Alice").await.unwrap().as_string(), "111");
//! assert_eq!(group.get("Bob").await.is_err(), true);
//! # }
//! ```
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::byteview::ByteView;
use crate::error::CacheError;
use crate::lru::cache::SharedCache;
use crate::peers::{PeerGetter, PeerPicker};
use crate::singleflight::SingleFlight;

/// Computes the value of a key whenever it isn't present in the cache.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    /// Loads the raw value for the given key from the backing source.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain (synchronous) closure into a [Loader](Loader).
///
/// Use [loader_fn](loader_fn) to create one.
pub struct LoaderFn<F>(F);

/// Wraps the given closure into a [Loader](Loader).
pub fn loader_fn<F>(loader: F) -> LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    LoaderFn(loader)
}

#[async_trait::async_trait]
impl<F> Loader for LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Collects the statistics of a group.
///
/// All counters are plain atomics which are only ever incremented.
#[derive(Default, Debug)]
pub struct Stats {
    /// Counts all requests (except those with an empty key).
    pub gets: AtomicU64,

    /// Counts the requests which were answered by the main cache.
    pub cache_hits: AtomicU64,

    /// Counts the requests which missed the cache (before being deduplicated).
    pub loads: AtomicU64,

    /// Counts the loads which were actually executed (after being deduplicated).
    pub executed_loads: AtomicU64,

    /// Counts the values which were successfully fetched from a remote peer.
    pub peer_loads: AtomicU64,

    /// Counts the failed attempts to fetch a value from a remote peer.
    pub peer_errors: AtomicU64,

    /// Counts the values which were successfully computed by the local loader.
    pub local_loads: AtomicU64,

    /// Counts the failures of the local loader.
    pub local_load_errors: AtomicU64,
}

impl Stats {
    fn inc(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Lists all counters along with a short name in a stable order.
    pub fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("gets", self.gets.load(Ordering::Relaxed)),
            ("cache_hits", self.cache_hits.load(Ordering::Relaxed)),
            ("loads", self.loads.load(Ordering::Relaxed)),
            ("executed_loads", self.executed_loads.load(Ordering::Relaxed)),
            ("peer_loads", self.peer_loads.load(Ordering::Relaxed)),
            ("peer_errors", self.peer_errors.load(Ordering::Relaxed)),
            ("local_loads", self.local_loads.load(Ordering::Relaxed)),
            (
                "local_load_errors",
                self.local_load_errors.load(Ordering::Relaxed),
            ),
        ]
    }
}

/// Represents a named cache namespace which is backed by a loader and optionally spread across
/// several peers.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    main_cache: SharedCache<ByteView>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flights: SingleFlight<Result<ByteView, CacheError>>,
    stats: Stats,
}

impl Group {
    /// Creates a new group.
    ///
    /// Note that most probably a group should be created via
    /// [GroupRegistry::create](crate::registry::GroupRegistry::create) so that it can be found by
    /// the server. The **max_memory** limits the main cache, where zero or less means unbounded.
    pub fn new(name: impl Into<String>, max_memory: i64, loader: Arc<dyn Loader>) -> Self {
        let name = name.into();
        Group {
            main_cache: SharedCache::new(name.clone(), max_memory),
            name,
            loader,
            peers: OnceLock::new(),
            flights: SingleFlight::new(),
            stats: Stats::default(),
        }
    }

    /// Binds the peer picker which decides if a key is owned by another node.
    ///
    /// # Panics
    /// Panics if a picker has already been registered for this group, as this is an error in the
    /// setup of the application.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!("register_peers called more than once for group {}", self.name);
        }
    }

    /// Fetches the value for the given key.
    ///
    /// The value is either served from the main cache, fetched from the owning peer or computed
    /// by the loader of this group. Concurrent calls for the same key share a single fetch.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        Stats::inc(&self.stats.gets);
        if let Some(value) = self.main_cache.get(key) {
            Stats::inc(&self.stats.cache_hits);
            log::debug!("[{}] Cache hit for {}", self.name, key);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        Stats::inc(&self.stats.loads);
        self.flights
            .work(key, || async {
                // Flights only merge overlapping calls. A call which arrived right after the
                // previous flight landed might find the value in the cache by now. It has
                // already been counted as load, therefore this isn't counted as cache hit...
                if let Some(value) = self.main_cache.get(key) {
                    return Ok(value);
                }

                Stats::inc(&self.stats.executed_loads);
                if let Some(peer) = self.peers.get().and_then(|peers| peers.pick_peer(key)) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(value) => {
                            Stats::inc(&self.stats.peer_loads);
                            return Ok(value);
                        }
                        Err(error) => {
                            Stats::inc(&self.stats.peer_errors);
                            log::warn!(
                                "[{}] Failed to fetch {} from peer: {:#}. Loading locally...",
                                self.name,
                                key,
                                error
                            );
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> anyhow::Result<ByteView> {
        log::debug!("[{}] Fetching {} from peer...", self.name, key);
        Ok(ByteView::from(peer.get(&self.name, key).await?))
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        log::debug!("[{}] Loading {} locally...", self.name, key);
        match self.loader.load(key).await {
            Ok(data) => {
                Stats::inc(&self.stats.local_loads);
                let value = ByteView::from(data);
                self.main_cache.add(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                Stats::inc(&self.stats.local_load_errors);
                Err(CacheError::from(error))
            }
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the memory limit of the main cache.
    pub fn max_memory(&self) -> i64 {
        self.main_cache.max_memory()
    }

    /// Returns the number of entries in the main cache.
    pub fn cache_len(&self) -> usize {
        self.main_cache.metrics().entries
    }

    /// Returns the number of bytes currently occupied in the main cache.
    pub fn cache_memory(&self) -> i64 {
        self.main_cache.metrics().allocated_memory
    }

    /// Provides access to the statistics of this group.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use crate::group::{loader_fn, Group, Loader};
    use crate::peers::{PeerGetter, PeerPicker};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Provides scores for a small set of players and counts all invocations.
    #[derive(Default)]
    struct ScoreLoader {
        calls: AtomicUsize,
    }

    impl ScoreLoader {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Loader for ScoreLoader {
        async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            match key {
                "Alice" => Ok(b"111".to_vec()),
                "Jack" => Ok(b"222".to_vec()),
                "Sam" => Ok(b"333".to_vec()),
                _ => Err(anyhow::anyhow!("{} not found", key)),
            }
        }
    }

    struct FailingPeer;

    #[async_trait::async_trait]
    impl PeerGetter for FailingPeer {
        async fn get(&self, _group: &str, _key: &str) -> anyhow::Result<Bytes> {
            Err(anyhow::anyhow!("Connection refused"))
        }
    }

    struct RemotePeer {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PeerGetter for RemotePeer {
        async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("{}/{}@remote", group, key)))
        }
    }

    /// Resolves every key to the same peer.
    struct SinglePeer(Arc<dyn PeerGetter>);

    impl PeerPicker for SinglePeer {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Group::new("scores", 2048, loader.clone());

            assert_eq!(group.get("Alice").await.unwrap().as_string(), "111");
            assert_eq!(group.get("Alice").await.unwrap().as_string(), "111");
            assert_eq!(loader.calls(), 1);

            let stats = group.stats().counters();
            assert_eq!(stats[0], ("gets", 2));
            assert_eq!(stats[1], ("cache_hits", 1));
            assert_eq!(stats[6], ("local_loads", 1));
            assert_eq!(group.cache_len(), 1);
            assert_eq!(group.cache_memory(), 8);
            assert_eq!(group.name(), "scores");
            assert_eq!(group.max_memory(), 2048);
        });
    }

    #[test]
    fn late_arrivals_are_served_from_the_cache_without_loading() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Group::new("scores", 2048, loader.clone());

            assert_eq!(group.get("Alice").await.unwrap().as_string(), "111");

            // A request which missed the cache just before the previous flight landed...
            assert_eq!(group.load("Alice").await.unwrap().as_string(), "111");
            assert_eq!(loader.calls(), 1);

            let stats = group.stats().counters();
            assert_eq!(stats[1], ("cache_hits", 0));
            assert_eq!(stats[2], ("loads", 2));
            assert_eq!(stats[3], ("executed_loads", 1));
        });
    }

    #[test]
    fn errors_are_not_cached() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Group::new("scores", 2048, loader.clone());

            for _ in 0..2 {
                let error = group.get("Bob").await.unwrap_err();
                assert_eq!(error.to_string(), "Failed to load value: Bob not found");
            }

            assert_eq!(loader.calls(), 2);
            assert_eq!(group.cache_len(), 0);
            assert_eq!(group.stats().counters()[7], ("local_load_errors", 2));
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Group::new("scores", 2048, loader.clone());

            assert_eq!(group.get("").await.unwrap_err().is_client_error(), true);
            assert_eq!(loader.calls(), 0);
            assert_eq!(group.stats().counters()[0], ("gets", 0));
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_loader() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Group::new("scores", 2048, loader.clone());
            group.register_peers(Arc::new(SinglePeer(Arc::new(FailingPeer))));

            assert_eq!(group.get("Jack").await.unwrap().as_string(), "222");
            assert_eq!(loader.calls(), 1);

            let stats = group.stats().counters();
            assert_eq!(stats[4], ("peer_loads", 0));
            assert_eq!(stats[5], ("peer_errors", 1));
            assert_eq!(stats[6], ("local_loads", 1));
        });
    }

    #[test]
    fn values_of_peers_are_not_cached_locally() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let peer = Arc::new(RemotePeer {
                calls: AtomicUsize::new(0),
            });
            let group = Group::new("scores", 2048, loader.clone());
            group.register_peers(Arc::new(SinglePeer(peer.clone())));

            for _ in 0..2 {
                assert_eq!(
                    group.get("Sam").await.unwrap().as_string(),
                    "scores/Sam@remote"
                );
            }

            assert_eq!(peer.calls.load(Ordering::SeqCst), 2);
            assert_eq!(loader.calls(), 0);
            assert_eq!(group.cache_len(), 0);
        });
    }

    #[test]
    #[should_panic]
    fn peers_can_only_be_registered_once() {
        let group = Group::new("scores", 0, Arc::new(ScoreLoader::default()));
        group.register_peers(Arc::new(SinglePeer(Arc::new(FailingPeer))));
        group.register_peers(Arc::new(SinglePeer(Arc::new(FailingPeer))));
    }

    #[test]
    fn concurrent_misses_are_merged() {
        crate::testing::test_async(async {
            let loader = Arc::new(ScoreLoader::default());
            let group = Arc::new(Group::new("scores", 2048, loader.clone()));

            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let group = group.clone();
                    tokio::spawn(async move { group.get("Alice").await })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.await.unwrap().unwrap().as_string(), "111");
            }

            assert_eq!(loader.calls(), 1);
            let stats = group.stats().counters();
            assert_eq!(stats[2], ("loads", 10));
            assert_eq!(stats[3], ("executed_loads", 1));
        });
    }

    #[test]
    fn closures_can_be_used_as_loaders() {
        crate::testing::test_async(async {
            let group = Group::new(
                "echo",
                8,
                Arc::new(loader_fn(|key: &str| Ok(key.as_bytes().to_vec()))),
            );

            assert_eq!(group.get("ab").await.unwrap().as_string(), "ab");
            assert_eq!(group.get("cd").await.unwrap().as_string(), "cd");

            // Each entry occupies 4 bytes, therefore "ab" has to make room for "ef"...
            assert_eq!(group.get("ef").await.unwrap().as_string(), "ef");
            assert_eq!(group.cache_len(), 2);
            assert_eq!(group.cache_memory(), 8);
        });
    }
}

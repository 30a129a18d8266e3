//! Provides the HTTP transport between peers.
//!
//! Each node runs a [Server](crate::server::Server) which answers requests of other nodes. The
//! [HttpPool](HttpPool) knows all nodes of the cluster and places them on a
//! [HashRing](crate::consistenthash::HashRing). For each key it determines the owning node and
//! hands out an [HttpGetter](HttpGetter) for it, unless the key is owned by the local node.
//!
//! The list of nodes is read from the config and re-applied whenever the config changes. As the
//! ring cannot be modified in place, every change builds a new ring which then atomically replaces
//! the previous one. Requests which are currently running still use the ring they started with.
//!
//! The wire format is deliberately simple: a **POST** to **/_peercache** with a JSON body
//! containing the group and the key. A successful response carries the raw value as body.
//!
//! # Example
//!
//! ```
//! # use peercache::peers::http::HttpPool;
//! # use peercache::peers::PeerPicker;
//! let pool = HttpPool::new("http://10.0.0.1:8001", 50);
//!
//! // Without any peers, everything is handled locally...
//! assert_eq!(pool.pick_peer("Alice").is_none(), true);
//!
//! pool.set_peers(["http://10.0.0.1:8001", "http://10.0.0.2:8001/"]);
//! assert_eq!(pool.peers(), vec!["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//! ```
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request};
use hyper_tls::HttpsConnector;
use itertools::Itertools;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::consistenthash::HashRing;
use crate::peers::{PeerGetter, PeerPicker};
use crate::platform::Platform;
use crate::server::PEER_PATH;

/// Contains the number of virtual nodes per peer if nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Specifies how long we wait for a peer to answer before falling back to a local load.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type HttpClient = Client<HttpsConnector<HttpConnector>>;

fn new_client() -> HttpClient {
    Client::builder().build(HttpsConnector::new())
}

/// Fetches values from a remote node via HTTP(S).
pub struct HttpGetter {
    base_url: String,
    client: HttpClient,
}

impl HttpGetter {
    /// Creates a new getter for the node with the given base url (e.g. "http://10.0.0.2:8001").
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpGetter::with_client(base_url, new_client())
    }

    fn with_client(base_url: impl Into<String>, client: HttpClient) -> Self {
        HttpGetter {
            base_url: base_url.into(),
            client,
        }
    }

    /// Returns the base url of the remote node.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}{}", self.base_url, PEER_PATH))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "group": group, "key": key }).to_string(),
            ))
            .context("Failed to build peer request")?;

        let response = self
            .client
            .request(request)
            .await
            .with_context(|| format!("Failed to contact {}", self.base_url))?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .with_context(|| format!("Failed to read response of {}", self.base_url))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(anyhow::anyhow!(
                "{} responded with {}: {}",
                self.base_url,
                status,
                String::from_utf8_lossy(&body)
            ))
        }
    }
}

#[async_trait::async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.fetch(group, key))
            .await
            .map_err(|_| anyhow::anyhow!("{} didn't respond in time", self.base_url))?
    }
}

/// Represents an immutable snapshot of the cluster.
struct PeerSet {
    ring: HashRing,
    getters: HashMap<String, Arc<dyn PeerGetter>>,
}

/// Distributes keys among all known nodes.
pub struct HttpPool {
    self_url: String,
    replicas: usize,
    client: HttpClient,
    peers: ArcSwap<PeerSet>,
}

/// Strips whitespace and trailing slashes so that "http://a/" and "http://a" denote the same node.
fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

/// Normalizes the given urls, drops empty and duplicate ones and sorts the result.
fn normalize_all<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    urls.into_iter()
        .map(|url| normalize(url.as_ref()))
        .filter(|url| !url.is_empty())
        .unique()
        .sorted()
        .collect()
}

impl HttpPool {
    /// Creates a new pool for the node reachable via the given url.
    ///
    /// The pool is empty until [set_peers](HttpPool::set_peers) is called.
    pub fn new(self_url: &str, replicas: usize) -> Self {
        HttpPool {
            self_url: normalize(self_url),
            replicas,
            client: new_client(),
            peers: ArcSwap::new(Arc::new(PeerSet {
                ring: HashRing::new(replicas),
                getters: HashMap::new(),
            })),
        }
    }

    /// Creates a pool based on the current config and installs it into the given platform.
    ///
    /// The pool listens for config changes and re-applies **peers.nodes** each time. If no
    /// **peers.self** is given, the node assumes to be reachable via localhost on the configured
    /// server port.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let config = platform.find::<Config>();
        let (self_url, replicas) = match &config {
            Some(config) => {
                let handle = config.current();
                let self_url = handle
                    .query("peers.self")
                    .as_str()
                    .map(|url| url.to_owned())
                    .unwrap_or_else(|| {
                        format!(
                            "http://127.0.0.1:{}",
                            handle.query("server.port").as_i64().unwrap_or(2410)
                        )
                    });
                let replicas = handle
                    .query("peers.replicas")
                    .as_i64()
                    .filter(|replicas| *replicas > 0)
                    .map(|replicas| replicas as usize)
                    .unwrap_or(DEFAULT_REPLICAS);

                (self_url, replicas)
            }
            None => ("http://127.0.0.1:2410".to_owned(), DEFAULT_REPLICAS),
        };

        let pool = Arc::new(HttpPool::new(&self_url, replicas));
        platform.register::<HttpPool>(pool.clone());
        log::info!(
            "Installed peer pool for {} using {} replicas per peer.",
            pool.self_url,
            pool.replicas
        );

        if let Some(config) = config {
            pool.apply_config(&config);
            HttpPool::listen_for_changes(pool.clone(), platform.clone(), config);
        }

        pool
    }

    fn listen_for_changes(pool: Arc<HttpPool>, platform: Arc<Platform>, config: Arc<Config>) {
        let mut notifier = config.notifier();
        crate::spawn!(async move {
            while platform.is_running() {
                match notifier.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => pool.apply_config(&config),
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    fn apply_config(&self, config: &Config) {
        let handle = config.current();
        let nodes = handle
            .query("peers.nodes")
            .as_vec()
            .map(|nodes| {
                normalize_all(nodes.iter().filter_map(|node| node.as_str()))
            })
            .unwrap_or_default();

        // Only rebuild the ring if the set of nodes actually changed...
        if nodes != self.peers() {
            self.set_peers(nodes);
        }
    }

    /// Replaces the set of known nodes.
    ///
    /// Urls are normalized and duplicates are ignored. The local node may (and usually will) be
    /// part of the list. Passing an empty list makes the node handle all keys locally.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers = normalize_all(peers);

        let mut ring = HashRing::new(self.replicas);
        ring.add(&peers);

        let getters = peers
            .iter()
            .map(|peer| -> (String, Arc<dyn PeerGetter>) {
                (
                    peer.clone(),
                    Arc::new(HttpGetter::with_client(peer.clone(), self.client.clone())),
                )
            })
            .collect();

        log::info!("Peers have been updated: {}", peers.iter().join(", "));
        self.peers.store(Arc::new(PeerSet { ring, getters }));
    }

    /// Lists all known nodes in alphabetical order.
    pub fn peers(&self) -> Vec<String> {
        self.peers
            .load()
            .ring
            .peers()
            .into_iter()
            .map(|peer| peer.to_owned())
            .collect()
    }

    /// Returns the url of the local node.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Returns the url of the node owning the given key.
    pub fn owner(&self, key: &str) -> Option<String> {
        self.peers.load().ring.get(key).map(|owner| owner.to_owned())
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.load();
        let owner = peers.ring.get(key)?;
        if owner == self.self_url {
            return None;
        }

        log::debug!("Picked peer {} for {}", owner, key);
        peers.getters.get(owner).cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::peers::http::{HttpGetter, HttpPool};
    use crate::peers::{PeerGetter, PeerPicker};
    use std::sync::Arc;

    #[test]
    fn peers_are_normalized_and_deduplicated() {
        let pool = HttpPool::new("http://10.0.0.1:8001/", 10);
        pool.set_peers([
            " http://10.0.0.2:8001/",
            "http://10.0.0.1:8001",
            "http://10.0.0.2:8001",
            "",
        ]);

        assert_eq!(pool.self_url(), "http://10.0.0.1:8001");
        assert_eq!(
            pool.peers(),
            vec!["http://10.0.0.1:8001", "http://10.0.0.2:8001"]
        );
    }

    #[test]
    fn only_keys_of_other_nodes_are_delegated() {
        let pool = HttpPool::new("http://10.0.0.1:8001", 50);
        pool.set_peers(["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);

        let mut remote = 0;
        for i in 0..200 {
            let key = format!("key-{}", i);
            let owner = pool.owner(&key).unwrap();
            assert_eq!(pool.pick_peer(&key).is_some(), owner != "http://10.0.0.1:8001");
            if owner != "http://10.0.0.1:8001" {
                remote += 1;
            }
        }

        // Both nodes should own a fair share of the keys...
        assert!(remote > 20 && remote < 180, "Remote: {}", remote);

        // Once the other node is gone, everything is handled locally...
        pool.set_peers(["http://10.0.0.1:8001"]);
        assert_eq!((0..200).all(|i| pool.pick_peer(&format!("key-{}", i)).is_none()), true);

        pool.set_peers(Vec::<String>::new());
        assert_eq!(pool.owner("key-1"), None);
    }

    #[test]
    fn pool_follows_the_config() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().build().await;
            platform
                .require::<Config>()
                .load_from_string(
                    "
peers:
    self: http://10.0.0.1:8001
    replicas: 10
    nodes:
        - http://10.0.0.1:8001
",
                    None,
                )
                .unwrap();

            let pool = HttpPool::install(&platform);
            assert_eq!(pool.self_url(), "http://10.0.0.1:8001");
            assert_eq!(pool.peers(), vec!["http://10.0.0.1:8001"]);

            platform
                .require::<Config>()
                .load_from_string(
                    "
peers:
    self: http://10.0.0.1:8001
    nodes:
        - http://10.0.0.1:8001
        - http://10.0.0.3:8001
",
                    None,
                )
                .unwrap();

            // Give the change listener a chance to run...
            for _ in 0..20 {
                if pool.peers().len() == 2 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            assert_eq!(
                pool.peers(),
                vec!["http://10.0.0.1:8001", "http://10.0.0.3:8001"]
            );

            platform.terminate();
        });
    }

    #[test]
    fn unchanged_nodes_keep_the_current_ring() {
        let config = Config::new("peercache_unchanged_nodes.yml");
        config
            .load_from_string(
                "
peers:
    nodes:
        - http://10.0.0.3:8001/
        - http://10.0.0.1:8001
        - http://10.0.0.3:8001
",
                None,
            )
            .unwrap();

        let pool = HttpPool::new("http://10.0.0.1:8001", 10);
        pool.apply_config(&config);
        assert_eq!(
            pool.peers(),
            vec!["http://10.0.0.1:8001", "http://10.0.0.3:8001"]
        );

        // Re-applying the same (unsorted, not normalized) list must not replace the ring...
        let ring = pool.peers.load_full();
        pool.apply_config(&config);
        assert_eq!(Arc::ptr_eq(&ring, &pool.peers.load_full()), true);
    }

    #[test]
    fn unreachable_peers_report_an_error() {
        crate::testing::test_async(async {
            let getter = HttpGetter::new("http://127.0.0.1:1");
            assert_eq!(getter.base_url(), "http://127.0.0.1:1");
            assert_eq!(getter.get("scores", "Alice").await.is_err(), true);
        });
    }
}

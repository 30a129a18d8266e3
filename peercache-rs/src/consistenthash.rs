//! Provides a consistent hash ring which maps keys to peers.
//!
//! Each peer is placed on the ring several times (once per *replica* or virtual node), so that
//! the keyspace is split into many small segments which are evenly distributed among all peers.
//! A key belongs to the first virtual node which is located at or after the hash of the key
//! (walking clockwise and wrapping around at the end of the ring).
//!
//! The ring is built once and then only read. There is no way of removing a single peer, as a
//! change of the topology is handled by building a new ring from the surviving peers (see
//! [HttpPool::set_peers](crate::peers::http::HttpPool::set_peers)).
//!
//! # Example
//!
//! ```
//! # use peercache::consistenthash::HashRing;
//! let mut ring = HashRing::new(50);
//! ring.add(["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//!
//! // The same key always resolves to the same peer...
//! let owner = ring.get("Alice").unwrap();
//! assert_eq!(ring.get("Alice"), Some(owner));
//!
//! // ...and an empty ring has no opinion at all.
//! assert_eq!(HashRing::new(50).get("Alice"), None);
//! ```
use crc::{Crc, CRC_32_ISO_HDLC};
use fnv::FnvHashMap;
use itertools::Itertools;

/// Computes the position of the given data on the ring.
pub type Hash = fn(&[u8]) -> u32;

/// CRC-32 calculator (IEEE polynomial as used by zlib, ethernet etc.)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the default ring position of the given data, which is its CRC-32 (IEEE) checksum.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Represents a ring of virtual nodes, each pointing to a real peer.
#[derive(Clone)]
pub struct HashRing {
    hash: Hash,
    replicas: usize,
    keys: Vec<u32>,
    peers: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring which places each peer **replicas** times and uses
    /// [crc32](crc32) to compute positions.
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash(replicas, crc32)
    }

    /// Creates an empty ring which uses the given hash function.
    pub fn with_hash(replicas: usize, hash: Hash) -> Self {
        HashRing {
            hash,
            replicas,
            keys: Vec::new(),
            peers: FnvHashMap::default(),
        }
    }

    /// Adds the given peers to the ring.
    ///
    /// The virtual node **i** of a peer is placed at the hash of **i** followed by the peer name.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.keys.push(hash);
                let _ = self.peers.insert(hash, peer.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Returns the peer which owns the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|position| *position < hash);
        let position = self.keys[index % self.keys.len()];

        self.peers.get(&position).map(|peer| peer.as_str())
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns the number of virtual nodes per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Lists all (real) peers on the ring in alphabetical order.
    pub fn peers(&self) -> Vec<&str> {
        self.peers
            .values()
            .map(|peer| peer.as_str())
            .unique()
            .sorted()
            .collect()
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("peers", &self.peers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::consistenthash::{crc32, HashRing};

    /// Uses the numeric value of the data as hash so that ring positions are easy to predict.
    fn numeric_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    #[test]
    fn keys_are_mapped_clockwise() {
        let mut ring = HashRing::with_hash(3, numeric_hash);

        // This yields the virtual nodes 2, 4, 6, 12, 14, 16, 22, 24, 26...
        ring.add(["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        // An exact match belongs to the virtual node itself, everything else to the next one and
        // anything beyond the last node wraps around to the first one...
        for (key, peer) in [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")] {
            assert_eq!(ring.get(key), Some(peer), "Key: {}", key);
        }

        // Adding 8, 18, 28 only moves the keys located right before these nodes...
        ring.add(["8"]);
        for (key, peer) in [("2", "2"), ("11", "2"), ("23", "4"), ("27", "8")] {
            assert_eq!(ring.get(key), Some(peer), "Key: {}", key);
        }
    }

    #[test]
    fn empty_rings_resolve_nothing() {
        let ring = HashRing::new(10);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Alice"), None);
        assert_eq!(ring.peers().is_empty(), true);
    }

    #[test]
    fn lookups_are_deterministic() {
        let mut ring = HashRing::new(50);
        ring.add(["peer-a", "peer-b", "peer-c"]);

        let mut other = HashRing::new(50);
        other.add(["peer-c", "peer-a", "peer-b"]);

        for i in 0..1000 {
            let key = format!("key-{}", i);
            assert_eq!(ring.get(&key), ring.get(&key));
            assert_eq!(ring.get(&key), other.get(&key));
        }
        assert_eq!(ring.peers(), vec!["peer-a", "peer-b", "peer-c"]);
    }

    #[test]
    fn adding_a_peer_only_moves_keys_to_it() {
        let mut ring = HashRing::new(50);
        ring.add(["peer-a", "peer-b", "peer-c"]);
        let mut grown = ring.clone();
        grown.add(["peer-d"]);

        let mut moved = 0;
        for i in 0..1000 {
            let key = format!("key-{}", i);
            let before = ring.get(&key).unwrap();
            let after = grown.get(&key).unwrap();
            if before != after {
                assert_eq!(after, "peer-d");
                moved += 1;
            }
        }

        // Roughly a quarter of all keys should now belong to the new peer...
        assert!(moved > 100 && moved < 450, "Moved: {}", moved);
    }

    #[test]
    fn keys_are_spread_among_all_peers() {
        let mut ring = HashRing::new(50);
        ring.add(["peer-a", "peer-b", "peer-c"]);

        let owned_by_a = (0..3000)
            .filter(|i| ring.get(&format!("key-{}", i)) == Some("peer-a"))
            .count();
        assert!(owned_by_a > 500 && owned_by_a < 1500, "Owned: {}", owned_by_a);
    }

    #[test]
    fn default_hash_is_crc32_ieee() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
        assert_eq!(crc32(b""), 0);
    }
}

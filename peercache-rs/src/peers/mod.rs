//! Defines how a [Group](crate::group::Group) talks to other nodes.
//!
//! Two traits form the seam between the cache and the transport: a [PeerPicker](PeerPicker)
//! decides which node owns a key and a [PeerGetter](PeerGetter) fetches a value from one specific
//! node. Neither knows anything about caching, and the group knows nothing about the wire.
//!
//! The [http](http) module provides the transport which is used by **peercache-io**: a pool which
//! distributes keys using a [HashRing](crate::consistenthash::HashRing) and a client which talks
//! to the [server](crate::server) of the owning node.
use std::sync::Arc;

use bytes::Bytes;

pub mod http;

/// Fetches values from a single remote node.
#[async_trait::async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value of the given key in the given group from the remote node.
    ///
    /// Any error (network, protocol or a failed load on the remote side) is reported as is. The
    /// caller will then try to load the value locally.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes>;
}

/// Determines the node which is responsible for a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the client for the node owning the given key.
    ///
    /// Returns **None** if the key is owned by the local node or if no peers are known at all.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

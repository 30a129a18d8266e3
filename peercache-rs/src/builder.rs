//! Provides a builder which sets up a node.
//!
//! A node consists of several components (config, group registry, peer pool, server) of which
//! some might not be wanted, e.g. when embedding the cache into an application which does not
//! talk to other nodes. The builder permits to selectively enable these.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::group::loader_fn;
//! # use peercache::peers::http::HttpPool;
//! # use peercache::registry::GroupRegistry;
//! # use peercache::server::Server;
//! # use std::sync::Arc;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Create the groups of this node and let them know about the other nodes...
//!     let group = platform.require::<GroupRegistry>().create(
//!         "scores",
//!         64 * 1024 * 1024,
//!         Arc::new(loader_fn(|key: &str| Ok(key.as_bytes().to_vec()))),
//!     );
//!     group.register_peers(platform.require::<HttpPool>());
//!
//!     // Start the main event loop of the server...
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::peers::http::HttpPool;
use crate::platform::Platform;
use crate::registry::GroupRegistry;
use crate::server::Server;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and installing the enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_groups: bool,
    setup_peers: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all components.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_groups = true;
        self.setup_peers = true;
        self.setup_server = true;

        self
    }

    /// Sets up **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the platform once the process is asked to
    /// stop. For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables the signal listener after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs a [Config](crate::config::Config) and loads **config/settings.yml**.
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables the config after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Installs an empty [GroupRegistry](crate::registry::GroupRegistry).
    pub fn enable_groups(mut self) -> Self {
        self.setup_groups = true;
        self
    }

    /// Disables the group registry after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_groups(mut self) -> Self {
        self.setup_groups = false;
        self
    }

    /// Installs an [HttpPool](crate::peers::http::HttpPool) which follows **peers.nodes** of
    /// the config.
    pub fn enable_peers(mut self) -> Self {
        self.setup_peers = true;
        self
    }

    /// Disables the peer pool after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.setup_peers = false;
        self
    }

    /// Installs a [Server](crate::server::Server).
    ///
    /// Note that the server still has to be started via
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables the server after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all enabled components installed.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_groups {
            let _ = GroupRegistry::install(&platform);
        }

        if self.setup_peers {
            let _ = HttpPool::install(&platform);
        }

        if self.setup_server {
            let _ = Server::install(&platform);
        }

        platform
    }
}

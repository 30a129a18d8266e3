//! Peercache is a distributed read-through cache which is embedded into the nodes of an
//! application.
//!
//! # Introduction
//! Instead of running a separate cache server, every node of an application carries a slice of
//! the cache. Values are organized in **groups**, each of which is backed by a **loader** that
//! computes a value whenever it is missing. The keyspace of a group is distributed among all nodes
//! using a consistent hash ring, so that each value is loaded and cached by exactly one node (its
//! *owner*) and all other nodes fetch it from there.
//!
//! Values are immutable once loaded. There is no way to update or delete a value, as entries are
//! only ever evicted by the LRU policy of the owning node.
//!
//! # Features
//! * **Read-through**: A [Group](group::Group) answers from its main cache, delegates to the
//!   owning peer or invokes its [Loader](group::Loader).
//! * **Duplicate suppression**: concurrent requests for the same key only ever trigger a single
//!   load (see [singleflight]). This protects the backend from a stampede of requests once a
//!   popular value is evicted.
//! * **Memory bound**: Each group is limited by a number of bytes and drops the least recently
//!   used values once this limit is reached (see [lru]).
//! * **Reload-aware config**: the list of peers as well as the server address can be changed
//!   while the node is running (see [config]).
//! * **100% Async/Await**: everything builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//!
//! # Modules
//! * [byteview]: the immutable value handle returned by all cache operations.
//! * [lru]: a memory bound LRU cache.
//! * [consistenthash]: maps keys onto peers.
//! * [singleflight]: merges concurrent requests for the same key.
//! * [group] and [registry]: the cache namespaces of a node.
//! * [peers]: the seam to other nodes along with an HTTP based transport.
//! * [server]: answers the requests of other nodes.
//!
//! # Examples
//! A short example on how to set up a node can be found here: [Builder](builder::Builder).
//! A complete node is provided by **peercache-io**.
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(unused_results)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod consistenthash;
pub mod error;
pub mod fmt;
pub mod group;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod registry;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the Peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up a
/// node, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests create many platforms, but the logger can only be installed once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Executes the given future via `tokio::spawn` and discards the join handle.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test binds our test port (1503).
        /// All other tests still run in parallel.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}

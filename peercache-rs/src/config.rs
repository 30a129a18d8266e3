//! Contains the node configuration.
//!
//! The configuration is loaded from **config/settings.yml**. This file is observed and reloaded
//! once a change is detected, so that e.g. the list of peers or the server address can be
//! changed without restarting the node (and thereby losing all cached data). Every component
//! which depends on the config attaches itself to [Config::notifier](Config::notifier) and
//! re-processes the config once a change message is received.
//!
//! The **Config** itself can be obtained from the **Platform** once and then kept around.
//! However, the handle returned by **Config::current()** must not be stored, as it will not
//! reflect any later changes.
//!
//! A complete config file looks like this:
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 8001
//! peers:
//!     self: http://10.0.0.1:8001
//!     replicas: 50
//!     nodes:
//!         - http://10.0.0.1:8001
//!         - http://10.0.0.2:8001
//! groups:
//!     scores:
//!         max_memory: 64m
//!         directory: data/scores
//! ```
//!
//! # Examples
//!
//! Obtaining and reading the config:
//! ```
//! # use peercache::builder::Builder;
//! # use peercache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//!
//! let port = config.current().query("server.port").as_i64().unwrap_or(2410);
//! # }
//! ```
//!
//! Attaching a change listener:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::config::Config;
//! # #[tokio::main]
//! # async fn main() {
//! # let platform = Builder::new().enable_config().build().await;
//! let config = platform.require::<Config>();
//! tokio::spawn(async move {
//!     let mut notifier = config.notifier();
//!     while notifier.recv().await.is_ok() {
//!         log::info!("Peers are now: {:?}", config.current().query("peers.nodes"));
//!     }
//! });
//! # }
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Provides access to the node configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message itself carries no information. Once it is received, the config has changed and
/// needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will neither load the file nor observe it for changes. This is done by
    /// [install](install).
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// An unmounted docker volume shows up as directory, therefore only files are considered.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// A missing file is not an error, the node then simply runs with its defaults.
    pub async fn load(&self) -> anyhow::Result<()> {
        let metadata = match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                log::info!(
                    "Config file {} doesn't exist - using defaults.",
                    &self.filename
                );
                return Ok(());
            }
        };

        log::info!("Loading config file {}...", &self.filename);
        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(config_data.as_str(), metadata.modified().ok())
    }

    /// Validates and writes the given config into the underlying file.
    ///
    /// The file watcher will then pick up the change and reload the config.
    ///
    /// # Example
    ///
    /// ```
    /// # use peercache::config::Config;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let config = Config::new("peercache_test_config.yml");
    ///
    /// assert_eq!(config.store("
    /// server:
    ///     port: 12345
    /// ").await.is_ok(), true);
    ///
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    ///
    /// // Writing an invalid config file is prevented...
    /// assert_eq!(config.store("server: \"test").await.is_err(), true);
    ///
    /// // Therefore the original config is still present...
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().query("server.port").as_i64().unwrap(), 12345);
    ///
    /// let _ = std::fs::remove_file("peercache_test_config.yml");
    /// # }
    /// ```
    pub async fn store(&self, config: &str) -> anyhow::Result<()> {
        let _ = YamlLoader::load_from_str(config).context("Cannot parse config data")?;

        log::info!("Updating the config file {}...", &self.filename);
        tokio::fs::write(&self.filename, config)
            .await
            .context("Failed to write to config file!")?;

        Ok(())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// If the data cannot be parsed, the previous config remains active.
    ///
    /// # Example
    ///
    /// ```
    /// # use peercache::config::Config;
    /// let config = Config::new("somefile.yml");
    /// config.load_from_string("
    /// peers:
    ///     nodes:
    ///         - http://10.0.0.1:8001
    ///         - http://10.0.0.2:8001
    /// ", None).unwrap();
    ///
    /// let nodes = config.current().query("peers.nodes").as_vec().unwrap().len();
    /// assert_eq!(nodes, 2);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like "server.port" against the currently loaded configuration.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |node, key| &node[key])
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This will read its contents from **config/settings.yml** and also install a change listener
/// for this file. This listener only watches the "last modified" date of the file, therefore each
/// user of the config has to gracefully handle partial changes.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless the config is
/// disabled.
pub async fn install(platform: Arc<Platform>) {
    let path = Path::new("config");
    if let Err(error) = tokio::fs::create_dir_all(path).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config);
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("Node configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load node config: {:#}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use std::time::SystemTime;

    #[test]
    fn config_updates_are_broadcast() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().build().await;
            let config = platform.require::<Config>();

            config
                .load_from_string("peers:\n  replicas: 42", Some(SystemTime::now()))
                .unwrap();

            let mut change_notifier = config.notifier();
            let (tx, rx) = tokio::sync::oneshot::channel();
            crate::spawn!(async move {
                if change_notifier.recv().await.is_ok() {
                    let _ = tx.send(());
                }
            });

            // A malformed config is rejected and the previous one remains active...
            assert_eq!(
                config
                    .load_from_string("peers: 'invalid", Some(SystemTime::now()))
                    .is_err(),
                true
            );
            assert_eq!(
                config.current().query("peers.replicas").as_i64().unwrap(),
                42
            );

            config
                .load_from_string("peers:\n  replicas: 4242", Some(SystemTime::now()))
                .unwrap();
            assert_eq!(rx.await.is_ok(), true);
            assert_eq!(
                config.current().query("peers.replicas").as_i64().unwrap(),
                4242
            );
        });
    }

    #[test]
    fn missing_paths_yield_bad_values() {
        let config = Config::new("unused.yml");
        assert_eq!(config.current().query("server.port").is_badvalue(), true);

        config
            .load_from_string("server:\n  host: 127.0.0.1", None)
            .unwrap();
        assert_eq!(
            config.current().query("server.host").as_str(),
            Some("127.0.0.1")
        );
        assert_eq!(config.current().query("server.port").as_i64(), None);
        assert_eq!(config.current().query("server.host.port").is_badvalue(), true);
    }
}

use std::sync::Arc;

use peercache::builder::Builder;
use peercache::config::Config;
use peercache::peers::http::HttpPool;
use peercache::registry::GroupRegistry;
use peercache::server::Server;

use crate::loader::DirectoryLoader;

mod loader;

#[tokio::main]
async fn main() {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Create one group per entry in "groups" and connect it to the other nodes...
    let config = platform.require::<Config>();
    let registry = platform.require::<GroupRegistry>();
    let pool = platform.require::<HttpPool>();

    let handle = config.current();
    if let Some(groups) = handle.query("groups").as_hash() {
        for (name, settings) in groups {
            let name = match name.as_str() {
                Some(name) => name,
                None => continue,
            };

            let max_memory = match settings["max_memory"].as_str() {
                Some(size) => match peercache::fmt::parse_size(size) {
                    Ok(size) => size,
                    Err(error) => {
                        log::error!("Invalid max_memory for group {}: {:#}", name, error);
                        continue;
                    }
                },
                None => settings["max_memory"].as_i64().unwrap_or(0),
            };
            let directory = settings["directory"]
                .as_str()
                .map(|directory| directory.to_owned())
                .unwrap_or_else(|| format!("data/{}", name));

            let group = registry.create(
                name,
                max_memory,
                Arc::new(DirectoryLoader::new(directory)),
            );
            group.register_peers(pool.clone());
        }
    }

    if registry.groups().is_empty() {
        log::warn!("No groups have been configured. Add some in config/settings.yml...");
    }

    platform.require::<Server>().event_loop().await;
}

//! Keeps track of all groups known to a node.
//!
//! The registry is created once during startup (see [Builder](crate::builder::Builder)) and
//! installed into the [Platform](crate::platform::Platform), where the server and the
//! application itself can look it up. Groups are created via [create](GroupRegistry::create) and
//! live as long as the registry (or anyone still holding an **Arc** of them).
//!
//! # Example
//!
//! ```
//! # use peercache::registry::GroupRegistry;
//! # use peercache::group::loader_fn;
//! # use peercache::platform::Platform;
//! # use std::sync::Arc;
//! let platform = Platform::new();
//! let registry = GroupRegistry::install(&platform);
//!
//! let _ = registry.create("scores", 2048, Arc::new(loader_fn(|_: &str| Ok(b"111".to_vec()))));
//!
//! let registry = platform.require::<GroupRegistry>();
//! assert_eq!(registry.lookup("scores").unwrap().name(), "scores");
//! assert_eq!(registry.lookup("unknown").is_none(), true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::group::{Group, Loader};
use crate::platform::Platform;

/// Maps group names to groups.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        GroupRegistry::default()
    }

    /// Creates a new registry and registers it in the given platform.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let registry = Arc::new(GroupRegistry::new());
        platform.register::<GroupRegistry>(registry.clone());

        registry
    }

    /// Creates a new group and makes it visible to [lookup](GroupRegistry::lookup).
    ///
    /// If there is already a group with the same name, it is replaced (and a warning is logged).
    /// Callers which still hold the previous group can continue to use it.
    pub fn create(
        &self,
        name: impl Into<String>,
        max_memory: i64,
        loader: Arc<dyn Loader>,
    ) -> Arc<Group> {
        let name = name.into();
        let group = Arc::new(Group::new(name.clone(), max_memory, loader));

        let previous = self
            .groups
            .write()
            .unwrap()
            .insert(name.clone(), group.clone());
        if previous.is_some() {
            log::warn!("Group {} has been created twice. Replacing it...", name);
        } else {
            log::info!("Created group {}...", name);
        }

        group
    }

    /// Returns the group with the given name.
    pub fn lookup(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Lists all groups ordered by their name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self.groups.read().unwrap().values().cloned().collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));

        groups
    }
}

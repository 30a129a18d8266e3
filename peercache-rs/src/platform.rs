//! Provides a tiny DI like container through which all components of a node find each other.
//!
//! The platform keeps one **Arc<T>** per service type, e.g. the [Config](crate::config::Config),
//! the [GroupRegistry](crate::registry::GroupRegistry), the
//! [HttpPool](crate::peers::http::HttpPool) and the [Server](crate::server::Server). It also
//! carries the central **is_running** flag which is toggled to *false* once
//! [Platform::terminate](Platform::terminate) is invoked, which makes all background loops exit.
//!
//! Once terminated, all services are released. Code which might run after a shutdown has been
//! initiated should therefore use [Platform::find](Platform::find) instead of
//! [Platform::require](Platform::require).
//!
//! # Example
//!
//! ```
//! # use peercache::platform::Platform;
//! # use peercache::registry::GroupRegistry;
//! # use std::sync::Arc;
//! let platform = Platform::new();
//! platform.register::<GroupRegistry>(Arc::new(GroupRegistry::new()));
//!
//! assert_eq!(platform.require::<GroupRegistry>().groups().len(), 0);
//! assert_eq!(platform.is_running(), true);
//!
//! platform.terminate();
//! assert_eq!(platform.find::<GroupRegistry>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps all central services of a node in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and running platform without any services.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a service, replacing any previously registered service of the same type.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    ///
    /// # Example
    /// ```
    /// # use peercache::platform::Platform;
    /// # use peercache::config::Config;
    /// # use std::sync::Arc;
    /// let platform = Platform::new();
    /// assert_eq!(platform.find::<Config>().is_none(), true);
    ///
    /// platform.register::<Config>(Arc::new(Config::new("settings.yml")));
    /// assert_eq!(platform.find::<Config>().is_some(), true);
    /// ```
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a service which is known to be present.
    ///
    /// # Panics
    /// Panics if the requested service isn't available or if the platform is already shutting
    /// down.
    ///
    /// ```should_panic
    /// # use peercache::platform::Platform;
    /// # use peercache::server::Server;
    /// let platform = Platform::new();
    ///
    /// // This will panic as no server has been installed...
    /// platform.require::<Server>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the node is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all services and toggles [is_running()](Platform::is_running) to **false**.
    pub fn terminate(&self) {
        self.services.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

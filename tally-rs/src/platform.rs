//! Provides a tiny DI like container which exposes all central components of the system.
//!
//! Instead of caching store clients in thread locals, every component (ledger, counter cache,
//! ranking aggregator, ballot box...) is created once, wrapped in an **Arc** and registered here.
//! Request handlers then obtain the components they need from the platform.
//!
//! The platform also keeps the central **is_running** flag which is toggled to *false* once
//! [Platform::terminate](Platform::terminate) is invoked. At this point all registered components
//! are released so that their connections are closed. Code which might run after termination
//! should therefore use [Platform::find](Platform::find) and handle the **None** case gracefully.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use tally::platform::Platform;
//! struct Quota {
//!     votes: i64
//! }
//!
//! let platform = Platform::new();
//! platform.register::<Quota>(Arc::new(Quota { votes: 5 }));
//!
//! assert_eq!(platform.require::<Quota>().votes, 5);
//! assert_eq!(platform.is_running(), true);
//!
//! platform.terminate();
//! assert_eq!(platform.find::<Quota>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps all central components of the system in a single place.
pub struct Platform {
    components: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and empty platform which is considered running.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            components: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a component.
    ///
    /// Components are keyed by their type, therefore registering another instance of the same type
    /// replaces the previous one.
    pub fn register<T>(&self, component: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .components
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), component);
    }

    /// Tries to resolve a previously registered component.
    ///
    /// Optional components (like the counter cache, which can be disabled in the config) are
    /// resolved this way.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.components
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a component which is known to be present.
    ///
    /// # Panics
    /// Panics if the requested component isn't available or if the platform is already shutting
    /// down.
    ///
    /// ```should_panic
    /// # use tally::platform::Platform;
    /// struct Unknown;
    ///
    /// let platform = Platform::new();
    /// platform.require::<Unknown>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(component) => component,
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
    /// Releases all components (and thereby their pooled connections) and toggles the
    /// [is_running()](Platform::is_running) flag to **false**.
    pub fn terminate(&self) {
        self.components.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::platform::Platform;
    use std::sync::Arc;

    struct Ledger {
        rows: usize,
    }

    struct Counters;

    #[test]
    fn components_are_resolved_by_type() {
        let platform = Platform::new();
        platform.register(Arc::new(Ledger { rows: 3 }));

        assert_eq!(platform.require::<Ledger>().rows, 3);
        assert_eq!(platform.find::<Counters>().is_none(), true);

        platform.register(Arc::new(Ledger { rows: 7 }));
        assert_eq!(platform.require::<Ledger>().rows, 7);
    }

    #[test]
    fn terminate_releases_all_components() {
        let platform = Platform::new();
        let ledger = Arc::new(Ledger { rows: 0 });
        platform.register(ledger.clone());
        assert_eq!(Arc::strong_count(&ledger), 2);

        platform.terminate();

        assert_eq!(Arc::strong_count(&ledger), 1);
        assert_eq!(platform.is_running(), false);
    }
}

//! Process-scoped registry of served collections
//!
//! Collections are created on first attach and live until `close_all`.
//! Lookup-or-create runs under one lock, so two connections racing to
//! attach to the same new name cannot create two collections, and the
//! first (type, combinator) bound to a name stays bound.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{CollectionIdentity, Combinator, StrataResult};
use strata_storage::{CachingPolicy, ChangeListener, Collection, CollectionFactory};
use tracing::{info, warn};

/// Name -> collection map shared by all connections
pub struct CollectionRegistry {
    collections: Mutex<HashMap<String, Arc<dyn Collection>>>,
    factory: Arc<dyn CollectionFactory>,
    policy: CachingPolicy,
    /// Registered on every collection this registry creates
    listener: Arc<dyn ChangeListener>,
}

impl CollectionRegistry {
    /// Create an empty registry
    pub fn new(
        factory: Arc<dyn CollectionFactory>,
        policy: CachingPolicy,
        listener: Arc<dyn ChangeListener>,
    ) -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            factory,
            policy,
            listener,
        }
    }

    /// Return the collection bound to `identity.name`, creating it if new
    ///
    /// # Errors
    ///
    /// Returns `IdentityConflict` if the name is bound to a different value
    /// type or combinator, or the factory's error if creation fails.
    pub fn attach(
        &self,
        identity: CollectionIdentity,
        combinator: Arc<dyn Combinator>,
    ) -> StrataResult<Arc<dyn Collection>> {
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(&identity.name) {
            existing.identity().ensure_compatible(&identity)?;
            return Ok(Arc::clone(existing));
        }

        let collection = self.factory.create(identity, combinator, self.policy)?;
        collection.register_listener(Arc::clone(&self.listener));
        info!(
            target: "strata::server",
            collection = %collection.identity(),
            "Created collection"
        );
        collections.insert(collection.name().to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Collection bound to `name`, if any
    pub fn get(&self, name: &str) -> Option<Arc<dyn Collection>> {
        self.collections.lock().get(name).cloned()
    }

    /// Names of all collections, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of collections
    pub fn len(&self) -> usize {
        self.collections.lock().len()
    }

    /// True if no collection was created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every collection and forget it
    pub fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn Collection>)> =
            self.collections.lock().drain().collect();
        for (name, collection) in drained {
            if let Err(e) = collection.close() {
                warn!(
                    target: "strata::server",
                    collection = %name,
                    error = %e,
                    "Failed to close collection"
                );
            }
        }
    }
}

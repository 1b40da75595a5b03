//! Storage engine contract
//!
//! This module defines the `Collection` trait that the remote server and the
//! secondary index consume. It enables swapping the in-memory reference
//! engine for a persistent one without touching the upper layers.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync). A single call is atomic with
//! respect to other calls on the same collection; nothing stronger is
//! promised across calls.

use crate::hub::{ChangeListener, ListenerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{CollectionIdentity, Combinator, Key, StrataResult, Value, ValueType};

/// A stored (key, value) pair
pub type KeyValue = (Key, Value);

/// Single-pass stream of stored pairs
pub type KeyValueIter = Box<dyn Iterator<Item = KeyValue> + Send>;

/// Single-pass stream of stored keys
pub type KeyIter = Box<dyn Iterator<Item = Key> + Send>;

/// How a collection serves reads and membership tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingPolicy {
    /// Serve point reads from the unflushed write buffer (read-your-writes)
    #[serde(default = "default_true")]
    pub cached_reads: bool,
    /// Answer `might_contain` from a probabilistic membership filter
    #[serde(default = "default_true")]
    pub bloom_filter: bool,
}

fn default_true() -> bool {
    true
}

impl CachingPolicy {
    /// Cached reads plus a membership filter (the remote server's policy)
    pub fn cached_and_bloom() -> Self {
        Self {
            cached_reads: true,
            bloom_filter: true,
        }
    }

    /// No read cache, exact membership tests
    pub fn direct() -> Self {
        Self {
            cached_reads: false,
            bloom_filter: false,
        }
    }
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self::cached_and_bloom()
    }
}

/// Named, typed key-value collection with merge-on-conflict writes
pub trait Collection: Send + Sync {
    /// Identity triple this collection was created with
    fn identity(&self) -> &CollectionIdentity;

    /// Collection name
    fn name(&self) -> &str {
        &self.identity().name
    }

    /// Type of every stored value
    fn value_type(&self) -> ValueType {
        self.identity().value_type
    }

    /// Read the current value for a key
    ///
    /// Returns None if the key is absent.
    fn read(&self, key: Key) -> StrataResult<Option<Value>>;

    /// Read every key produced by `keys`, skipping absent ones
    ///
    /// Keys are pulled lazily; the first `Err` from the stream aborts the
    /// read and is returned. Output order need not match input order.
    fn read_many(
        &self,
        keys: &mut dyn Iterator<Item = StrataResult<Key>>,
    ) -> StrataResult<Vec<KeyValue>> {
        let mut found = Vec::new();
        for key in keys {
            let key = key?;
            if let Some(value) = self.read(key)? {
                found.push((key, value));
            }
        }
        Ok(found)
    }

    /// Write a value, merging with any value already present for the key
    ///
    /// # Errors
    ///
    /// Returns `ReservedKey` for sentinel keys and `TypeMismatch` for values
    /// of the wrong type. Nothing is stored in either case.
    fn write(&self, key: Key, value: Value) -> StrataResult<()>;

    /// Write every pair produced by `entries`, returning how many were written
    ///
    /// Pairs for the same key merge in stream order, exactly as repeated
    /// `write` calls would.
    fn write_many(
        &self,
        entries: &mut dyn Iterator<Item = StrataResult<KeyValue>>,
    ) -> StrataResult<u64> {
        let mut written = 0;
        for entry in entries {
            let (key, value) = entry?;
            self.write(key, value)?;
            written += 1;
        }
        Ok(written)
    }

    /// Remove a key (takes effect for iteration at the next flush)
    fn remove(&self, key: Key) -> StrataResult<()>;

    /// Iterate every flushed pair
    fn iter(&self) -> StrataResult<KeyValueIter>;

    /// Iterate every flushed key
    fn iter_keys(&self) -> StrataResult<KeyIter>;

    /// Iterate flushed pairs whose key satisfies `filter`
    fn iter_filtered(&self, filter: &dyn Fn(Key) -> bool) -> StrataResult<KeyValueIter>;

    /// Irreversibly remove all data
    fn drop_all(&self) -> StrataResult<()>;

    /// Make pending writes visible to iteration and notify listeners
    fn flush(&self) -> StrataResult<()>;

    /// Cheap size estimate
    fn approximate_size(&self) -> u64;

    /// Exact number of flushed entries (full scan)
    fn exact_size(&self) -> StrataResult<u64>;

    /// Probabilistic membership test: false positives allowed, false negatives never
    fn might_contain(&self, key: Key) -> StrataResult<bool>;

    /// Marker that advances whenever a flush changes visible contents
    fn last_flush(&self) -> u64;

    /// Register a listener for changed-key batches
    fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId;

    /// Remove a listener; returns false if it was not registered
    fn deregister_listener(&self, id: ListenerId) -> bool;

    /// Release the collection; later calls fail with `Closed`
    fn close(&self) -> StrataResult<()>;
}

/// Creates collections for a given identity
pub trait CollectionFactory: Send + Sync {
    /// Create a new, empty collection
    fn create(
        &self,
        identity: CollectionIdentity,
        combinator: Arc<dyn Combinator>,
        policy: CachingPolicy,
    ) -> StrataResult<Arc<dyn Collection>>;
}

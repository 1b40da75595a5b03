//! Self-maintaining secondary index
//!
//! A `SecondaryIndex` keeps a derived mapping "index key -> posting list of
//! primary keys" for one primary collection, stored in a collection of its
//! own whose combinator is `append`.
//!
//! ## Staleness protocol
//!
//! Every read first checks the primary's flush marker against the marker
//! recorded at the last rebuild. On mismatch the index is rebuilt from
//! scratch:
//!
//! 1. drop all index data
//! 2. capture the primary's flush marker *before* scanning
//! 3. scan every primary pair and append its key to the posting list of
//!    each index key the indexer produces
//! 4. flush the index and persist the captured marker
//!
//! Writes landing during the scan advance the primary's marker past the
//! captured one, so the next read rebuilds again instead of losing them.
//!
//! ## Locking
//!
//! The marker lives in a `RwLock`. A read takes an upgradable lock to check
//! it, upgrades to exclusive for a rebuild, then downgrades and keeps a
//! shared lock while it resolves keys. Readers never observe a partial
//! rebuild, concurrent readers of a fresh index proceed in parallel, and
//! only one rebuild runs at a time.
//!
//! A failed rebuild leaves the marker unset, so the next read retries.

use crate::indexer::Indexer;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    AppendCombinator, CollectionIdentity, Combinator, Key, PostingList, StrataResult, Value,
    ValueType,
};
use strata_storage::{CachingPolicy, Collection, CollectionFactory, MetaStore};
use tracing::{debug, info, warn};

/// Meta store key under which the rebuild marker is persisted
pub const LAST_SYNC_KEY: &str = "last.sync";

/// Derived index over one primary collection
pub struct SecondaryIndex {
    name: String,
    primary: Arc<dyn Collection>,
    index: Arc<dyn Collection>,
    indexer: Arc<dyn Indexer>,
    meta: Arc<dyn MetaStore>,
    /// Primary flush marker at the last completed rebuild
    last_sync: RwLock<Option<u64>>,
    rebuilds: AtomicU64,
}

impl SecondaryIndex {
    /// Open an index named `name` over `primary`
    ///
    /// The index data lives in a collection created by `factory` with
    /// identity `(name, posting_list, append)`. The last rebuild marker is
    /// loaded from `meta`, so a restart with persistent storage does not
    /// rebuild unless the primary flushed in between. The marker is ignored
    /// when the index store has never flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the index collection cannot be created or the
    /// marker cannot be read.
    pub fn open(
        name: impl Into<String>,
        factory: &dyn CollectionFactory,
        primary: Arc<dyn Collection>,
        indexer: Arc<dyn Indexer>,
        meta: Arc<dyn MetaStore>,
    ) -> StrataResult<Self> {
        let name = name.into();
        let combinator: Arc<dyn Combinator> = Arc::new(AppendCombinator);
        let index = factory.create(
            CollectionIdentity::new(name.clone(), ValueType::PostingList, combinator.id()),
            combinator,
            CachingPolicy::direct(),
        )?;
        // The marker only describes index data that survived; a store that
        // never flushed holds none, so it starts out stale
        let last_sync = match meta.get_u64(&name, LAST_SYNC_KEY)? {
            Some(marker) if index.last_flush() == 0 => {
                debug!(
                    target: "strata::index",
                    index = %name,
                    marker,
                    "Ignoring persisted marker for an empty index store"
                );
                None
            }
            persisted => persisted,
        };
        Ok(Self {
            name,
            primary,
            index,
            indexer,
            meta,
            last_sync: RwLock::new(last_sync),
            rebuilds: AtomicU64::new(0),
        })
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection this index is derived from
    pub fn primary(&self) -> &Arc<dyn Collection> {
        &self.primary
    }

    /// Primary flush marker at the last completed rebuild
    pub fn last_sync(&self) -> Option<u64> {
        *self.last_sync.read()
    }

    /// Number of rebuilds completed by this instance
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    /// Values whose index keys overlap those of `example`
    pub fn read_by_example(&self, example: &Value) -> StrataResult<Vec<Value>> {
        let _fresh = self.ensure_index_up_to_date()?;
        let mut primary_keys = FxHashSet::default();
        for index_key in self.indexer.index_keys(example) {
            if let Some(list) = self.read_posting_list(index_key)? {
                primary_keys.extend(list);
            }
        }
        self.resolve_set(&primary_keys)
    }

    /// Values listed under any index key accepted by `filter`
    pub fn read_matching(&self, filter: &dyn Fn(Key) -> bool) -> StrataResult<Vec<Value>> {
        let _fresh = self.ensure_index_up_to_date()?;
        let mut primary_keys = FxHashSet::default();
        for (_, value) in self.index.iter_filtered(filter)? {
            if let Some(list) = value.into_posting_list() {
                primary_keys.extend(list);
            }
        }
        self.resolve_set(&primary_keys)
    }

    /// Values listed under one index key (fast path)
    pub fn read_by_index_key(&self, index_key: Key) -> StrataResult<Vec<Value>> {
        let _fresh = self.ensure_index_up_to_date()?;
        let mut values = Vec::new();
        let Some(list) = self.read_posting_list(index_key)? else {
            return Ok(values);
        };
        let mut seen = FxHashSet::default();
        for key in list {
            if !seen.insert(key) {
                continue;
            }
            if let Some(value) = self.primary.read(key)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Release the index's own storage; the primary is untouched
    pub fn close(&self) -> StrataResult<()> {
        self.index.close()
    }

    fn read_posting_list(&self, index_key: Key) -> StrataResult<Option<PostingList>> {
        Ok(self
            .index
            .read(index_key)?
            .and_then(Value::into_posting_list))
    }

    /// Resolve primary keys to their current values, skipping removed ones
    fn resolve_set(&self, keys: &FxHashSet<Key>) -> StrataResult<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let values: Vec<Value> = self
            .primary
            .iter_filtered(&|key| keys.contains(&key))?
            .map(|(_, value)| value)
            .collect();
        info!(
            target: "strata::index",
            index = %self.name,
            keys = keys.len(),
            found = values.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Resolved indexed values"
        );
        Ok(values)
    }

    /// Rebuild if the primary flushed since the last rebuild
    ///
    /// Returns a shared guard that keeps rebuilds out while the caller reads.
    fn ensure_index_up_to_date(&self) -> StrataResult<RwLockReadGuard<'_, Option<u64>>> {
        let guard = self.last_sync.upgradable_read();
        if *guard == Some(self.primary.last_flush()) {
            return Ok(RwLockUpgradableReadGuard::downgrade(guard));
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        info!(
            target: "strata::index",
            index = %self.name,
            "Index out of date, rebuilding"
        );
        let start = Instant::now();
        match self.rebuild() {
            Ok(marker) => {
                *guard = Some(marker);
                self.rebuilds.fetch_add(1, Ordering::AcqRel);
                info!(
                    target: "strata::index",
                    index = %self.name,
                    marker,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Rebuilt index"
                );
                Ok(RwLockWriteGuard::downgrade(guard))
            }
            Err(e) => {
                *guard = None;
                warn!(
                    target: "strata::index",
                    index = %self.name,
                    error = %e,
                    "Index rebuild failed"
                );
                Err(e)
            }
        }
    }

    /// Full rebuild; returns the primary marker the new contents reflect
    fn rebuild(&self) -> StrataResult<u64> {
        self.index.drop_all()?;
        let marker = self.primary.last_flush();
        let mut index_keys = Vec::new();
        for (key, value) in self.primary.iter()? {
            index_keys.clear();
            index_keys.extend(self.indexer.index_keys(&value));
            index_keys.sort_unstable();
            index_keys.dedup();
            for index_key in &index_keys {
                self.index
                    .write(*index_key, Value::PostingList(PostingList::single(key)))?;
            }
        }
        self.index.flush()?;
        self.meta.put_u64(&self.name, LAST_SYNC_KEY, marker)?;
        Ok(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::FirstCharIndexer;
    use strata_core::OverwriteCombinator;
    use strata_storage::{MemoryCollection, MemoryCollectionFactory, MemoryMetaStore};

    fn users() -> Arc<dyn Collection> {
        Arc::new(MemoryCollection::new(
            CollectionIdentity::new("users", ValueType::String, "overwrite"),
            Arc::new(OverwriteCombinator),
            CachingPolicy::default(),
        ))
    }

    fn open(primary: Arc<dyn Collection>, meta: Arc<dyn MetaStore>) -> SecondaryIndex {
        SecondaryIndex::open(
            "users_by_initial",
            &MemoryCollectionFactory::new(),
            primary,
            Arc::new(FirstCharIndexer),
            meta,
        )
        .unwrap()
    }

    fn sorted(mut values: Vec<Value>) -> Vec<String> {
        let mut names: Vec<String> = values
            .drain(..)
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_first_read_rebuilds_even_when_empty() {
        let index = open(users(), Arc::new(MemoryMetaStore::new()));
        assert_eq!(index.last_sync(), None);
        assert!(index.read_by_index_key(1).unwrap().is_empty());
        assert_eq!(index.rebuild_count(), 1);
        assert_eq!(index.last_sync(), Some(0));
    }

    #[test]
    fn test_marker_is_persisted() {
        let primary = users();
        primary.write(1, Value::from("alice")).unwrap();
        primary.flush().unwrap();
        let meta = Arc::new(MemoryMetaStore::new());
        let index = open(Arc::clone(&primary), meta.clone());
        index.read_by_index_key(FirstCharIndexer::key_for('a')).unwrap();
        assert_eq!(
            meta.get_u64("users_by_initial", LAST_SYNC_KEY).unwrap(),
            Some(primary.last_flush())
        );
    }

    #[test]
    fn test_read_by_example_unions_posting_lists() {
        let primary = users();
        primary.write(1, Value::from("alice")).unwrap();
        primary.write(2, Value::from("bob")).unwrap();
        primary.write(3, Value::from("anna")).unwrap();
        primary.flush().unwrap();
        let index = open(primary, Arc::new(MemoryMetaStore::new()));

        let found = index.read_by_example(&Value::from("arthur")).unwrap();
        assert_eq!(sorted(found), vec!["alice", "anna"]);
    }

    #[test]
    fn test_read_matching_predicate() {
        let primary = users();
        primary.write(1, Value::from("alice")).unwrap();
        primary.write(2, Value::from("bob")).unwrap();
        primary.write(3, Value::from("carol")).unwrap();
        primary.flush().unwrap();
        let index = open(primary, Arc::new(MemoryMetaStore::new()));

        let b = FirstCharIndexer::key_for('b');
        let found = index.read_matching(&|k| k >= b).unwrap();
        assert_eq!(sorted(found), vec!["bob", "carol"]);
    }

    #[test]
    fn test_close_leaves_primary_untouched() {
        let primary = users();
        primary.write(1, Value::from("alice")).unwrap();
        primary.flush().unwrap();
        let index = open(Arc::clone(&primary), Arc::new(MemoryMetaStore::new()));
        index.read_by_index_key(FirstCharIndexer::key_for('a')).unwrap();
        index.close().unwrap();
        assert_eq!(primary.read(1).unwrap(), Some(Value::from("alice")));
        assert!(index.read_by_index_key(FirstCharIndexer::key_for('a')).is_err());
    }
}

//! In-memory reference engine
//!
//! `MemoryCollection` implements the full `Collection` contract on top of a
//! BTreeMap of flushed data plus a write buffer of pending writes.
//!
//! # Design
//!
//! - Writes merge into the buffer through the collection's combinator
//! - `flush()` folds the buffer into the flushed map, merging with values
//!   already there, advances the flush marker and publishes the changed keys
//! - Iteration and sizes only observe flushed data
//! - Point reads observe the buffer when `cached_reads` is set
//!
//! # Flush marker
//!
//! The marker is a millisecond wall-clock reading forced to be strictly
//! increasing, so markers from one process never repeat those of an earlier
//! process that flushed less recently. Zero means "never flushed".

use crate::bloom::BloomFilter;
use crate::collection::{
    CachingPolicy, Collection, CollectionFactory, KeyIter, KeyValue, KeyValueIter,
};
use crate::hub::{ChangeHub, ChangeListener, ListenerId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_core::{
    validate_key, CollectionIdentity, Combinator, Key, StrataError, StrataResult, Value,
};
use tracing::debug;

/// Default number of keys the membership filter is sized for
pub const DEFAULT_BLOOM_EXPECTED_ITEMS: usize = 100_000;
/// Default false positive rate of the membership filter
pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;

/// Unflushed write for one key
#[derive(Debug, Clone)]
enum PendingWrite {
    /// Merge into whatever is flushed
    Merge(Value),
    /// Replace whatever is flushed (a remove preceded it in this buffer)
    Replace(Value),
    /// Remove the flushed value
    Remove,
}

impl PendingWrite {
    fn resolve(
        &self,
        flushed: Option<&Value>,
        combinator: &dyn Combinator,
    ) -> StrataResult<Option<Value>> {
        match self {
            PendingWrite::Merge(value) => match flushed {
                Some(existing) => combinator
                    .combine(existing.clone(), value.clone())
                    .map(Some),
                None => Ok(Some(value.clone())),
            },
            PendingWrite::Replace(value) => Ok(Some(value.clone())),
            PendingWrite::Remove => Ok(None),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    flushed: BTreeMap<Key, Value>,
    pending: FxHashMap<Key, PendingWrite>,
    bloom: Option<BloomFilter>,
}

impl State {
    fn buffer(&mut self, key: Key, value: Value, combinator: &dyn Combinator) -> StrataResult<()> {
        let next = match self.pending.get(&key) {
            None => PendingWrite::Merge(value),
            Some(PendingWrite::Merge(existing)) => {
                PendingWrite::Merge(combinator.combine(existing.clone(), value)?)
            }
            Some(PendingWrite::Replace(existing)) => {
                PendingWrite::Replace(combinator.combine(existing.clone(), value)?)
            }
            Some(PendingWrite::Remove) => PendingWrite::Replace(value),
        };
        self.pending.insert(key, next);
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.insert(key);
        }
        Ok(())
    }
}

/// In-memory collection with a write buffer
pub struct MemoryCollection {
    identity: CollectionIdentity,
    combinator: Arc<dyn Combinator>,
    policy: CachingPolicy,
    state: RwLock<State>,
    /// Serializes flushes so change batches are published in flush order
    flush_lock: Mutex<()>,
    last_flush: AtomicU64,
    closed: AtomicBool,
    hub: ChangeHub,
}

impl MemoryCollection {
    /// Create an empty collection with a default-sized membership filter
    pub fn new(
        identity: CollectionIdentity,
        combinator: Arc<dyn Combinator>,
        policy: CachingPolicy,
    ) -> Self {
        Self::with_bloom_sizing(
            identity,
            combinator,
            policy,
            DEFAULT_BLOOM_EXPECTED_ITEMS,
            DEFAULT_BLOOM_FP_RATE,
        )
    }

    /// Create an empty collection with an explicitly sized membership filter
    pub fn with_bloom_sizing(
        identity: CollectionIdentity,
        combinator: Arc<dyn Combinator>,
        policy: CachingPolicy,
        expected_items: usize,
        fp_rate: f64,
    ) -> Self {
        let bloom = policy
            .bloom_filter
            .then(|| BloomFilter::new(expected_items, fp_rate));
        Self {
            identity,
            combinator,
            policy,
            state: RwLock::new(State {
                bloom,
                ..State::default()
            }),
            flush_lock: Mutex::new(()),
            last_flush: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            hub: ChangeHub::new(),
        }
    }

    /// Caching policy this collection was created with
    pub fn policy(&self) -> CachingPolicy {
        self.policy
    }

    /// Number of unflushed keys
    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    fn ensure_open(&self) -> StrataResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::closed(format!(
                "collection {}",
                self.identity.name
            )));
        }
        Ok(())
    }

    fn check_entry(&self, key: Key, value: &Value) -> StrataResult<()> {
        validate_key(key)?;
        self.identity.value_type.check(value)
    }

    fn advance_flush_marker(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut current = self.last_flush.load(Ordering::Acquire);
        loop {
            let next = now.max(current + 1);
            match self.last_flush.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn snapshot(&self, filter: Option<&dyn Fn(Key) -> bool>) -> Vec<KeyValue> {
        let state = self.state.read();
        state
            .flushed
            .iter()
            .filter(|(key, _)| filter.map_or(true, |f| f(**key)))
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }
}

impl Collection for MemoryCollection {
    fn identity(&self) -> &CollectionIdentity {
        &self.identity
    }

    fn read(&self, key: Key) -> StrataResult<Option<Value>> {
        self.ensure_open()?;
        let state = self.state.read();
        let flushed = state.flushed.get(&key);
        if self.policy.cached_reads {
            if let Some(pending) = state.pending.get(&key) {
                return pending.resolve(flushed, self.combinator.as_ref());
            }
        }
        Ok(flushed.cloned())
    }

    fn write(&self, key: Key, value: Value) -> StrataResult<()> {
        self.ensure_open()?;
        self.check_entry(key, &value)?;
        self.state
            .write()
            .buffer(key, value, self.combinator.as_ref())
    }

    fn write_many(
        &self,
        entries: &mut dyn Iterator<Item = StrataResult<KeyValue>>,
    ) -> StrataResult<u64> {
        self.ensure_open()?;
        // Pre-merge locally so a failing stream leaves the buffer untouched
        let mut batch: Vec<KeyValue> = Vec::new();
        let mut positions: FxHashMap<Key, usize> = FxHashMap::default();
        let mut written = 0u64;
        for entry in entries {
            let (key, value) = entry?;
            self.check_entry(key, &value)?;
            match positions.get(&key) {
                Some(&idx) => {
                    let existing = std::mem::replace(&mut batch[idx].1, Value::Bool(false));
                    batch[idx].1 = self.combinator.combine(existing, value)?;
                }
                None => {
                    positions.insert(key, batch.len());
                    batch.push((key, value));
                }
            }
            written += 1;
        }

        let mut state = self.state.write();
        for (key, value) in batch {
            state.buffer(key, value, self.combinator.as_ref())?;
        }
        Ok(written)
    }

    fn remove(&self, key: Key) -> StrataResult<()> {
        self.ensure_open()?;
        validate_key(key)?;
        self.state.write().pending.insert(key, PendingWrite::Remove);
        Ok(())
    }

    fn iter(&self) -> StrataResult<KeyValueIter> {
        self.ensure_open()?;
        Ok(Box::new(self.snapshot(None).into_iter()))
    }

    fn iter_keys(&self) -> StrataResult<KeyIter> {
        self.ensure_open()?;
        let keys: Vec<Key> = self.state.read().flushed.keys().copied().collect();
        Ok(Box::new(keys.into_iter()))
    }

    fn iter_filtered(&self, filter: &dyn Fn(Key) -> bool) -> StrataResult<KeyValueIter> {
        self.ensure_open()?;
        Ok(Box::new(self.snapshot(Some(filter)).into_iter()))
    }

    fn drop_all(&self) -> StrataResult<()> {
        self.ensure_open()?;
        let _flush = self.flush_lock.lock();
        let dropped: Vec<Key> = {
            let mut state = self.state.write();
            let mut keys: Vec<Key> = state.flushed.keys().copied().collect();
            keys.extend(state.pending.keys().copied());
            keys.sort_unstable();
            keys.dedup();
            state.flushed.clear();
            state.pending.clear();
            if let Some(bloom) = state.bloom.as_mut() {
                bloom.clear();
            }
            keys
        };
        let marker = self.advance_flush_marker();
        debug!(
            target: "strata::storage",
            collection = %self.identity.name,
            dropped = dropped.len(),
            marker,
            "Dropped all data"
        );
        if !dropped.is_empty() {
            self.hub.publish(&self.identity.name, &dropped);
        }
        Ok(())
    }

    fn flush(&self) -> StrataResult<()> {
        self.ensure_open()?;
        let _flush = self.flush_lock.lock();
        let changed: Vec<Key> = {
            let mut state = self.state.write();
            if state.pending.is_empty() {
                return Ok(());
            }
            // Resolve everything before mutating so a combinator failure
            // leaves both maps as they were
            let mut resolved = Vec::with_capacity(state.pending.len());
            for (key, pending) in state.pending.iter() {
                let value = pending.resolve(state.flushed.get(key), self.combinator.as_ref())?;
                resolved.push((*key, value));
            }
            state.pending.clear();
            let mut changed = Vec::with_capacity(resolved.len());
            for (key, value) in resolved {
                match value {
                    Some(value) => {
                        state.flushed.insert(key, value);
                    }
                    None => {
                        state.flushed.remove(&key);
                    }
                }
                changed.push(key);
            }
            changed.sort_unstable();
            changed
        };
        let marker = self.advance_flush_marker();
        debug!(
            target: "strata::storage",
            collection = %self.identity.name,
            changed = changed.len(),
            marker,
            "Flushed"
        );
        self.hub.publish(&self.identity.name, &changed);
        Ok(())
    }

    fn approximate_size(&self) -> u64 {
        let state = self.state.read();
        (state.flushed.len() + state.pending.len()) as u64
    }

    fn exact_size(&self) -> StrataResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().flushed.iter().count() as u64)
    }

    fn might_contain(&self, key: Key) -> StrataResult<bool> {
        self.ensure_open()?;
        let state = self.state.read();
        if let Some(bloom) = state.bloom.as_ref() {
            return Ok(bloom.might_contain(key));
        }
        let present = match state.pending.get(&key) {
            Some(PendingWrite::Remove) => false,
            Some(_) => true,
            None => state.flushed.contains_key(&key),
        };
        Ok(present)
    }

    fn last_flush(&self) -> u64 {
        self.last_flush.load(Ordering::Acquire)
    }

    fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.hub.register(listener)
    }

    fn deregister_listener(&self, id: ListenerId) -> bool {
        self.hub.deregister(id)
    }

    fn close(&self) -> StrataResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.clear();
            let mut state = self.state.write();
            state.flushed.clear();
            state.pending.clear();
        }
        Ok(())
    }
}

/// Factory for `MemoryCollection`s
#[derive(Debug, Clone)]
pub struct MemoryCollectionFactory {
    bloom_expected_items: usize,
    bloom_fp_rate: f64,
}

impl MemoryCollectionFactory {
    /// Factory with default membership filter sizing
    pub fn new() -> Self {
        Self::with_bloom_sizing(DEFAULT_BLOOM_EXPECTED_ITEMS, DEFAULT_BLOOM_FP_RATE)
    }

    /// Factory with explicit membership filter sizing
    pub fn with_bloom_sizing(expected_items: usize, fp_rate: f64) -> Self {
        Self {
            bloom_expected_items: expected_items,
            bloom_fp_rate: fp_rate,
        }
    }
}

impl Default for MemoryCollectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionFactory for MemoryCollectionFactory {
    fn create(
        &self,
        identity: CollectionIdentity,
        combinator: Arc<dyn Combinator>,
        policy: CachingPolicy,
    ) -> StrataResult<Arc<dyn Collection>> {
        if combinator.id() != identity.combinator {
            return Err(StrataError::UnknownCombinator(format!(
                "{} (factory produced {})",
                identity.combinator,
                combinator.id()
            )));
        }
        Ok(Arc::new(MemoryCollection::with_bloom_sizing(
            identity,
            combinator,
            policy,
            self.bloom_expected_items,
            self.bloom_fp_rate,
        )))
    }
}

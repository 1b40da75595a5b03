//! Pluggable indexing functions

use strata_core::{Key, Value};

/// Maps a stored value to the index keys it belongs to
///
/// Must be deterministic: the same value always yields the same index keys,
/// otherwise lookups by example disagree with what a rebuild stored.
/// Returned keys must be legal application keys.
pub trait Indexer: Send + Sync {
    /// Index keys for `value` (may be empty, duplicates are ignored)
    fn index_keys(&self, value: &Value) -> Vec<Key>;
}

impl<F> Indexer for F
where
    F: Fn(&Value) -> Vec<Key> + Send + Sync,
{
    fn index_keys(&self, value: &Value) -> Vec<Key> {
        self(value)
    }
}

/// Indexes strings by their first character (lowercased)
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstCharIndexer;

impl FirstCharIndexer {
    /// Index key used for strings starting with `c`
    pub fn key_for(c: char) -> Key {
        c.to_lowercase().next().unwrap_or(c) as Key
    }
}

impl Indexer for FirstCharIndexer {
    fn index_keys(&self, value: &Value) -> Vec<Key> {
        value
            .as_str()
            .and_then(|s| s.chars().next())
            .map(|c| vec![Self::key_for(c)])
            .unwrap_or_default()
    }
}

//! Posting lists for secondary indexes
//!
//! A posting list is the set of primary keys associated with one index key.
//! Order is irrelevant and duplicates are tolerated: merging two posting
//! lists is plain concatenation, so callers must deduplicate if they care.

use crate::key::Key;
use serde::{Deserialize, Serialize};

/// Unordered, duplicate-tolerant list of primary keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingList {
    keys: Vec<Key>,
}

impl PostingList {
    /// Create an empty posting list
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Create a posting list holding a single key
    pub fn single(key: Key) -> Self {
        Self { keys: vec![key] }
    }

    /// Append all keys of `other`
    pub fn append(&mut self, other: PostingList) {
        self.keys.extend(other.keys);
    }

    /// Concatenate two posting lists
    pub fn concat(mut self, other: PostingList) -> Self {
        self.append(other);
        self
    }

    /// Keys in insertion order, duplicates included
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Number of entries, duplicates included
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check if a key is listed
    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }
}

impl From<Vec<Key>> for PostingList {
    fn from(keys: Vec<Key>) -> Self {
        Self { keys }
    }
}

impl IntoIterator for PostingList {
    type Item = Key;
    type IntoIter = std::vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a PostingList {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

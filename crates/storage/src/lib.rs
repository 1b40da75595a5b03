//! Storage layer for Strata remote collections
//!
//! This crate defines the storage engine contract and its collaborators:
//! - Collection: named, typed key-value collection with merge-on-conflict writes
//! - CollectionFactory: creates collections for a (name, type, combinator) identity
//! - ChangeHub: ordered listener registry notified with changed keys per flush
//! - MetaStore: scalar markers persisted next to derived data
//! - MemoryCollection: in-memory reference engine with a write buffer
//! - BloomFilter: membership filter backing `might_contain`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bloom;
pub mod collection;
pub mod hub;
pub mod memory;
pub mod meta;

pub use bloom::BloomFilter;
pub use collection::{
    CachingPolicy, Collection, CollectionFactory, KeyIter, KeyValue, KeyValueIter,
};
pub use hub::{ChangeHub, ChangeListener, ListenerId};
pub use memory::{MemoryCollection, MemoryCollectionFactory};
pub use meta::{FileMetaStore, MemoryMetaStore, MetaStore};

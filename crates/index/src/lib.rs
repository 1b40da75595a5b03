//! Secondary indexes for Strata remote collections
//!
//! A secondary index maps values of a primary collection to "index keys"
//! through a user-supplied [`Indexer`] and answers lookups by example, by
//! index-key predicate, or by a single index key. The index maintains
//! itself: each read compares the primary's flush marker with the marker
//! recorded at the last rebuild and rebuilds from scratch when they differ.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index;
pub mod indexer;

pub use index::{SecondaryIndex, LAST_SYNC_KEY};
pub use indexer::{FirstCharIndexer, Indexer};

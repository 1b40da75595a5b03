//! Core types and traits for Strata remote collections
//!
//! This crate defines the foundational types used throughout the system:
//! - Key: 64-bit application key and the reserved protocol sentinels
//! - Value / ValueType: stored payloads and the per-collection type tag
//! - PostingList: primary keys associated with one secondary-index key
//! - Combinator: the merge contract for writes landing on the same key
//! - TypeRegistry: handshake identifiers -> value types and combinators
//! - CollectionIdentity: the immutable (name, type, combinator) triple
//! - Limits: bounds applied when decoding untrusted length prefixes
//! - StrataError: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod combinator;
pub mod error;
pub mod identity;
pub mod key;
pub mod limits;
pub mod posting;
pub mod registry;
pub mod value;

pub use combinator::{
    AppendCombinator, Combinator, MaxCombinator, OrCombinator, OverwriteCombinator, SumCombinator,
};
pub use error::{StrataError, StrataResult};
pub use identity::CollectionIdentity;
pub use key::{validate_key, Key, MAX_APPLICATION_KEY};
pub use limits::Limits;
pub use posting::PostingList;
pub use registry::TypeRegistry;
pub use value::{Value, ValueType};

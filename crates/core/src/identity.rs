//! Collection identity
//!
//! A collection is identified by the triple (name, value type, combinator).
//! Once a name is bound, the binding is immutable for the lifetime of the
//! process.

use crate::error::{StrataError, StrataResult};
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// (name, value type, combinator) triple of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionIdentity {
    /// Collection name
    pub name: String,
    /// Type of every stored value
    pub value_type: ValueType,
    /// Identifier of the merge function
    pub combinator: String,
}

impl CollectionIdentity {
    /// Create an identity
    pub fn new(name: impl Into<String>, value_type: ValueType, combinator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type,
            combinator: combinator.into(),
        }
    }

    /// Check that `requested` may attach to a collection bound to `self`
    ///
    /// # Errors
    ///
    /// Returns `IdentityConflict` if the value type or combinator differs.
    pub fn ensure_compatible(&self, requested: &CollectionIdentity) -> StrataResult<()> {
        if self.value_type != requested.value_type || self.combinator != requested.combinator {
            return Err(StrataError::IdentityConflict {
                name: self.name.clone(),
                existing_type: self.value_type.id().to_string(),
                existing_combinator: self.combinator.clone(),
                requested_type: requested.value_type.id().to_string(),
                requested_combinator: requested.combinator.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for CollectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}, {}>", self.name, self.value_type, self.combinator)
    }
}

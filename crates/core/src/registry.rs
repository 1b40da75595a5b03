//! Type registry for handshake identifiers
//!
//! Remote clients name the value type and the combinator of a collection by
//! string identifier. The registry resolves those identifiers to a
//! `ValueType` and a combinator factory. It is populated once at process
//! start; unknown identifiers are rejected with a typed error.
//!
//! ## Usage
//!
//! ```
//! use strata_core::registry::TypeRegistry;
//!
//! let registry = TypeRegistry::with_defaults();
//! let value_type = registry.value_type("string").unwrap();
//! let combinator = registry.combinator("overwrite").unwrap();
//! assert_eq!(combinator.id(), "overwrite");
//! assert!(registry.value_type("java.lang.String").is_err());
//! # let _ = value_type;
//! ```

use crate::combinator::{
    AppendCombinator, Combinator, MaxCombinator, OrCombinator, OverwriteCombinator, SumCombinator,
};
use crate::error::{StrataError, StrataResult};
use crate::value::ValueType;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates a fresh combinator instance
pub type CombinatorFactory = Box<dyn Fn() -> Arc<dyn Combinator> + Send + Sync>;

/// Registry of value types and combinators by identifier
///
/// Maintains mappings from:
/// - value type identifier -> `ValueType`
/// - combinator identifier -> factory
pub struct TypeRegistry {
    value_types: HashMap<String, ValueType>,
    combinators: HashMap<String, CombinatorFactory>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        TypeRegistry {
            value_types: HashMap::new(),
            combinators: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in value type and combinator
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for value_type in ValueType::ALL {
            registry.register_value_type(value_type.id(), value_type);
        }
        registry.register_combinator("overwrite", || Arc::new(OverwriteCombinator));
        registry.register_combinator("sum", || Arc::new(SumCombinator));
        registry.register_combinator("max", || Arc::new(MaxCombinator));
        registry.register_combinator("append", || Arc::new(AppendCombinator));
        registry.register_combinator("or", || Arc::new(OrCombinator));
        registry
    }

    /// Register a value type under an identifier (aliases allowed)
    pub fn register_value_type(&mut self, id: impl Into<String>, value_type: ValueType) {
        self.value_types.insert(id.into(), value_type);
    }

    /// Register a combinator factory under an identifier
    pub fn register_combinator<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Combinator> + Send + Sync + 'static,
    {
        self.combinators.insert(id.into(), Box::new(factory));
    }

    /// Resolve a value type identifier
    pub fn value_type(&self, id: &str) -> StrataResult<ValueType> {
        self.value_types
            .get(id)
            .copied()
            .ok_or_else(|| StrataError::UnknownValueType(id.to_string()))
    }

    /// Instantiate the combinator registered under `id`
    pub fn combinator(&self, id: &str) -> StrataResult<Arc<dyn Combinator>> {
        self.combinators
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| StrataError::UnknownCombinator(id.to_string()))
    }

    /// Registered value type identifiers, sorted
    pub fn value_type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.value_types.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    /// Registered combinator identifiers, sorted
    pub fn combinator_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.combinators.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

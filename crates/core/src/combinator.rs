//! Merge contract for values written to the same key
//!
//! A `Combinator` resolves two writes that land on the same key before the
//! next flush. Implementations must be pure and associative:
//! `combine(combine(a, b), c) == combine(a, combine(b, c))`. Storage may
//! fold writes in any grouping, so the stored result must not depend on it.
//! A collection's identity includes the identifier of its combinator.

use crate::error::{StrataError, StrataResult};
use crate::value::Value;

/// Associative binary merge of two values of the same type
pub trait Combinator: Send + Sync {
    /// Stable identifier used in the connection handshake
    fn id(&self) -> &'static str;

    /// Merge `first` (older) with `second` (newer)
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the values are of a type this combinator
    /// does not support, or of two different types.
    fn combine(&self, first: Value, second: Value) -> StrataResult<Value>;
}

fn mismatch(combinator: &str, first: &Value, second: &Value) -> StrataError {
    StrataError::type_mismatch(
        format!("{} operands for {}", first.type_name(), combinator),
        second.type_name(),
    )
}

/// Newer write wins
#[derive(Debug, Default, Clone, Copy)]
pub struct OverwriteCombinator;

impl Combinator for OverwriteCombinator {
    fn id(&self) -> &'static str {
        "overwrite"
    }

    fn combine(&self, first: Value, second: Value) -> StrataResult<Value> {
        if first.value_type() != second.value_type() {
            return Err(mismatch(self.id(), &first, &second));
        }
        Ok(second)
    }
}

/// Numeric addition (`Int` wraps on overflow)
#[derive(Debug, Default, Clone, Copy)]
pub struct SumCombinator;

impl Combinator for SumCombinator {
    fn id(&self) -> &'static str {
        "sum"
    }

    fn combine(&self, first: Value, second: Value) -> StrataResult<Value> {
        match (first, second) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (first, second) => Err(mismatch(self.id(), &first, &second)),
        }
    }
}

/// Numeric maximum
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxCombinator;

impl Combinator for MaxCombinator {
    fn id(&self) -> &'static str {
        "max"
    }

    fn combine(&self, first: Value, second: Value) -> StrataResult<Value> {
        match (first, second) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.max(b))),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.max(b))),
            (first, second) => Err(mismatch(self.id(), &first, &second)),
        }
    }
}

/// Concatenation of posting lists, strings or byte strings
///
/// This is the combinator of every secondary index collection: duplicates
/// are kept, not removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppendCombinator;

impl Combinator for AppendCombinator {
    fn id(&self) -> &'static str {
        "append"
    }

    fn combine(&self, first: Value, second: Value) -> StrataResult<Value> {
        match (first, second) {
            (Value::PostingList(a), Value::PostingList(b)) => Ok(Value::PostingList(a.concat(b))),
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            (Value::Bytes(mut a), Value::Bytes(b)) => {
                a.extend_from_slice(&b);
                Ok(Value::Bytes(a))
            }
            (first, second) => Err(mismatch(self.id(), &first, &second)),
        }
    }
}

/// Logical or
#[derive(Debug, Default, Clone, Copy)]
pub struct OrCombinator;

impl Combinator for OrCombinator {
    fn id(&self) -> &'static str {
        "or"
    }

    fn combine(&self, first: Value, second: Value) -> StrataResult<Value> {
        match (first, second) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
            (first, second) => Err(mismatch(self.id(), &first, &second)),
        }
    }
}

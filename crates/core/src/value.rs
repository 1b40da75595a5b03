//! Value types for Strata collections
//!
//! This module defines:
//! - Value: the payload stored under a key
//! - ValueType: the per-collection type tag, fixed when the collection is created
//!
//! ## Type Rules
//!
//! - A collection only ever stores values of its own `ValueType`
//! - No implicit coercions: `Int(1) != Float(1.0)`
//! - `Bytes` are not `String`
//!
//! ## Payload Encoding
//!
//! On the wire a value is carried as the `bincode` encoding of its inner
//! payload (e.g. a bare `i64` for `Int`), decoded against the collection's
//! declared `ValueType`. The variant tag never travels.

use crate::error::{StrataError, StrataResult};
use crate::posting::PostingList;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value stored under an application key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// List of primary keys (secondary index data)
    PostingList(PostingList),
}

// IEEE-754 float semantics, different variants are never equal
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::PostingList(a), Value::PostingList(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::PostingList(_) => ValueType::PostingList,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        self.value_type().id()
    }

    /// Get as i64 if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as posting list if this is a PostingList
    pub fn as_posting_list(&self) -> Option<&PostingList> {
        match self {
            Value::PostingList(list) => Some(list),
            _ => None,
        }
    }

    /// Consume into a posting list if this is a PostingList
    pub fn into_posting_list(self) -> Option<PostingList> {
        match self {
            Value::PostingList(list) => Some(list),
            _ => None,
        }
    }

    /// Encode the inner payload (without variant tag)
    pub fn encode_payload(&self) -> StrataResult<Vec<u8>> {
        let bytes = match self {
            Value::Bool(b) => bincode::serialize(b)?,
            Value::Int(i) => bincode::serialize(i)?,
            Value::Float(f) => bincode::serialize(f)?,
            Value::String(s) => bincode::serialize(s)?,
            Value::Bytes(b) => bincode::serialize(b)?,
            Value::PostingList(list) => bincode::serialize(list)?,
        };
        Ok(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::PostingList(list) => write!(f, "{:?}", list.keys()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<PostingList> for Value {
    fn from(list: PostingList) -> Self {
        Value::PostingList(list)
    }
}

/// Type tag fixed per collection at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// `Value::Bytes`
    Bytes,
    /// `Value::PostingList`
    PostingList,
}

impl ValueType {
    /// All built-in value types
    pub const ALL: [ValueType; 6] = [
        ValueType::Bool,
        ValueType::Int,
        ValueType::Float,
        ValueType::String,
        ValueType::Bytes,
        ValueType::PostingList,
    ];

    /// Stable identifier used in the connection handshake
    pub fn id(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
            ValueType::PostingList => "posting_list",
        }
    }

    /// Decode a payload produced by `Value::encode_payload`
    pub fn decode_payload(&self, bytes: &[u8]) -> StrataResult<Value> {
        let value = match self {
            ValueType::Bool => Value::Bool(bincode::deserialize(bytes)?),
            ValueType::Int => Value::Int(bincode::deserialize(bytes)?),
            ValueType::Float => Value::Float(bincode::deserialize(bytes)?),
            ValueType::String => Value::String(bincode::deserialize(bytes)?),
            ValueType::Bytes => Value::Bytes(bincode::deserialize(bytes)?),
            ValueType::PostingList => Value::PostingList(bincode::deserialize(bytes)?),
        };
        Ok(value)
    }

    /// Fail with `TypeMismatch` unless `value` has this type
    pub fn check(&self, value: &Value) -> StrataResult<()> {
        if value.value_type() != *self {
            return Err(StrataError::type_mismatch(self.id(), value.type_name()));
        }
        Ok(())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

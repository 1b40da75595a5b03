//! Error types for Strata remote collections
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::key::Key;
use std::io;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// Error types for collections, indexes and the remote protocol
#[derive(Debug, Error)]
pub enum StrataError {
    /// I/O error (socket, file)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed or unexpected data on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Action byte not part of the protocol
    #[error("Unknown action {0}")]
    UnknownAction(u8),

    /// A collection name was already bound to a different type or combinator
    #[error(
        "Collection {name} was already initialized with ({existing_type}, {existing_combinator}), \
         refusing ({requested_type}, {requested_combinator})"
    )]
    IdentityConflict {
        /// Collection name
        name: String,
        /// Value type the name is bound to
        existing_type: String,
        /// Combinator the name is bound to
        existing_combinator: String,
        /// Value type the caller asked for
        requested_type: String,
        /// Combinator the caller asked for
        requested_combinator: String,
    },

    /// Value type identifier not registered
    #[error("Unknown value type: {0}")]
    UnknownValueType(String),

    /// Combinator identifier not registered
    #[error("Unknown combinator: {0}")]
    UnknownCombinator(String),

    /// A reserved sentinel was used as an application key
    #[error("Key {0} is a reserved sentinel")]
    ReservedKey(Key),

    /// Value of the wrong type for a collection or combinator
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        actual: String,
    },

    /// Internal consistency violation (e.g. sentinel observed in storage)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation on a closed collection or connection
    #[error("Closed: {0}")]
    Closed(String),

    /// Error reported by the remote peer in an ERROR frame
    #[error("Remote error: {0}")]
    Remote(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        StrataError::Protocol(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        StrataError::Corruption(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        StrataError::Storage(msg.into())
    }

    /// Create a closed error
    pub fn closed(what: impl Into<String>) -> Self {
        StrataError::Closed(what.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        StrataError::Config(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        StrataError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for failures of the underlying transport
    ///
    /// These are isolated to one connection and never echoed to the peer.
    pub fn is_io(&self) -> bool {
        matches!(self, StrataError::Io(_))
    }

    /// True for recoverable errors that should be reported to the peer
    /// with an ERROR frame while the connection is still usable
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            StrataError::UnknownAction(_)
                | StrataError::IdentityConflict { .. }
                | StrataError::UnknownValueType(_)
                | StrataError::UnknownCombinator(_)
                | StrataError::ReservedKey(_)
                | StrataError::TypeMismatch { .. }
        )
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

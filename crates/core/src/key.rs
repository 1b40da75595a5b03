//! Key space and protocol sentinels
//!
//! Application keys are signed 64-bit integers. The four largest values of
//! the range are reserved as out-of-band control signals on the wire and are
//! never legal application keys.
//!
//! ## Contract (protocol version 1)
//!
//! These values are FROZEN for protocol version 1:
//! - `NULL  = i64::MAX`
//! - `END   = i64::MAX - 1`
//! - `ERROR = i64::MAX - 2`
//! - `OK    = i64::MAX - 3`
//!
//! Legal application keys are `i64::MIN ..= MAX_APPLICATION_KEY`.

use crate::error::{StrataError, StrataResult};

/// Application key type
pub type Key = i64;

/// Protocol version that fixes the sentinel assignment below
pub const PROTOCOL_VERSION: u32 = 1;

/// Marks an absent value
pub const NULL: Key = i64::MAX;
/// Terminates a streamed list of keys or entries
pub const END: Key = i64::MAX - 1;
/// Precedes an error message
pub const ERROR: Key = i64::MAX - 2;
/// Acknowledges a request
pub const OK: Key = i64::MAX - 3;

/// All reserved sentinels, in ascending order
pub const SENTINELS: [Key; 4] = [OK, ERROR, END, NULL];

/// Largest key an application may store
pub const MAX_APPLICATION_KEY: Key = i64::MAX - 4;

/// Returns true if `key` is one of the reserved sentinels
#[inline]
pub fn is_sentinel(key: Key) -> bool {
    key > MAX_APPLICATION_KEY
}

/// Human-readable name of a sentinel, for diagnostics
pub fn sentinel_name(key: Key) -> Option<&'static str> {
    match key {
        NULL => Some("NULL"),
        END => Some("END"),
        ERROR => Some("ERROR"),
        OK => Some("OK"),
        _ => None,
    }
}

/// Validate that a key is a legal application key
///
/// # Examples
///
/// ```
/// use strata_core::key::{validate_key, END};
///
/// assert!(validate_key(42).is_ok());
/// assert!(validate_key(i64::MIN).is_ok());
/// assert!(validate_key(END).is_err());
/// ```
///
/// # Errors
///
/// Returns `StrataError::ReservedKey` if the key collides with a sentinel.
#[inline]
pub fn validate_key(key: Key) -> StrataResult<()> {
    if is_sentinel(key) {
        return Err(StrataError::ReservedKey(key));
    }
    Ok(())
}

//! Size limits for wire decoding
//!
//! Length prefixes read from a connection are untrusted. These limits bound
//! what a decoder is willing to allocate before a single byte of payload has
//! arrived. Violations surface as `StrataError::Protocol`.

use crate::error::{StrataError, StrataResult};

/// Size limits enforced when decoding frames
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum length of a length-prefixed string (default: 64KB)
    pub max_string_bytes: usize,

    /// Maximum encoded payload size of one value (default: 32MB)
    pub max_value_bytes: usize,

    /// Maximum number of keys in one change notification (default: 16M)
    pub max_notification_keys: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_string_bytes: 64 * 1024,
            max_value_bytes: 32 * 1024 * 1024, // 32MB
            max_notification_keys: 16 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_string_bytes: 100,
            max_value_bytes: 1000,
            max_notification_keys: 100,
        }
    }

    /// Validate a string length prefix
    pub fn check_string_len(&self, len: usize) -> StrataResult<()> {
        check("string", len, self.max_string_bytes)
    }

    /// Validate a value length prefix
    pub fn check_value_len(&self, len: usize) -> StrataResult<()> {
        check("value", len, self.max_value_bytes)
    }

    /// Validate a notification key count
    pub fn check_notification_len(&self, len: usize) -> StrataResult<()> {
        check("notification", len, self.max_notification_keys)
    }
}

fn check(what: &str, actual: usize, max: usize) -> StrataResult<()> {
    if actual > max {
        return Err(StrataError::protocol(format!(
            "{} length {} exceeds limit {}",
            what, actual, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_limits() {
        let limits = Limits::with_small_limits();
        assert!(limits.check_string_len(100).is_ok());
        assert!(limits.check_string_len(101).is_err());
        assert!(limits.check_value_len(1000).is_ok());
        assert!(matches!(
            limits.check_value_len(1001),
            Err(StrataError::Protocol(msg)) if msg.contains("value")
        ));
        assert!(limits.check_notification_len(101).is_err());
    }

    #[test]
    fn test_default_limits_allow_typical_frames() {
        let limits = Limits::default();
        assert!(limits.check_string_len(255).is_ok());
        assert!(limits.check_value_len(1024 * 1024).is_ok());
    }
}

//! Action codes of the remote protocol
//!
//! Every request starts with one action byte. The first byte on a fresh
//! connection selects its mode (`ConnectToInterface` or `ListenToChanges`);
//! every later byte on a data connection selects one request.
//!
//! ## Contract (protocol version 1)
//!
//! Codes are FROZEN. New actions may only be appended.

use std::fmt;
use strata_core::StrataError;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 1208;

/// Request and mode selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    /// key -> value or NULL
    ReadValue = 0,
    /// key, value -> OK
    WriteValue = 1,
    /// keys..END -> (key, value)..END
    ReadValues = 2,
    /// -> keys..END
    ReadKeys = 3,
    /// (key, value)..END -> OK
    WriteValues = 4,
    /// -> OK
    DropAllData = 5,
    /// Graceful termination, no response
    CloseConnection = 6,
    /// -> OK
    Flush = 7,
    /// -> (key, value)..END
    ReadAllValues = 8,
    /// -> OK, estimate
    ApproximateSize = 9,
    /// key -> bool
    MightContain = 10,
    /// -> OK, count
    ExactSize = 11,
    /// Mode: receive change notifications
    ListenToChanges = 12,
    /// Mode: attach to one collection
    ConnectToInterface = 13,
}

impl Action {
    /// All actions in code order
    pub const ALL: [Action; 14] = [
        Action::ReadValue,
        Action::WriteValue,
        Action::ReadValues,
        Action::ReadKeys,
        Action::WriteValues,
        Action::DropAllData,
        Action::CloseConnection,
        Action::Flush,
        Action::ReadAllValues,
        Action::ApproximateSize,
        Action::MightContain,
        Action::ExactSize,
        Action::ListenToChanges,
        Action::ConnectToInterface,
    ];

    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Protocol name, used in logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            Action::ReadValue => "READVALUE",
            Action::WriteValue => "WRITEVALUE",
            Action::ReadValues => "READVALUES",
            Action::ReadKeys => "READKEYS",
            Action::WriteValues => "WRITEVALUES",
            Action::DropAllData => "DROPALLDATA",
            Action::CloseConnection => "CLOSE_CONNECTION",
            Action::Flush => "FLUSH",
            Action::ReadAllValues => "READALLVALUES",
            Action::ApproximateSize => "APPROXIMATE_SIZE",
            Action::MightContain => "MIGHT_CONTAIN",
            Action::ExactSize => "EXACT_SIZE",
            Action::ListenToChanges => "LISTEN_TO_CHANGES",
            Action::ConnectToInterface => "CONNECT_TO_INTERFACE",
        }
    }

    /// True for the two actions that may open a connection
    pub fn is_mode(self) -> bool {
        matches!(self, Action::ListenToChanges | Action::ConnectToInterface)
    }

    /// True if the request body is an END-terminated stream
    ///
    /// A failure while such a body is half-read leaves the connection out of
    /// sync with the peer.
    pub fn has_streamed_body(self) -> bool {
        matches!(self, Action::ReadValues | Action::WriteValues)
    }
}

impl TryFrom<u8> for Action {
    type Error = StrataError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Action::ALL
            .get(code as usize)
            .copied()
            .ok_or(StrataError::UnknownAction(code))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! Blocking client for the remote protocol

use std::net::ToSocketAddrs;
use std::time::Duration;
use strata_core::key::{validate_key, END, ERROR};
use strata_core::{CollectionIdentity, Key, Limits, StrataError, StrataResult, Value};
use strata_storage::KeyValue;

use crate::connection::Connection;
use crate::protocol::Action;

/// A data connection attached to one remote collection
///
/// Requests are strictly sequential; each method sends one request and
/// waits for its full response. Errors reported by the server surface as
/// `StrataError::Remote`.
pub struct RemoteCollection {
    conn: Connection,
    identity: CollectionIdentity,
}

impl RemoteCollection {
    /// Connect and attach to `identity`, creating the collection if new
    ///
    /// # Errors
    ///
    /// Returns `StrataError::Remote` if the server refuses the handshake
    /// (identity conflict, unknown type or combinator).
    pub fn connect(addr: impl ToSocketAddrs, identity: CollectionIdentity) -> StrataResult<Self> {
        let mut conn = Connection::connect(addr, Limits::default())?;
        conn.write_action(Action::ConnectToInterface)?;
        conn.write_string(&identity.name)?;
        conn.write_string(identity.value_type.id())?;
        conn.write_string(&identity.combinator)?;
        conn.flush()?;
        conn.expect_ok()?;
        Ok(Self { conn, identity })
    }

    /// Identity this connection attached with
    pub fn identity(&self) -> &CollectionIdentity {
        &self.identity
    }

    /// Point lookup
    pub fn read(&mut self, key: Key) -> StrataResult<Option<Value>> {
        validate_key(key)?;
        self.conn.write_action(Action::ReadValue)?;
        self.conn.write_i64(key)?;
        self.conn.flush()?;
        self.read_value_or_error()
    }

    /// Write one value, merged server-side with any pending value
    pub fn write(&mut self, key: Key, value: &Value) -> StrataResult<()> {
        validate_key(key)?;
        self.identity.value_type.check(value)?;
        self.conn.write_action(Action::WriteValue)?;
        self.conn.write_i64(key)?;
        self.conn.write_value(Some(value))?;
        self.conn.flush()?;
        self.conn.expect_ok()
    }

    /// Look up many keys; absent keys are left out of the result
    pub fn read_many(&mut self, keys: &[Key]) -> StrataResult<Vec<KeyValue>> {
        for key in keys {
            validate_key(*key)?;
        }
        self.conn.write_action(Action::ReadValues)?;
        for key in keys {
            self.conn.write_i64(*key)?;
        }
        self.conn.write_i64(END)?;
        self.conn.flush()?;
        self.read_entries()
    }

    /// Write a batch; pairs for the same key merge in order
    pub fn write_many(&mut self, entries: &[KeyValue]) -> StrataResult<()> {
        for (key, value) in entries {
            validate_key(*key)?;
            self.identity.value_type.check(value)?;
        }
        self.conn.write_action(Action::WriteValues)?;
        for (key, value) in entries {
            self.conn.write_i64(*key)?;
            self.conn.write_value(Some(value))?;
        }
        self.conn.write_i64(END)?;
        self.conn.flush()?;
        self.conn.expect_ok()
    }

    /// Every flushed pair
    pub fn read_all(&mut self) -> StrataResult<Vec<KeyValue>> {
        self.conn.write_action(Action::ReadAllValues)?;
        self.conn.flush()?;
        self.read_entries()
    }

    /// Every flushed key
    pub fn read_keys(&mut self) -> StrataResult<Vec<Key>> {
        self.conn.write_action(Action::ReadKeys)?;
        self.conn.flush()?;
        let mut keys = Vec::new();
        loop {
            match self.conn.read_i64()? {
                END => return Ok(keys),
                key => {
                    validate_key(key)?;
                    keys.push(key);
                }
            }
        }
    }

    /// Irreversibly clear the collection
    pub fn drop_all(&mut self) -> StrataResult<()> {
        self.simple(Action::DropAllData)
    }

    /// Make pending writes visible and notify subscribers
    pub fn flush(&mut self) -> StrataResult<()> {
        self.simple(Action::Flush)
    }

    /// Cheap size estimate
    pub fn approximate_size(&mut self) -> StrataResult<u64> {
        self.sized(Action::ApproximateSize)
    }

    /// Exact number of flushed entries
    pub fn exact_size(&mut self) -> StrataResult<u64> {
        self.sized(Action::ExactSize)
    }

    /// Probabilistic membership test
    pub fn might_contain(&mut self, key: Key) -> StrataResult<bool> {
        validate_key(key)?;
        self.conn.write_action(Action::MightContain)?;
        self.conn.write_i64(key)?;
        self.conn.flush()?;
        self.conn.read_bool()
    }

    /// Gracefully end the connection
    pub fn close(mut self) -> StrataResult<()> {
        self.conn.write_action(Action::CloseConnection)?;
        self.conn.flush()
    }

    fn simple(&mut self, action: Action) -> StrataResult<()> {
        self.conn.write_action(action)?;
        self.conn.flush()?;
        self.conn.expect_ok()
    }

    fn sized(&mut self, action: Action) -> StrataResult<u64> {
        self.simple(action)?;
        let size = self.conn.read_i64()?;
        u64::try_from(size).map_err(|_| StrataError::protocol(format!("negative size {}", size)))
    }

    /// A value, NULL, or an ERROR frame
    fn read_value_or_error(&mut self) -> StrataResult<Option<Value>> {
        match self.conn.read_i64()? {
            ERROR => Err(StrataError::Remote(self.conn.read_string()?)),
            header => self
                .conn
                .read_value_body(header, self.identity.value_type),
        }
    }

    /// (key, value) pairs until END, or an ERROR frame
    fn read_entries(&mut self) -> StrataResult<Vec<KeyValue>> {
        let mut entries = Vec::new();
        loop {
            match self.conn.read_i64()? {
                END => return Ok(entries),
                ERROR => {
                    return Err(StrataError::Remote(self.conn.read_string()?))
                }
                key => {
                    validate_key(key)?;
                    let value = self
                        .conn
                        .read_value(self.identity.value_type)?
                        .ok_or_else(|| {
                            StrataError::protocol(format!("NULL value streamed for key {}", key))
                        })?;
                    entries.push((key, value));
                }
            }
        }
    }
}

/// A listen-mode connection receiving change batches
pub struct ChangeSubscription {
    conn: Connection,
}

impl ChangeSubscription {
    /// Connect and register as a subscriber
    pub fn connect(addr: impl ToSocketAddrs) -> StrataResult<Self> {
        let mut conn = Connection::connect(addr, Limits::default())?;
        conn.write_action(Action::ListenToChanges)?;
        conn.flush()?;
        Ok(Self { conn })
    }

    /// Bound the wait in [`next_change`](Self::next_change)
    pub fn set_timeout(&self, timeout: Option<Duration>) -> StrataResult<()> {
        self.conn.set_timeout(timeout)
    }

    /// Wait for the next change batch and acknowledge it
    ///
    /// Returns the collection name and the changed keys.
    pub fn next_change(&mut self) -> StrataResult<(String, Vec<Key>)> {
        let name = self.conn.read_string()?;
        let count = self.conn.read_u32()? as usize;
        self.conn.limits().check_notification_len(count)?;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(self.conn.read_i64()?);
        }
        self.conn.write_ok()?;
        self.conn.flush()?;
        Ok((name, keys))
    }
}

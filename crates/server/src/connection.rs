//! Framed binary codec over one TCP stream
//!
//! ## Encoding (protocol version 1)
//!
//! | Item | Encoding |
//! |------|----------|
//! | action | 1 byte |
//! | key, sentinel, size | 8 bytes, big-endian `i64` |
//! | count | 4 bytes, big-endian `u32` |
//! | bool | 1 byte, `0` or `1` |
//! | string | `u32` byte length + UTF-8 |
//! | value | `i64` header (NULL, or payload length) + payload |
//!
//! Value payloads are the bincode encoding of the collection's value type.
//! Every length prefix is checked against [`Limits`] before allocating.
//!
//! Streamed lists are read through [`KeyStream`] and [`EntryStream`], lazy
//! pull-based sequences that end at the END sentinel.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use strata_core::key::{self, END, ERROR, NULL, OK};
use strata_core::{Key, Limits, StrataError, StrataResult, Value, ValueType};
use strata_storage::KeyValue;

use crate::protocol::Action;

/// Buffered, framed view of one TCP stream
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    limits: Limits,
    peer: Option<SocketAddr>,
}

impl Connection {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream, limits: Limits) -> StrataResult<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            limits,
            peer,
        })
    }

    /// Open a connection to `addr`
    pub fn connect(addr: impl ToSocketAddrs, limits: Limits) -> StrataResult<Self> {
        Self::new(TcpStream::connect(addr)?, limits)
    }

    /// Remote address, if the socket still knows it
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Decoding limits in force
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Another handle to the socket, used to interrupt blocked reads
    pub fn try_clone_stream(&self) -> StrataResult<TcpStream> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    /// Bound blocking reads and writes; `None` waits forever
    pub fn set_timeout(&self, timeout: Option<Duration>) -> StrataResult<()> {
        let stream = self.writer.get_ref();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Close both directions; pending buffered output is discarded
    pub fn shutdown(&self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }

    /// Push buffered output to the socket
    pub fn flush(&mut self) -> StrataResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    // ========================================================================
    // Scalars
    // ========================================================================

    /// Read one byte
    pub fn read_u8(&mut self) -> StrataResult<u8> {
        Ok(self.reader.read_u8()?)
    }

    /// Write one byte
    pub fn write_u8(&mut self, byte: u8) -> StrataResult<()> {
        Ok(self.writer.write_u8(byte)?)
    }

    /// Write an action selector
    pub fn write_action(&mut self, action: Action) -> StrataResult<()> {
        self.write_u8(action.code())
    }

    /// Read a key, sentinel or size
    pub fn read_i64(&mut self) -> StrataResult<i64> {
        Ok(self.reader.read_i64::<BigEndian>()?)
    }

    /// Write a key, sentinel or size
    pub fn write_i64(&mut self, value: i64) -> StrataResult<()> {
        Ok(self.writer.write_i64::<BigEndian>(value)?)
    }

    /// Read a count
    pub fn read_u32(&mut self) -> StrataResult<u32> {
        Ok(self.reader.read_u32::<BigEndian>()?)
    }

    /// Write a count
    pub fn write_u32(&mut self, value: u32) -> StrataResult<()> {
        Ok(self.writer.write_u32::<BigEndian>(value)?)
    }

    /// Read a boolean
    pub fn read_bool(&mut self) -> StrataResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StrataError::protocol(format!("invalid boolean byte {}", other))),
        }
    }

    /// Write a boolean
    pub fn write_bool(&mut self, value: bool) -> StrataResult<()> {
        self.write_u8(u8::from(value))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> StrataResult<String> {
        let len = self.read_u32()? as usize;
        self.limits.check_string_len(len)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| StrataError::protocol(format!("string is not UTF-8: {}", e)))
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> StrataResult<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| StrataError::protocol("string longer than u32::MAX bytes"))?;
        self.write_u32(len)?;
        Ok(self.writer.write_all(value.as_bytes())?)
    }

    // ========================================================================
    // Values and control frames
    // ========================================================================

    /// Read a value of `value_type`, None for the NULL marker
    pub fn read_value(&mut self, value_type: ValueType) -> StrataResult<Option<Value>> {
        let header = self.read_i64()?;
        self.read_value_body(header, value_type)
    }

    /// Read the rest of a value whose header was already consumed
    pub fn read_value_body(
        &mut self,
        header: i64,
        value_type: ValueType,
    ) -> StrataResult<Option<Value>> {
        if header == NULL {
            return Ok(None);
        }
        if header < 0 || key::is_sentinel(header) {
            return Err(StrataError::protocol(format!(
                "invalid value header {}",
                header
            )));
        }
        let len = header as usize;
        self.limits.check_value_len(len)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        value_type.decode_payload(&buf).map(Some)
    }

    /// Write a value, or the NULL marker for None
    pub fn write_value(&mut self, value: Option<&Value>) -> StrataResult<()> {
        match value {
            None => self.write_i64(NULL),
            Some(value) => {
                let payload = value.encode_payload()?;
                self.write_i64(payload.len() as i64)?;
                Ok(self.writer.write_all(&payload)?)
            }
        }
    }

    /// Write the OK sentinel
    pub fn write_ok(&mut self) -> StrataResult<()> {
        self.write_i64(OK)
    }

    /// Write the END sentinel
    pub fn write_end(&mut self) -> StrataResult<()> {
        self.write_i64(END)
    }

    /// Write an ERROR frame with a human-readable message
    pub fn write_error(&mut self, message: &str) -> StrataResult<()> {
        self.write_i64(ERROR)?;
        self.write_string(message)
    }

    /// Read an OK acknowledgement
    ///
    /// An ERROR frame becomes `StrataError::Remote` carrying the peer's
    /// message; anything else is a protocol error.
    pub fn expect_ok(&mut self) -> StrataResult<()> {
        match self.read_i64()? {
            OK => Ok(()),
            ERROR => Err(StrataError::Remote(self.read_string()?)),
            other => Err(StrataError::protocol(format!(
                "expected OK, received {}",
                describe(other)
            ))),
        }
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Lazily read keys until END
    pub fn keys(&mut self) -> KeyStream<'_> {
        KeyStream {
            conn: self,
            done: false,
        }
    }

    /// Lazily read (key, value) pairs until END
    pub fn entries(&mut self, value_type: ValueType) -> EntryStream<'_> {
        EntryStream {
            conn: self,
            value_type,
            done: false,
        }
    }

    /// Read one streamed key; None at END, error for any other sentinel
    fn read_stream_key(&mut self) -> StrataResult<Option<Key>> {
        let key = self.read_i64()?;
        if key == END {
            return Ok(None);
        }
        key::validate_key(key)?;
        Ok(Some(key))
    }
}

/// Keys streamed by the peer, terminated by END
///
/// Yields an error and stops if the stream carries a sentinel other than
/// END or the socket fails. A stream dropped before END leaves the rest of
/// the body unread.
pub struct KeyStream<'a> {
    conn: &'a mut Connection,
    done: bool,
}

impl Iterator for KeyStream<'_> {
    type Item = StrataResult<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.conn.read_stream_key() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// (key, value) pairs streamed by the peer, terminated by a key equal to END
pub struct EntryStream<'a> {
    conn: &'a mut Connection,
    value_type: ValueType,
    done: bool,
}

impl EntryStream<'_> {
    fn read_entry(&mut self) -> StrataResult<Option<KeyValue>> {
        let Some(key) = self.conn.read_stream_key()? else {
            return Ok(None);
        };
        match self.conn.read_value(self.value_type)? {
            Some(value) => Ok(Some((key, value))),
            None => Err(StrataError::protocol(format!(
                "NULL value streamed for key {}",
                key
            ))),
        }
    }
}

impl Iterator for EntryStream<'_> {
    type Item = StrataResult<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Render a received word for diagnostics
pub(crate) fn describe(word: i64) -> String {
    match key::sentinel_name(word) {
        Some(name) => name.to_string(),
        None => word.to_string(),
    }
}

//! Per-connection request handling
//!
//! A connection starts with a mode byte. `LISTEN_TO_CHANGES` hands the
//! connection to the subscriber set and the handler returns.
//! `CONNECT_TO_INTERFACE` is followed by the handshake
//!
//! ```text
//! name: string, value type id: string, combinator id: string
//! ```
//!
//! answered with OK, or ERROR + message (after which the connection is
//! closed). The request loop then serves one action at a time, flushing
//! each response before reading the next action, until CLOSE_CONNECTION,
//! an I/O failure, an unknown action or server shutdown.
//!
//! Recoverable failures (reserved keys, type mismatches) are answered with
//! an ERROR frame. If the failing request had a streamed body, the rest of
//! that body is unread and the loop ends after the ERROR frame. Malformed
//! input (bad UTF-8, NULL or undecodable values, oversized lengths) is also
//! answered with ERROR, then the connection is closed.

use std::sync::Arc;
use strata_core::{key, CollectionIdentity, StrataError, StrataResult};
use strata_storage::Collection;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::protocol::Action;
use crate::server::ServerContext;
use crate::stats::HandlerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serve one accepted connection until it ends
pub(crate) fn serve(ctx: &ServerContext, id: u64, mut conn: Connection) -> StrataResult<()> {
    let code = conn.read_u8()?;
    let mode = match Action::try_from(code) {
        Ok(action) if action.is_mode() => action,
        Ok(action) => {
            return reject(
                &mut conn,
                StrataError::protocol(format!("{} cannot open a connection", action)),
            )
        }
        Err(e) => return reject(&mut conn, e),
    };

    match mode {
        Action::ListenToChanges => {
            ctx.forget_socket(id);
            ctx.subscribers.register(conn)?;
            Ok(())
        }
        _ => {
            let Some(mut handler) = DataHandler::attach(ctx, conn)? else {
                return Ok(());
            };
            ctx.handlers.insert(id, Arc::clone(&handler.info));
            let result = handler.run(ctx);
            ctx.handlers.remove(&id);
            result
        }
    }
}

/// Best-effort ERROR frame for a connection about to be closed
fn reject(conn: &mut Connection, err: StrataError) -> StrataResult<()> {
    warn!(
        target: "strata::server",
        peer = ?conn.peer_addr(),
        error = %err,
        "Rejecting connection"
    );
    conn.write_error(&err.to_string())?;
    conn.flush()
}

/// Handshake strings: collection name, value type id, combinator id
fn read_handshake(conn: &mut Connection) -> StrataResult<(String, String, String)> {
    Ok((conn.read_string()?, conn.read_string()?, conn.read_string()?))
}

/// Undecodable input from the peer, answered with ERROR before closing
fn is_malformed(err: &StrataError) -> bool {
    matches!(err, StrataError::Protocol(_) | StrataError::Serialization(_))
}

/// A connection attached to one collection
struct DataHandler {
    conn: Connection,
    collection: Arc<dyn Collection>,
    info: Arc<HandlerInfo>,
}

impl DataHandler {
    /// Run the handshake; None if it was refused
    fn attach(ctx: &ServerContext, mut conn: Connection) -> StrataResult<Option<Self>> {
        let (name, type_id, combinator_id) = match read_handshake(&mut conn) {
            Ok(handshake) => handshake,
            Err(e) if is_malformed(&e) => {
                reject(&mut conn, e)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let attached = ctx.types.value_type(&type_id).and_then(|value_type| {
            let combinator = ctx.types.combinator(&combinator_id)?;
            let identity = CollectionIdentity::new(name.clone(), value_type, combinator_id.as_str());
            ctx.registry.attach(identity, combinator)
        });
        let collection = match attached {
            Ok(collection) => collection,
            Err(e) if e.is_reportable() => {
                reject(&mut conn, e)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        conn.write_ok()?;
        conn.flush()?;
        debug!(
            target: "strata::server",
            peer = ?conn.peer_addr(),
            collection = %collection.identity(),
            "Connection attached"
        );
        let info = Arc::new(HandlerInfo::new(name, conn.peer_addr()));
        Ok(Some(Self {
            conn,
            collection,
            info,
        }))
    }

    fn run(&mut self, ctx: &ServerContext) -> StrataResult<()> {
        while !ctx.is_shutting_down() {
            let code = match self.conn.read_u8() {
                Ok(code) => code,
                // Socket shut down by the server's teardown
                Err(e) if e.is_io() && ctx.is_shutting_down() => break,
                Err(e) => return Err(e),
            };
            let flow = self.handle_request(code)?;
            self.info.record_request();
            self.conn.flush()?;
            if flow == Flow::Close {
                break;
            }
        }
        Ok(())
    }

    fn handle_request(&mut self, code: u8) -> StrataResult<Flow> {
        let action = match Action::try_from(code) {
            Ok(action) if !action.is_mode() => action,
            Ok(action) => {
                self.conn
                    .write_error(&format!("Unexpected action {} after handshake", action))?;
                return Ok(Flow::Close);
            }
            Err(e) => {
                self.conn.write_error(&e.to_string())?;
                return Ok(Flow::Close);
            }
        };

        match self.dispatch(action) {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_reportable() => {
                warn!(
                    target: "strata::server",
                    collection = %self.collection.name(),
                    action = %action,
                    error = %e,
                    "Request refused"
                );
                self.conn.write_error(&e.to_string())?;
                if action.has_streamed_body() {
                    Ok(Flow::Close)
                } else {
                    Ok(Flow::Continue)
                }
            }
            // The request was not understood, so the stream may be out of sync
            Err(e) if is_malformed(&e) => {
                warn!(
                    target: "strata::server",
                    collection = %self.collection.name(),
                    action = %action,
                    error = %e,
                    "Malformed request"
                );
                self.conn.write_error(&e.to_string())?;
                Ok(Flow::Close)
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch(&mut self, action: Action) -> StrataResult<Flow> {
        match action {
            Action::CloseConnection => return Ok(Flow::Close),
            Action::ExactSize => {
                let size = self.collection.exact_size()?;
                self.conn.write_ok()?;
                self.conn.write_i64(size as i64)?;
            }
            Action::ApproximateSize => {
                let size = self.collection.approximate_size();
                self.conn.write_ok()?;
                self.conn.write_i64(size as i64)?;
            }
            Action::ReadValue => {
                let key = self.conn.read_i64()?;
                key::validate_key(key)?;
                let value = self.collection.read(key)?;
                self.conn.write_value(value.as_ref())?;
            }
            Action::WriteValue => {
                let key = self.conn.read_i64()?;
                let value = self
                    .conn
                    .read_value(self.collection.value_type())?
                    .ok_or_else(|| StrataError::protocol(format!("NULL value for key {}", key)))?;
                self.collection.write(key, value)?;
                self.conn.write_ok()?;
            }
            Action::ReadValues => {
                let found = self.collection.read_many(&mut self.conn.keys())?;
                for (key, value) in &found {
                    self.conn.write_i64(*key)?;
                    self.conn.write_value(Some(value))?;
                }
                self.conn.write_end()?;
            }
            Action::WriteValues => {
                let value_type = self.collection.value_type();
                self.collection
                    .write_many(&mut self.conn.entries(value_type))?;
                self.conn.write_ok()?;
            }
            Action::ReadAllValues => {
                for (key, value) in self.collection.iter()? {
                    self.check_scanned_key(key)?;
                    self.conn.write_i64(key)?;
                    self.conn.write_value(Some(&value))?;
                }
                self.conn.write_end()?;
            }
            Action::ReadKeys => {
                for key in self.collection.iter_keys()? {
                    self.check_scanned_key(key)?;
                    self.conn.write_i64(key)?;
                }
                self.conn.write_end()?;
            }
            Action::DropAllData => {
                self.collection.drop_all()?;
                self.conn.write_ok()?;
            }
            Action::Flush => {
                self.collection.flush()?;
                self.conn.write_ok()?;
            }
            Action::MightContain => {
                let key = self.conn.read_i64()?;
                key::validate_key(key)?;
                let might = self.collection.might_contain(key)?;
                self.conn.write_bool(might)?;
            }
            Action::ListenToChanges | Action::ConnectToInterface => {
                return Err(StrataError::protocol(format!(
                    "Unexpected action {} after handshake",
                    action
                )));
            }
        }
        Ok(Flow::Continue)
    }

    /// A stored key in the sentinel band means the key space is corrupt
    fn check_scanned_key(&self, key: i64) -> StrataResult<()> {
        if key::is_sentinel(key) {
            error!(
                target: "strata::server",
                collection = %self.collection.name(),
                key,
                "Sentinel key found in stored data"
            );
            return Err(StrataError::corruption(format!(
                "Unexpected key {} in collection {}",
                key,
                self.collection.name()
            )));
        }
        Ok(())
    }
}

//! Remote protocol server for Strata collections
//!
//! Serves named key-value collections over TCP with a compact binary
//! protocol and relays flush-time change notifications to subscriber
//! connections:
//! - protocol: action codes
//! - connection: framing, values, END-terminated key/entry streams
//! - registry: lookup-or-create of collections with immutable identity
//! - subscribers: ordered change fan-out with self-healing pruning
//! - handler: handshake and request loop of one connection
//! - server: accept loop, statistics, teardown
//! - client: blocking `RemoteCollection` and `ChangeSubscription`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;
pub mod subscribers;

pub use client::{ChangeSubscription, RemoteCollection};
pub use config::{ServerConfig, CONFIG_FILE_NAME};
pub use connection::{Connection, EntryStream, KeyStream};
pub use protocol::{Action, DEFAULT_PORT};
pub use registry::CollectionRegistry;
pub use server::{RemoteServer, ServerHandle};
pub use stats::{HandlerStats, ServerStats};
pub use subscribers::SubscriberSet;

//! Strata remote - network access and secondary indexing for Strata collections
//!
//! Strata remote serves typed key-value collections over a compact binary
//! TCP protocol and maintains derived secondary indexes over them.
//!
//! # Quick Start
//!
//! ```no_run
//! use strata_remote::core::{CollectionIdentity, Value, ValueType};
//! use strata_remote::server::{RemoteCollection, RemoteServer, ServerConfig};
//!
//! let server = RemoteServer::bind(ServerConfig::ephemeral())?.spawn()?;
//! let mut users = RemoteCollection::connect(
//!     server.local_addr(),
//!     CollectionIdentity::new("users", ValueType::String, "overwrite"),
//! )?;
//! users.write(1, &Value::from("alice"))?;
//! users.flush()?;
//! server.shutdown();
//! # Ok::<(), strata_remote::core::StrataError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`]: keys, values, combinators, errors
//! - [`storage`]: the collection contract and the in-memory engine
//! - [`index`]: self-maintaining secondary indexes
//! - [`server`]: protocol server, client and subscriber fan-out

pub use strata_core as core;
pub use strata_index as index;
pub use strata_server as server;
pub use strata_storage as storage;

//! TCP accept loop and server lifecycle
//!
//! One named thread per accepted connection (`strata-conn-N`), plus one
//! accept thread (`strata-accept`). Connection threads share the collection
//! registry and the subscriber set.
//!
//! ## Teardown
//!
//! `ServerHandle::shutdown` (or dropping the handle):
//! 1. raises the shutdown flag and wakes the accept thread
//! 2. shuts down every connection socket, which interrupts blocked reads
//! 3. joins every connection thread
//! 4. drops all subscribers and closes all collections

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use strata_core::{Limits, StrataResult, TypeRegistry};
use strata_storage::{Collection, CollectionFactory, MemoryCollectionFactory};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::handler;
use crate::registry::CollectionRegistry;
use crate::stats::{HandlerInfo, ServerStats};
use crate::subscribers::SubscriberSet;

/// State shared by the accept thread and every connection thread
pub(crate) struct ServerContext {
    pub(crate) types: TypeRegistry,
    pub(crate) registry: CollectionRegistry,
    pub(crate) subscribers: Arc<SubscriberSet>,
    pub(crate) handlers: DashMap<u64, Arc<HandlerInfo>>,
    limits: Limits,
    shutdown: AtomicBool,
    /// Sockets of connections still owned by a connection thread
    sockets: DashMap<u64, TcpStream>,
    total_connections: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerContext {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop tracking a socket whose ownership moved elsewhere
    pub(crate) fn forget_socket(&self, id: u64) {
        self.sockets.remove(&id);
    }

    fn stats(&self) -> ServerStats {
        let mut handlers: Vec<_> = self
            .handlers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        handlers.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            handlers,
            subscribers: self.subscribers.len(),
            collections: self.registry.len(),
        }
    }

    /// Spawn the thread serving one accepted stream
    fn spawn_connection(self: &Arc<Self>, stream: TcpStream) -> StrataResult<()> {
        let id = self.total_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.sockets.insert(id, stream.try_clone()?);
        let conn = match Connection::new(stream, self.limits.clone()) {
            Ok(conn) => conn,
            Err(e) => {
                self.sockets.remove(&id);
                return Err(e);
            }
        };
        let peer = conn.peer_addr();
        debug!(target: "strata::server", id, ?peer, "Connection accepted");

        let ctx = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("strata-conn-{}", id))
            .spawn(move || {
                let result = handler::serve(&ctx, id, conn);
                ctx.sockets.remove(&id);
                match result {
                    Ok(()) => debug!(target: "strata::server", id, ?peer, "Connection closed"),
                    Err(e) if e.is_io() => {
                        debug!(target: "strata::server", id, ?peer, error = %e, "Connection dropped")
                    }
                    Err(e) => error!(
                        target: "strata::server",
                        id,
                        ?peer,
                        error = %e,
                        "Unexpected failure in connection handler"
                    ),
                }
            });
        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
                Ok(())
            }
            Err(e) => {
                if let Some((_, socket)) = self.sockets.remove(&id) {
                    let _ = socket.shutdown(Shutdown::Both);
                }
                Err(e.into())
            }
        }
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        for stream in listener.incoming() {
            if self.is_shutting_down() {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.spawn_connection(stream) {
                        warn!(target: "strata::server", error = %e, "Failed to start connection");
                    }
                }
                Err(e) => warn!(target: "strata::server", error = %e, "Accept failed"),
            }
        }
        debug!(target: "strata::server", "Accept loop stopped");
    }
}

/// A bound, not yet running server
///
/// # Example
///
/// ```no_run
/// use strata_server::{RemoteServer, ServerConfig};
///
/// let server = RemoteServer::bind(ServerConfig::default())?;
/// let handle = server.spawn()?;
/// println!("listening on {}", handle.local_addr());
/// handle.shutdown();
/// # Ok::<(), strata_core::StrataError>(())
/// ```
pub struct RemoteServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl RemoteServer {
    /// Bind a server backed by in-memory collections
    pub fn bind(config: ServerConfig) -> StrataResult<Self> {
        let factory = MemoryCollectionFactory::with_bloom_sizing(
            config.bloom_expected_items,
            config.bloom_false_positive_rate,
        );
        Self::with_factory(config, Arc::new(factory), TypeRegistry::with_defaults())
    }

    /// Bind a server creating collections through `factory` and resolving
    /// handshake identifiers through `types`
    pub fn with_factory(
        config: ServerConfig,
        factory: Arc<dyn CollectionFactory>,
        types: TypeRegistry,
    ) -> StrataResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()?)?;
        let subscribers = Arc::new(SubscriberSet::new(config.ack_timeout()));
        let registry = CollectionRegistry::new(factory, config.caching, subscribers.clone());
        let ctx = Arc::new(ServerContext {
            types,
            registry,
            subscribers,
            handlers: DashMap::new(),
            limits: Limits::default(),
            shutdown: AtomicBool::new(false),
            sockets: DashMap::new(),
            total_connections: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        });
        Ok(Self { listener, ctx })
    }

    /// Bound address (resolves port 0)
    pub fn local_addr(&self) -> StrataResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Collection created by a remote handshake, for in-process use
    pub fn collection(&self, name: &str) -> Option<Arc<dyn Collection>> {
        self.ctx.registry.get(name)
    }

    /// Start accepting connections on a background thread
    pub fn spawn(self) -> StrataResult<ServerHandle> {
        let addr = self.local_addr()?;
        let ctx = Arc::clone(&self.ctx);
        let listener = self.listener;
        let accept = thread::Builder::new()
            .name("strata-accept".to_string())
            .spawn(move || ctx.accept_loop(listener))?;
        info!(target: "strata::server", %addr, "Server listening");
        Ok(ServerHandle {
            ctx: self.ctx,
            addr,
            accept: Some(accept),
        })
    }
}

/// Running server; shuts down when dropped
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    accept: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Collection created by a remote handshake, for in-process use
    pub fn collection(&self, name: &str) -> Option<Arc<dyn Collection>> {
        self.ctx.registry.get(name)
    }

    /// Names of all served collections
    pub fn collection_names(&self) -> Vec<String> {
        self.ctx.registry.names()
    }

    /// Current statistics
    pub fn stats(&self) -> ServerStats {
        self.ctx.stats()
    }

    /// Stop the server and release every connection and collection
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(accept) = self.accept.take() else {
            return;
        };
        info!(target: "strata::server", addr = %self.addr, "Shutting down");
        self.ctx.shutdown.store(true, Ordering::Release);

        // Wake the accept thread blocked in accept()
        if let Err(e) = TcpStream::connect(wake_addr(self.addr)) {
            warn!(target: "strata::server", error = %e, "Failed to wake accept loop");
        }
        if accept.join().is_err() {
            error!(target: "strata::server", "Accept thread panicked");
        }

        for socket in self.ctx.sockets.iter() {
            let _ = socket.value().shutdown(Shutdown::Both);
        }
        self.ctx.subscribers.interrupt_all();
        let workers: Vec<JoinHandle<()>> = self.ctx.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                error!(target: "strata::server", "Connection thread panicked");
            }
        }

        self.ctx.subscribers.clear();
        self.ctx.registry.close_all();
        info!(target: "strata::server", addr = %self.addr, "Server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Address that reaches a listener bound to `addr`
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

//! Change-notification fan-out to subscriber connections
//!
//! Subscribers are connections that opened in `LISTEN_TO_CHANGES` mode. For
//! every flush of every served collection, each subscriber receives
//!
//! ```text
//! name: string, count: u32, count x key: i64
//! ```
//!
//! and must answer with the OK sentinel before the next subscriber is
//! served. Delivery follows registration order.
//!
//! The subscriber list lock is held for the whole broadcast, so broadcasts
//! from different collections never interleave and pruning cannot race with
//! iteration. A subscriber that fails to take or acknowledge a frame (I/O
//! error, bad reply, ack timeout) is removed and its socket closed; the
//! remaining subscribers still get the frame.
//!
//! A slow subscriber holds up the flush that triggered the broadcast until
//! it answers or its ack timeout expires.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strata_core::key::OK;
use strata_core::{Key, StrataError, StrataResult};
use strata_storage::ChangeListener;
use tracing::{debug, warn};

use crate::connection::{describe, Connection};

struct Subscriber {
    id: u64,
    conn: Connection,
}

impl Subscriber {
    fn deliver(&mut self, collection: &str, keys: &[Key]) -> StrataResult<()> {
        let count = u32::try_from(keys.len())
            .map_err(|_| StrataError::protocol("change batch larger than u32::MAX keys"))?;
        self.conn.write_string(collection)?;
        self.conn.write_u32(count)?;
        for key in keys {
            self.conn.write_i64(*key)?;
        }
        self.conn.flush()?;
        match self.conn.read_i64()? {
            OK => Ok(()),
            other => Err(StrataError::protocol(format!(
                "expected OK acknowledgement, received {}",
                describe(other)
            ))),
        }
    }
}

/// Live subscriber connections, in registration order
pub struct SubscriberSet {
    subscribers: Mutex<Vec<Subscriber>>,
    /// Socket handles usable without the list lock, to interrupt a
    /// broadcast blocked on a subscriber
    sockets: DashMap<u64, TcpStream>,
    next_id: AtomicU64,
    ack_timeout: Option<Duration>,
    delivered: AtomicU64,
    pruned: AtomicU64,
}

impl SubscriberSet {
    /// Create an empty set; `ack_timeout` bounds each write and each wait
    /// for an acknowledgement, `None` waits forever
    pub fn new(ack_timeout: Option<Duration>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            sockets: DashMap::new(),
            next_id: AtomicU64::new(1),
            ack_timeout,
            delivered: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    /// Add a connection to the end of the delivery order
    pub fn register(&self, conn: Connection) -> StrataResult<u64> {
        conn.set_timeout(self.ack_timeout)?;
        let socket = conn.try_clone_stream()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = conn.peer_addr();
        let mut subscribers = self.subscribers.lock();
        subscribers.push(Subscriber { id, conn });
        self.sockets.insert(id, socket);
        drop(subscribers);
        debug!(target: "strata::subscribers", id, ?peer, "Subscriber registered");
        Ok(id)
    }

    /// Send one change batch to every subscriber
    ///
    /// Returns the number of subscribers that acknowledged it.
    pub fn broadcast(&self, collection: &str, keys: &[Key]) -> usize {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain_mut(|subscriber| match subscriber.deliver(collection, keys) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "strata::subscribers",
                    id = subscriber.id,
                    peer = ?subscriber.conn.peer_addr(),
                    collection,
                    error = %e,
                    "Dropping subscriber"
                );
                subscriber.conn.shutdown();
                self.sockets.remove(&subscriber.id);
                false
            }
        });
        let delivered = subscribers.len();
        self.delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.pruned
            .fetch_add((before - delivered) as u64, Ordering::Relaxed);
        delivered
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// True if nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total acknowledged deliveries
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Total subscribers removed after a failed delivery
    pub fn pruned_count(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }

    /// Addresses of live subscribers, in delivery order
    ///
    /// Waits for any broadcast in progress.
    pub fn peers(&self) -> Vec<Option<SocketAddr>> {
        self.subscribers
            .lock()
            .iter()
            .map(|s| s.conn.peer_addr())
            .collect()
    }

    /// Shut every subscriber socket down without taking the list lock
    ///
    /// A broadcast blocked on a subscriber fails fast and prunes it.
    pub fn interrupt_all(&self) {
        for socket in self.sockets.iter() {
            let _ = socket.value().shutdown(Shutdown::Both);
        }
    }

    /// Close and forget every subscriber
    pub fn clear(&self) {
        self.interrupt_all();
        let mut subscribers = self.subscribers.lock();
        for subscriber in subscribers.drain(..) {
            self.sockets.remove(&subscriber.id);
        }
    }
}

impl ChangeListener for SubscriberSet {
    fn values_changed(&self, collection: &str, keys: &[Key]) {
        let delivered = self.broadcast(collection, keys);
        debug!(
            target: "strata::subscribers",
            collection,
            keys = keys.len(),
            delivered,
            "Broadcast change batch"
        );
    }
}

//! End-to-end tests of the remote protocol over loopback TCP
//!
//! Tests cover:
//! - Handshake and identity immutability
//! - Every request action
//! - Sentinel keys rejected before storage
//! - Streamed reads and writes
//! - Change fan-out and subscriber pruning
//! - Unknown actions, corrupt key space, teardown

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strata_core::key::{END, ERROR, NULL, OK};
use strata_core::{
    CollectionIdentity, Combinator, Key, Limits, StrataError, StrataResult, TypeRegistry, Value,
    ValueType,
};
use strata_server::{
    Action, ChangeSubscription, Connection, RemoteCollection, RemoteServer, ServerConfig,
    ServerHandle,
};
use strata_storage::{
    CachingPolicy, ChangeListener, Collection, CollectionFactory, KeyIter, KeyValue,
    KeyValueIter, ListenerId, MemoryCollection,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn start() -> ServerHandle {
    RemoteServer::bind(ServerConfig::ephemeral())
        .unwrap()
        .spawn()
        .unwrap()
}

fn users_identity() -> CollectionIdentity {
    CollectionIdentity::new("users", ValueType::String, "overwrite")
}

fn counts_identity() -> CollectionIdentity {
    CollectionIdentity::new("counts", ValueType::Int, "sum")
}

fn attach(server: &ServerHandle, identity: CollectionIdentity) -> RemoteCollection {
    RemoteCollection::connect(server.local_addr(), identity).unwrap()
}

/// Raw connection that completed the handshake for `identity`
fn raw(server: &ServerHandle, identity: &CollectionIdentity) -> Connection {
    let mut conn = Connection::connect(server.local_addr(), Limits::default()).unwrap();
    conn.write_action(Action::ConnectToInterface).unwrap();
    conn.write_string(&identity.name).unwrap();
    conn.write_string(identity.value_type.id()).unwrap();
    conn.write_string(&identity.combinator).unwrap();
    conn.flush().unwrap();
    conn.expect_ok().unwrap();
    conn
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn sorted(mut entries: Vec<KeyValue>) -> Vec<KeyValue> {
    entries.sort_by_key(|(k, _)| *k);
    entries
}

// ============================================================================
// Handshake
// ============================================================================

mod handshake {
    use super::*;

    #[test]
    fn test_attach_creates_collection() {
        let server = start();
        let users = attach(&server, users_identity());
        assert_eq!(users.identity(), &users_identity());
        assert_eq!(server.collection_names(), vec!["users"]);
        let local = server.collection("users").unwrap();
        assert_eq!(local.value_type(), ValueType::String);
        server.shutdown();
    }

    #[test]
    fn test_conflicting_identity_refused_then_matching_accepted() {
        let server = start();
        let addr = server.local_addr();
        let racers: Vec<_> = [users_identity(), CollectionIdentity::new("users", ValueType::Int, "sum")]
            .into_iter()
            .map(|identity| {
                thread::spawn(move || {
                    RemoteCollection::connect(addr, identity.clone()).map(|_| identity)
                })
            })
            .collect();
        let results: Vec<StrataResult<CollectionIdentity>> =
            racers.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<&CollectionIdentity> =
            results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(loser, StrataError::Remote(msg) if msg.contains("already initialized")),
            "unexpected error {:?}",
            loser
        );

        let third = RemoteCollection::connect(addr, winners[0].clone());
        assert!(third.is_ok());
        server.shutdown();
    }

    #[test]
    fn test_unknown_identifiers_refused() {
        let server = start();
        let unknown_type = RemoteCollection::connect(
            server.local_addr(),
            CollectionIdentity::new("blobs", ValueType::Bytes, "no-such-combinator"),
        );
        assert!(matches!(unknown_type, Err(StrataError::Remote(msg)) if msg.contains("Unknown combinator")));
        assert!(server.collection("blobs").is_none());
        server.shutdown();
    }

    #[test]
    fn test_invalid_mode_byte() {
        let server = start();
        let mut conn = Connection::connect(server.local_addr(), Limits::default()).unwrap();
        conn.write_action(Action::Flush).unwrap();
        conn.flush().unwrap();
        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("FLUSH")));
        assert!(conn.read_u8().is_err());
        server.shutdown();
    }
}

// ============================================================================
// Requests
// ============================================================================

mod requests {
    use super::*;

    #[test]
    fn test_point_reads_and_writes() {
        let server = start();
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        assert_eq!(users.read(1).unwrap(), Some(Value::from("alice")));
        assert_eq!(users.read(2).unwrap(), None);
        users.close().unwrap();
        server.shutdown();
    }

    #[test]
    fn test_sizes_keys_and_scans() {
        let server = start();
        let mut users = attach(&server, users_identity());
        users
            .write_many(&[(2, Value::from("bob")), (1, Value::from("alice"))])
            .unwrap();
        assert_eq!(users.exact_size().unwrap(), 0);
        users.flush().unwrap();

        assert_eq!(users.exact_size().unwrap(), 2);
        assert!(users.approximate_size().unwrap() >= 2);
        let mut keys = users.read_keys().unwrap();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(
            sorted(users.read_all().unwrap()),
            vec![(1, Value::from("alice")), (2, Value::from("bob"))]
        );
        assert!(users.might_contain(1).unwrap());
        server.shutdown();
    }

    #[test]
    fn test_drop_all() {
        let server = start();
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();
        users.drop_all().unwrap();
        assert_eq!(users.exact_size().unwrap(), 0);
        assert_eq!(users.read(1).unwrap(), None);
        assert!(users.read_all().unwrap().is_empty());
        server.shutdown();
    }

    #[test]
    fn test_read_values_skips_absent_keys() {
        let server = start();
        let mut users = attach(&server, users_identity());
        users
            .write_many(&[(1, Value::from("alice")), (3, Value::from("carol"))])
            .unwrap();

        for order in [[1, 2, 3], [3, 2, 1], [2, 3, 1]] {
            let found = users.read_many(&order).unwrap();
            assert_eq!(
                sorted(found),
                vec![(1, Value::from("alice")), (3, Value::from("carol"))]
            );
        }
        server.shutdown();
    }

    #[test]
    fn test_read_values_frame_ends_with_end() {
        let server = start();
        let identity = users_identity();
        let mut users = attach(&server, identity.clone());
        users.write(1, &Value::from("alice")).unwrap();

        let mut conn = raw(&server, &identity);
        conn.write_action(Action::ReadValues).unwrap();
        for key in [1, 2, END] {
            conn.write_i64(key).unwrap();
        }
        conn.flush().unwrap();
        assert_eq!(conn.read_i64().unwrap(), 1);
        assert_eq!(
            conn.read_value(ValueType::String).unwrap(),
            Some(Value::from("alice"))
        );
        assert_eq!(conn.read_i64().unwrap(), END);
        server.shutdown();
    }

    #[test]
    fn test_batch_merge_matches_single_writes() {
        let server = start();
        let mut batched = attach(&server, counts_identity());
        batched.write(7, &Value::Int(1)).unwrap();
        batched
            .write_many(&[(7, Value::Int(2)), (7, Value::Int(3)), (8, Value::Int(4))])
            .unwrap();

        let mut single = attach(&server, CollectionIdentity::new("counts2", ValueType::Int, "sum"));
        for (key, value) in [(7, 1), (7, 2), (7, 3), (8, 4)] {
            single.write(key, &Value::Int(value)).unwrap();
        }

        assert_eq!(batched.read(7).unwrap(), Some(Value::Int(6)));
        assert_eq!(batched.read(7).unwrap(), single.read(7).unwrap());
        batched.flush().unwrap();
        single.flush().unwrap();
        assert_eq!(sorted(batched.read_all().unwrap()), sorted(single.read_all().unwrap()));
        server.shutdown();
    }

    #[test]
    fn test_might_contain_has_no_false_negatives() {
        let server = start();
        let mut counts = attach(&server, counts_identity());
        let entries: Vec<KeyValue> = (0..200).map(|k| (k * 31, Value::Int(k))).collect();
        counts.write_many(&entries).unwrap();
        for (key, _) in &entries {
            assert!(counts.might_contain(*key).unwrap());
        }
        server.shutdown();
    }

    #[test]
    fn test_stats_track_handlers() {
        let server = start();
        let mut users = attach(&server, users_identity());
        for i in 0..5 {
            users.write(i, &Value::from("x")).unwrap();
        }
        wait_for("request count", || {
            server
                .stats()
                .handlers
                .first()
                .map_or(false, |h| h.total_requests == 5)
        });
        let stats = server.stats();
        assert_eq!(stats.active_handlers(), 1);
        assert_eq!(stats.handlers[0].collection, "users");
        assert_eq!(stats.collections, 1);

        users.close().unwrap();
        wait_for("handler exit", || server.stats().active_handlers() == 0);
        assert_eq!(server.stats().total_connections, 1);
        server.shutdown();
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_sentinel_key_write_is_refused() {
        let server = start();
        let identity = users_identity();
        let mut conn = raw(&server, &identity);

        for sentinel in [OK, ERROR, NULL] {
            conn.write_action(Action::WriteValue).unwrap();
            conn.write_i64(sentinel).unwrap();
            conn.write_value(Some(&Value::from("bad"))).unwrap();
            conn.flush().unwrap();
            assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("reserved")));
        }

        // Connection still usable
        conn.write_action(Action::WriteValue).unwrap();
        conn.write_i64(1).unwrap();
        conn.write_value(Some(&Value::from("alice"))).unwrap();
        conn.flush().unwrap();
        conn.expect_ok().unwrap();

        let local = server.collection("users").unwrap();
        local.flush().unwrap();
        assert_eq!(local.iter_keys().unwrap().collect::<Vec<Key>>(), vec![1]);
        server.shutdown();
    }

    #[test]
    fn test_sentinel_in_batch_stores_nothing() {
        let server = start();
        let identity = counts_identity();
        let mut conn = raw(&server, &identity);
        conn.write_action(Action::WriteValues).unwrap();
        conn.write_i64(1).unwrap();
        conn.write_value(Some(&Value::Int(1))).unwrap();
        conn.write_i64(OK).unwrap();
        conn.write_value(Some(&Value::Int(2))).unwrap();
        conn.write_i64(END).unwrap();
        conn.flush().unwrap();

        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(_))));
        // Batch body is out of sync, so the server hangs up
        assert!(conn.read_u8().is_err());

        let local = server.collection("counts").unwrap();
        assert_eq!(local.read(1).unwrap(), None);
        server.shutdown();
    }

    #[test]
    fn test_client_rejects_sentinel_before_sending() {
        let server = start();
        let mut users = attach(&server, users_identity());
        assert!(matches!(
            users.write(END, &Value::from("x")),
            Err(StrataError::ReservedKey(END))
        ));
        assert!(users.read(1).unwrap().is_none());
        server.shutdown();
    }

    #[test]
    fn test_unknown_action_ends_loop() {
        let server = start();
        let mut conn = raw(&server, &users_identity());
        conn.write_u8(99).unwrap();
        conn.flush().unwrap();
        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("99")));
        assert!(conn.read_u8().is_err());

        // Server keeps serving others
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        server.shutdown();
    }

    #[test]
    fn test_mode_action_after_handshake_is_unknown() {
        let server = start();
        let mut conn = raw(&server, &users_identity());
        conn.write_action(Action::ListenToChanges).unwrap();
        conn.flush().unwrap();
        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(_))));
        assert!(conn.read_u8().is_err());
        server.shutdown();
    }

    #[test]
    fn test_corrupt_key_space_closes_connection() {
        let server = RemoteServer::with_factory(
            ServerConfig::ephemeral(),
            Arc::new(CorruptFactory),
            TypeRegistry::with_defaults(),
        )
        .unwrap()
        .spawn()
        .unwrap();
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();

        // Dropped without an ERROR frame
        assert!(matches!(users.read_all(), Err(e) if e.is_io()));
        assert!(users.exact_size().is_err());
        // Other connections are unaffected
        let mut other = attach(&server, users_identity());
        assert_eq!(other.read(1).unwrap(), Some(Value::from("alice")));
        server.shutdown();
    }

    #[test]
    fn test_corrupt_key_scan_closes_connection() {
        let server = RemoteServer::with_factory(
            ServerConfig::ephemeral(),
            Arc::new(CorruptFactory),
            TypeRegistry::with_defaults(),
        )
        .unwrap()
        .spawn()
        .unwrap();
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();

        assert!(matches!(users.read_keys(), Err(e) if e.is_io()));
        assert!(users.read(1).is_err());
        server.shutdown();
    }

    #[test]
    fn test_non_utf8_handshake_is_answered() {
        let server = start();
        let mut conn = Connection::connect(server.local_addr(), Limits::default()).unwrap();
        conn.write_action(Action::ConnectToInterface).unwrap();
        conn.write_u32(2).unwrap();
        conn.write_u8(0xff).unwrap();
        conn.write_u8(0xfe).unwrap();
        conn.flush().unwrap();

        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("UTF-8")));
        assert!(conn.read_u8().is_err());
        assert!(server.collection_names().is_empty());
        server.shutdown();
    }

    #[test]
    fn test_null_value_write_is_answered() {
        let server = start();
        let mut conn = raw(&server, &users_identity());
        conn.write_action(Action::WriteValue).unwrap();
        conn.write_i64(1).unwrap();
        conn.write_value(None).unwrap();
        conn.flush().unwrap();

        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("NULL")));
        assert!(conn.read_u8().is_err());
        assert_eq!(server.collection("users").unwrap().read(1).unwrap(), None);

        // Server keeps serving others
        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        server.shutdown();
    }

    #[test]
    fn test_undecodable_payload_is_answered() {
        let server = start();
        let mut conn = raw(&server, &counts_identity());
        conn.write_action(Action::WriteValue).unwrap();
        conn.write_i64(1).unwrap();
        // Three bytes cannot hold an i64
        conn.write_i64(3).unwrap();
        for byte in [1, 2, 3] {
            conn.write_u8(byte).unwrap();
        }
        conn.flush().unwrap();

        assert!(matches!(conn.expect_ok(), Err(StrataError::Remote(msg)) if msg.contains("Serialization")));
        assert!(conn.read_u8().is_err());
        server.shutdown();
    }

    #[test]
    fn test_shutdown_interrupts_idle_connections() {
        let server = start();
        let mut conn = raw(&server, &users_identity());
        let reader = thread::spawn(move || conn.read_u8().is_err());
        thread::sleep(Duration::from_millis(50));
        server.shutdown();
        assert!(reader.join().unwrap());
    }

    /// Collection whose scans report sentinel keys
    struct CorruptCollection {
        inner: MemoryCollection,
    }

    impl Collection for CorruptCollection {
        fn identity(&self) -> &CollectionIdentity {
            self.inner.identity()
        }
        fn read(&self, key: Key) -> StrataResult<Option<Value>> {
            self.inner.read(key)
        }
        fn write(&self, key: Key, value: Value) -> StrataResult<()> {
            self.inner.write(key, value)
        }
        fn remove(&self, key: Key) -> StrataResult<()> {
            self.inner.remove(key)
        }
        fn iter(&self) -> StrataResult<KeyValueIter> {
            let mut entries: Vec<KeyValue> = self.inner.iter()?.collect();
            entries.push((NULL, Value::from("ghost")));
            Ok(Box::new(entries.into_iter()))
        }
        fn iter_keys(&self) -> StrataResult<KeyIter> {
            let mut keys: Vec<Key> = self.inner.iter_keys()?.collect();
            keys.push(OK);
            Ok(Box::new(keys.into_iter()))
        }
        fn iter_filtered(&self, filter: &dyn Fn(Key) -> bool) -> StrataResult<KeyValueIter> {
            self.inner.iter_filtered(filter)
        }
        fn drop_all(&self) -> StrataResult<()> {
            self.inner.drop_all()
        }
        fn flush(&self) -> StrataResult<()> {
            self.inner.flush()
        }
        fn approximate_size(&self) -> u64 {
            self.inner.approximate_size()
        }
        fn exact_size(&self) -> StrataResult<u64> {
            self.inner.exact_size()
        }
        fn might_contain(&self, key: Key) -> StrataResult<bool> {
            self.inner.might_contain(key)
        }
        fn last_flush(&self) -> u64 {
            self.inner.last_flush()
        }
        fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
            self.inner.register_listener(listener)
        }
        fn deregister_listener(&self, id: ListenerId) -> bool {
            self.inner.deregister_listener(id)
        }
        fn close(&self) -> StrataResult<()> {
            self.inner.close()
        }
    }

    struct CorruptFactory;

    impl CollectionFactory for CorruptFactory {
        fn create(
            &self,
            identity: CollectionIdentity,
            combinator: Arc<dyn Combinator>,
            policy: CachingPolicy,
        ) -> StrataResult<Arc<dyn Collection>> {
            Ok(Arc::new(CorruptCollection {
                inner: MemoryCollection::new(identity, combinator, policy),
            }))
        }
    }
}

// ============================================================================
// Change notifications
// ============================================================================

mod notifications {
    use super::*;

    fn subscribe(server: &ServerHandle, expected: usize) -> ChangeSubscription {
        let sub = ChangeSubscription::connect(server.local_addr()).unwrap();
        sub.set_timeout(Some(Duration::from_secs(5))).unwrap();
        wait_for("subscriber registration", || {
            server.stats().subscribers == expected
        });
        sub
    }

    #[test]
    fn test_flush_notifies_subscriber() {
        let server = start();
        let mut sub = subscribe(&server, 1);
        let listener = thread::spawn(move || sub.next_change().unwrap());

        let mut users = attach(&server, users_identity());
        users.write(2, &Value::from("bob")).unwrap();
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();

        let (name, mut keys) = listener.join().unwrap();
        keys.sort_unstable();
        assert_eq!(name, "users");
        assert_eq!(keys, vec![1, 2]);
        server.shutdown();
    }

    #[test]
    fn test_dead_subscriber_does_not_starve_healthy_one() {
        let server = start();
        let mut healthy = subscribe(&server, 1);
        let dead = subscribe(&server, 2);
        drop(dead);

        let listener = thread::spawn(move || {
            let first = healthy.next_change().unwrap();
            let second = healthy.next_change().unwrap();
            (first, second)
        });

        let mut users = attach(&server, users_identity());
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();
        wait_for("pruning", || server.stats().subscribers == 1);
        users.write(2, &Value::from("bob")).unwrap();
        users.flush().unwrap();

        let (first, second) = listener.join().unwrap();
        assert_eq!(first, ("users".to_string(), vec![1]));
        assert_eq!(second, ("users".to_string(), vec![2]));
        assert_eq!(server.stats().subscribers, 1);
        server.shutdown();
    }

    #[test]
    fn test_notifications_cover_all_collections() {
        let server = start();
        let mut sub = subscribe(&server, 1);
        let listener = thread::spawn(move || {
            let a = sub.next_change().unwrap();
            let b = sub.next_change().unwrap();
            vec![a, b]
        });

        let mut users = attach(&server, users_identity());
        let mut counts = attach(&server, counts_identity());
        users.write(1, &Value::from("alice")).unwrap();
        users.flush().unwrap();
        counts.write(9, &Value::Int(1)).unwrap();
        counts.flush().unwrap();

        let received = listener.join().unwrap();
        assert_eq!(
            received,
            vec![("users".to_string(), vec![1]), ("counts".to_string(), vec![9])]
        );
        server.shutdown();
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let server = start();
        let mut sub = subscribe(&server, 1);
        sub.set_timeout(Some(Duration::from_millis(200))).unwrap();

        let mut users = attach(&server, users_identity());
        users.flush().unwrap();
        assert!(matches!(sub.next_change(), Err(e) if e.is_io()));
        server.shutdown();
    }
}

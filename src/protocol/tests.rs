// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::packet::Packet;
use crate::core::value::Value;
use crate::error::ProtocolError;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::version::{ProtocolVersion, VersionRegistry};
use crate::service::connection::{Connection, Role};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn version() -> Arc<ProtocolVersion> {
    let def = json!({ "types": {
        "kind": ["mapper", { "type": "u8", "mappings": { "0": "Ping", "1": "Pong" } }],
        "tcp_packet": ["container", [
            { "name": "passthrough", "type": "bool" },
            { "name": "type", "type": "kind" },
            { "name": "data", "type": "void" }
        ]],
        "udp_outgoing": ["container", [
            { "name": "type", "type": "kind" },
            { "name": "data", "type": "void" }
        ]],
        "udp_incoming": ["container", [
            { "name": "clientId", "type": "u16" },
            { "name": "packet", "type": "udp_outgoing" }
        ]]
    } });
    VersionRegistry::builder()
        .register(101, &def, &json!({}))
        .unwrap()
        .build()
        .get(101)
        .unwrap()
}

fn packet(version: &ProtocolVersion, name: &str) -> Packet {
    Packet::new(version.packet_type(name).unwrap(), Value::Null)
}

#[test]
fn test_persistent_and_once_handlers() {
    let version = version();
    let conn = Connection::detached(version.clone(), Role::Server);
    let dispatcher = Dispatcher::new();
    let ping = version.packet_type("Ping").unwrap();

    let every = Arc::new(AtomicUsize::new(0));
    let first = Arc::new(AtomicUsize::new(0));
    let counter = every.clone();
    dispatcher
        .register(ping.clone(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let counter = first.clone();
    dispatcher
        .once(ping.clone(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert_eq!(dispatcher.dispatch(&conn, &packet(&version, "Ping")).unwrap(), 2);
    assert_eq!(dispatcher.dispatch(&conn, &packet(&version, "Ping")).unwrap(), 1);
    assert_eq!(dispatcher.dispatch(&conn, &packet(&version, "Pong")).unwrap(), 0);

    assert_eq!(every.load(Ordering::SeqCst), 2);
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handlers_can_register_handlers() {
    let version = version();
    let conn = Connection::detached(version.clone(), Role::Server);
    let dispatcher = Dispatcher::new();
    let ping = version.packet_type("Ping").unwrap();
    let pong = version.packet_type("Pong").unwrap();

    let inner = dispatcher.clone();
    dispatcher
        .once(ping, move |_, _| inner.register(pong, |_, _| Ok(())))
        .unwrap();

    dispatcher.dispatch(&conn, &packet(&version, "Ping")).unwrap();
    assert!(dispatcher.has_handler(&version.packet_type("Pong").unwrap()));
    assert!(!dispatcher.has_handler(&version.packet_type("Ping").unwrap()));
}

#[test]
fn test_failing_handler_does_not_stop_the_rest() {
    let version = version();
    let conn = Connection::detached(version.clone(), Role::Server);
    let dispatcher = Dispatcher::new();
    let ping = version.packet_type("Ping").unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    dispatcher
        .register(ping.clone(), |_, _| Err(ProtocolError::Decode("bad identity".into())))
        .unwrap();
    let counter = ran.clone();
    dispatcher
        .register(ping, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let err = dispatcher.dispatch(&conn, &packet(&version, "Ping")).unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(m) if m == "bad identity"));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_dispatcher_counts_as_handler() {
    let version = version();
    let shared = Dispatcher::new();
    let conn = Connection::new(
        Role::Server,
        version.clone(),
        CancellationToken::new(),
        Arc::default(),
        Some(shared.clone()),
    );
    let ping = version.packet_type("Ping").unwrap();
    assert!(!conn.has_handler(&ping));

    shared.register(ping.clone(), |_, _| Ok(())).unwrap();
    assert!(conn.has_handler(&ping));

    shared.clear();
    assert!(!conn.has_handler(&ping));
}

#[test]
fn test_close_clears_own_handlers() {
    let version = version();
    let conn = Connection::detached(version.clone(), Role::Client);
    conn.on("Ping", |_, _| Ok(())).unwrap();
    assert!(conn.has_handler(&version.packet_type("Ping").unwrap()));

    conn.destroy(None);
    assert!(!conn.has_handler(&version.packet_type("Ping").unwrap()));
    assert!(matches!(
        conn.on("Nope", |_, _| Ok(())),
        Err(ProtocolError::UnknownPacketType(_))
    ));
}

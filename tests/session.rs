//! Integration tests for live client/server sessions over loopback

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use td2d_protocol::config::{ClientConfig, ServerConfig};
use td2d_protocol::core::{Packet, Value};
use td2d_protocol::error::ProtocolError;
use td2d_protocol::service::{Client, Connection, ConnectionEvent, ConnectionState, Server, ServerEvent};
use td2d_protocol::utils::ticks;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn server_config() -> ServerConfig {
    ServerConfig {
        host: Some("127.0.0.1".to_string()),
        tcp_port: 0,
        udp_port: 0,
        legacy_ip: true,
        ..ServerConfig::default()
    }
}

fn client_config(server: &Server) -> ClientConfig {
    ClientConfig {
        host: Some("127.0.0.1".to_string()),
        tcp_port: server.local_tcp_addr().port(),
        udp_port: server.local_udp_addr().port(),
        legacy_ip: true,
        version: server.version().id(),
        ..ClientConfig::default()
    }
}

async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

async fn next_packet(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Packet {
    match recv(rx).await {
        ConnectionEvent::Packet(packet) => packet,
        other => panic!("expected a packet, got {other:?}"),
    }
}

async fn closed(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Option<Arc<ProtocolError>> {
    loop {
        match recv(rx).await {
            ConnectionEvent::Closed(cause) => return cause,
            ConnectionEvent::Packet(_) | ConnectionEvent::Error(_) => continue,
        }
    }
}

async fn accepted(rx: &mut UnboundedReceiver<ServerEvent>) -> Connection {
    loop {
        if let ServerEvent::Connection(peer) = recv(rx).await {
            return peer;
        }
    }
}

async fn silent<T>(rx: &mut UnboundedReceiver<T>) -> bool {
    timeout(QUIET, rx.recv()).await.is_err()
}

struct Session {
    client: Connection,
    client_events: UnboundedReceiver<ConnectionEvent>,
    peer: Connection,
    peer_events: UnboundedReceiver<ConnectionEvent>,
}

async fn start(config: ServerConfig) -> (Server, UnboundedReceiver<ServerEvent>) {
    let server = Server::bind(config, &common::versions()).await.unwrap();
    let events = server.take_events().unwrap();
    (server, events)
}

async fn join(server: &Server, server_events: &mut UnboundedReceiver<ServerEvent>) -> Session {
    let client = Client::new(client_config(server), &common::versions()).unwrap();
    let client_events = client.connection().take_events().unwrap();
    let client = client.connect().await.unwrap();
    let peer = accepted(server_events).await;
    let peer_events = peer.take_events().unwrap();
    client.set_id(peer.id());
    Session {
        client,
        client_events,
        peer,
        peer_events,
    }
}

#[tokio::test]
async fn test_connect_and_exchange_over_tcp() {
    let (server, mut events) = start(server_config()).await;
    let mut s = join(&server, &mut events).await;

    assert_eq!(s.client.state(), ConnectionState::Open);
    assert_eq!(s.peer.state(), ConnectionState::Open);
    assert!(s.peer.id() >= 1);
    assert_eq!(server.registry().len(), 1);

    s.client
        .write("ClientIdentity", json!({ "username": "sally", "character": 5 }))
        .unwrap();
    let identity = next_packet(&mut s.peer_events).await;
    assert_eq!(identity.kind, "ClientIdentity");
    assert_eq!(identity.data, Value::from(json!({ "username": "sally", "character": 5 })));

    s.peer
        .write("ServerStatus", json!({ "clientId": s.peer.id(), "isLobby": true }))
        .unwrap();
    let status = next_packet(&mut s.client_events).await;
    assert_eq!(status.kind, "ServerStatus");
    assert_eq!(status.data.get("clientId").and_then(Value::as_i64), Some(i64::from(s.peer.id())));
}

#[tokio::test]
async fn test_udp_pins_first_endpoint() {
    let (server, mut events) = start(server_config()).await;
    let mut s = join(&server, &mut events).await;

    assert!(matches!(
        s.peer.write_udp("ServerPlayerJoined", 1u16),
        Err(ProtocolError::NotReady)
    ));
    assert_eq!(s.peer.udp_endpoint(), None);

    let state = json!({ "sender": s.peer.id(), "x": 10.0, "y": 20.5, "flags": 1 });
    let deadline = Instant::now() + WAIT;
    let received = loop {
        s.client.write_udp("PassthroughPlayerState", state.clone()).unwrap();
        if let Ok(Some(ConnectionEvent::Packet(packet))) = timeout(QUIET, s.peer_events.recv()).await {
            break packet;
        }
        assert!(Instant::now() < deadline, "no datagram reached the server");
    };
    assert_eq!(received.data, Value::from(state));
    let pinned = s.peer.udp_endpoint().expect("endpoint pinned");
    assert!(pinned.ip().is_loopback());

    let deadline = Instant::now() + WAIT;
    let echoed = loop {
        s.peer.write_udp("ServerPlayerJoined", 3u16).unwrap();
        if let Ok(Some(ConnectionEvent::Packet(packet))) = timeout(QUIET, s.client_events.recv()).await {
            break packet;
        }
        assert!(Instant::now() < deadline, "no datagram reached the client");
    };
    assert_eq!(echoed.kind, "ServerPlayerJoined");
    assert_eq!(echoed.data, Value::Int(3));
}

#[tokio::test]
async fn test_broadcast_reaches_every_open_peer() {
    let (server, mut events) = start(server_config()).await;
    let mut a = join(&server, &mut events).await;
    let mut b = join(&server, &mut events).await;
    assert_ne!(a.peer.id(), b.peer.id());

    assert_eq!(server.broadcast("ServerPlayerJoined", 9u16).unwrap(), 2);
    for events in [&mut a.client_events, &mut b.client_events] {
        let packet = next_packet(events).await;
        assert_eq!(packet.kind, "ServerPlayerJoined");
        assert_eq!(packet.data, Value::Int(9));
    }

    assert!(matches!(
        server.broadcast("NoSuchPacket", Value::Null),
        Err(ProtocolError::UnknownPacketType(_))
    ));
}

#[tokio::test]
async fn test_unhandled_passthrough_is_relayed_to_others() {
    let (server, mut events) = start(server_config()).await;
    let mut a = join(&server, &mut events).await;
    let mut b = join(&server, &mut events).await;

    let chat = json!({ "sender": a.peer.id(), "message": "gg" });
    a.client.write_passthrough("PassthroughChatMessage", chat.clone()).unwrap();

    let relayed = next_packet(&mut b.client_events).await;
    assert_eq!(relayed.kind, "PassthroughChatMessage");
    assert!(relayed.passthrough);
    assert_eq!(relayed.data, Value::from(chat));

    // The sender's own peer still observes it, the sender gets no echo
    assert!(next_packet(&mut a.peer_events).await.passthrough);
    assert!(silent(&mut a.client_events).await);
}

#[tokio::test]
async fn test_handled_passthrough_is_not_relayed() {
    let (server, mut events) = start(server_config()).await;
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    server
        .on("PassthroughChatMessage", move |peer, packet| {
            let _ = seen_tx.send((peer.id(), packet.data.clone()));
            Ok(())
        })
        .unwrap();

    let a = join(&server, &mut events).await;
    let mut b = join(&server, &mut events).await;

    a.client
        .write_passthrough("PassthroughChatMessage", json!({ "sender": 1, "message": "mine" }))
        .unwrap();
    let (from, data) = recv(&mut seen_rx).await;
    assert_eq!(from, a.peer.id());
    assert_eq!(data.get("message").and_then(Value::as_str), Some("mine"));
    assert!(silent(&mut b.client_events).await);
}

#[tokio::test]
async fn test_client_destroy_closes_peer() {
    let (server, mut events) = start(server_config()).await;
    let mut s = join(&server, &mut events).await;

    s.client.destroy(None);
    s.client.destroy(Some(ProtocolError::TimedOut));
    assert!(closed(&mut s.client_events).await.is_none());
    assert!(silent(&mut s.client_events).await, "closed is reported once");

    assert!(closed(&mut s.peer_events).await.is_none());
    let deadline = Instant::now() + WAIT;
    while !server.registry().is_empty() {
        assert!(Instant::now() < deadline, "peer never left the registry");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(silent(&mut events).await, "ordinary disconnect is not a client error");
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let config = ServerConfig {
        heartbeat_interval: ticks(2),
        timeout: ticks(10),
        ..server_config()
    };
    let (server, mut events) = start(config).await;
    let mut s = join(&server, &mut events).await;

    let cause = closed(&mut s.peer_events).await.expect("timeout cause");
    assert!(matches!(*cause, ProtocolError::TimedOut));

    match recv(&mut events).await {
        ServerEvent::ClientError { peer_id, error } => {
            assert_eq!(peer_id, s.peer.id());
            assert!(matches!(*error, ProtocolError::TimedOut));
        }
        other => panic!("expected a client error, got {other:?}"),
    }
    assert!(closed(&mut s.client_events).await.is_none());
}

#[tokio::test]
async fn test_heartbeat_keeps_clients_informed() {
    let config = ServerConfig {
        heartbeat_interval: ticks(2),
        ..server_config()
    };
    let (server, mut events) = start(config).await;
    let mut s = join(&server, &mut events).await;
    server.heartbeat("ServerHeartbeat", Value::Null).unwrap();

    for _ in 0..2 {
        assert_eq!(next_packet(&mut s.client_events).await.kind, "ServerHeartbeat");
    }
    server.destroy(None);
}

#[tokio::test]
async fn test_server_destroy_cascades() {
    let (server, mut events) = start(server_config()).await;
    let mut s = join(&server, &mut events).await;

    server.destroy(None);
    server.destroy(Some(ProtocolError::TransportError("again".into())));
    assert!(server.is_closed());
    assert_eq!(s.peer.state(), ConnectionState::Closed);

    loop {
        match recv(&mut events).await {
            ServerEvent::Closed(cause) => {
                assert!(cause.is_none());
                break;
            }
            ServerEvent::Connection(_) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(silent(&mut events).await);
    assert!(closed(&mut s.peer_events).await.is_none());
    assert!(closed(&mut s.client_events).await.is_none());
}

#[tokio::test]
async fn test_refused_connect_reports_cause() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ClientConfig {
        host: Some("127.0.0.1".to_string()),
        tcp_port: port,
        udp_port: port,
        legacy_ip: true,
        ..ClientConfig::default()
    };
    let client = Client::new(config, &common::versions()).unwrap();
    let connection = client.connection().clone();
    let mut events = connection.take_events().unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(&err, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused));
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(recv(&mut events).await, ConnectionEvent::Error(_)));
    assert!(matches!(recv(&mut events).await, ConnectionEvent::Closed(Some(_))));
}

#[tokio::test]
async fn test_destroy_before_connect_cancels() {
    let (server, _events) = start(server_config()).await;
    let client = Client::new(client_config(&server), &common::versions()).unwrap();
    let connection = client.connection().clone();
    let mut events = connection.take_events().unwrap();
    connection.destroy(None);

    assert!(matches!(client.connect().await, Err(ProtocolError::Cancelled)));
    assert!(matches!(recv(&mut events).await, ConnectionEvent::Closed(None)));
    assert!(silent(&mut events).await);
}

#[tokio::test]
async fn test_unknown_version_is_rejected() {
    let config = ServerConfig {
        version: 999,
        ..server_config()
    };
    let err = Server::bind(config, &common::versions()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnsupportedVersion(999)));
}

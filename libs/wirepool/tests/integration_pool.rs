//! Integration tests for the WebSocket connection multiplexer

mod common;

use common::{closed_port, MockWsServer, RawServer};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;
use wirepool::*;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Open,
    Message(OpCode, Vec<u8>),
    Close(u16, String),
    Failed(String),
}

/// Forwards every callback to a channel; optionally greets on open
struct Recorder {
    tx: Sender<Seen>,
    greeting: Option<&'static str>,
}

impl EventSink for Recorder {
    fn on_open(&mut self, conn: &mut ConnectionRef<'_>) {
        let _ = self.tx.send(Seen::Open);
        if let Some(text) = self.greeting {
            conn.send_text(text).unwrap();
        }
    }

    fn on_message(&mut self, _conn: &mut ConnectionRef<'_>, payload: &[u8], opcode: OpCode) {
        let _ = self.tx.send(Seen::Message(opcode, payload.to_vec()));
    }

    fn on_close(&mut self, _conn: &mut ConnectionRef<'_>, code: u16, reason: &str) {
        let _ = self.tx.send(Seen::Close(code, reason.to_string()));
    }

    fn on_failed(&mut self, error: &WirePoolError) {
        let _ = self.tx.send(Seen::Failed(error.to_string()));
    }
}

fn recorder() -> (Recorder, Receiver<Seen>) {
    let (tx, rx) = unbounded();
    (Recorder { tx, greeting: None }, rx)
}

fn next(rx: &Receiver<Seen>) -> Seen {
    rx.recv_timeout(EVENT_TIMEOUT).expect("no event within timeout")
}

fn text(s: &str) -> Seen {
    Seen::Message(OpCode::Text, s.as_bytes().to_vec())
}

fn pool() -> WsPool {
    WsPool::with_tls(PoolConfig::default(), None).unwrap()
}

/// Connections that fail or finish closing give their slot back shortly after
fn wait_released(pool: &WsPool, handle: ConnectionHandle) -> bool {
    let deadline = std::time::Instant::now() + EVENT_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if pool.state(handle).is_none() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_open_and_echo() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();

    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);
    assert!(pool.is_connected(handle));

    pool.send_text(handle, "hello").unwrap();
    assert_eq!(next(&rx), text("hello"));
    pool.send_binary(handle, &[0, 1, 2, 255]).unwrap();
    assert_eq!(next(&rx), Seen::Message(OpCode::Binary, vec![0, 1, 2, 255]));

    let stats = pool.stats(handle).unwrap();
    verbose_println!("stats after echo: {:?}", stats);
    assert_eq!(stats.messages_sent, 2);
    assert_eq!(stats.messages_received, 2);

    assert!(pool.remove(handle));
    assert!(!pool.is_running());
}

#[test]
fn test_sends_before_open_are_delivered_in_order() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();

    let handle = pool.add(sink, &server.ws_url()).unwrap();
    pool.send_text(handle, "first").unwrap();
    pool.send_text(handle, "second").unwrap();

    assert_eq!(next(&rx), Seen::Open);
    assert_eq!(next(&rx), text("first"));
    assert_eq!(next(&rx), text("second"));
    pool.shutdown();
}

#[test]
fn test_send_from_open_callback() {
    let server = MockWsServer::start();
    let pool = pool();
    let (tx, rx) = unbounded();
    let sink = Recorder {
        tx,
        greeting: Some("hi from on_open"),
    };

    let client = pool.connect(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);
    assert_eq!(next(&rx), text("hi from on_open"));
    drop(client);
    assert!(pool.is_empty());
}

#[test]
fn test_large_message_is_fragmented_and_echoed() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();
    let client = pool.connect(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    client.send_binary(&payload).unwrap();

    match next(&rx) {
        Seen::Message(OpCode::Binary, echoed) => assert!(echoed == payload),
        other => panic!("unexpected event {:?}", other),
    }
    let stats = client.stats().unwrap();
    assert!(stats.bytes_sent > 100_000);
    assert!(stats.bytes_received > 100_000);
}

#[test]
fn test_client_close_fires_once() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    pool.close(handle, 1000, "done").unwrap();
    assert_eq!(next(&rx), Seen::Close(1000, "done".to_string()));
    assert!(wait_released(&pool, handle));
    assert!(!pool.is_running());

    // the handle is stale now, and no second close arrives
    assert!(matches!(
        pool.send_text(handle, "late"),
        Err(WirePoolError::StaleHandle)
    ));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert!(!pool.remove(handle));
}

#[test]
fn test_server_initiated_close() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    pool.send_text(handle, "close-me").unwrap();
    assert_eq!(next(&rx), Seen::Close(1000, "server bye".to_string()));
    assert!(wait_released(&pool, handle));
    assert!(pool.is_empty());
    pool.shutdown();
}

#[test]
fn test_server_ping_is_answered() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    pool.send_text(handle, "ping-me").unwrap();
    assert_eq!(next(&rx), text("pong:srv"));
    pool.shutdown();
}

#[test]
fn test_keepalive_pings() {
    let server = MockWsServer::start();
    let pool = WsPool::with_tls(
        PoolConfig {
            ping_interval_secs: 1,
            ..PoolConfig::default()
        },
        None,
    )
    .unwrap();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    std::thread::sleep(Duration::from_millis(2500));
    let stats = pool.stats(handle).unwrap();
    verbose_println!("keepalive stats: {:?}", stats);
    assert!(stats.pings_sent >= 1);
    assert!(stats.pongs_received >= 1);
    assert!(pool.is_alive(handle, Duration::from_secs(5)));
    assert!(pool.time_since_last_ping(handle).unwrap() < Duration::from_secs(2));
    pool.shutdown();
}

#[test]
fn test_keepalive_clock_is_per_connection() {
    let server = MockWsServer::start();
    let pool = WsPool::with_tls(
        PoolConfig {
            ping_interval_secs: 2,
            ..PoolConfig::default()
        },
        None,
    )
    .unwrap();

    let (early_sink, early_rx) = recorder();
    let early = pool.add(early_sink, &server.ws_url()).unwrap();
    assert_eq!(next(&early_rx), Seen::Open);

    std::thread::sleep(Duration::from_millis(1500));
    let (late_sink, late_rx) = recorder();
    let late = pool.add(late_sink, &server.ws_url()).unwrap();
    assert_eq!(next(&late_rx), Seen::Open);

    // the early connection is due; the late one opened under a second ago
    std::thread::sleep(Duration::from_millis(900));
    assert!(pool.stats(early).unwrap().pings_sent >= 1);
    assert_eq!(pool.stats(late).unwrap().pings_sent, 0);
    assert!(pool.time_since_last_ping(late).is_none());

    std::thread::sleep(Duration::from_millis(1500));
    assert!(pool.stats(late).unwrap().pings_sent >= 1);
    pool.shutdown();
}

#[test]
fn test_capacity_is_enforced() {
    let server = MockWsServer::start();
    let pool = WsPool::with_tls(
        PoolConfig {
            max_connections: 2,
            ..PoolConfig::default()
        },
        None,
    )
    .unwrap();

    let (a_sink, a_rx) = recorder();
    let (b_sink, b_rx) = recorder();
    let (c_sink, _c_rx) = recorder();
    let a = pool.add(a_sink, &server.ws_url()).unwrap();
    let b = pool.add(b_sink, &server.ws_url()).unwrap();
    assert!(matches!(
        pool.add(c_sink, &server.ws_url()),
        Err(WirePoolError::PoolExhausted { capacity: 2 })
    ));

    assert_eq!(next(&a_rx), Seen::Open);
    assert_eq!(next(&b_rx), Seen::Open);
    assert_eq!(pool.broadcast(b"all", OpCode::Text), 2);
    assert_eq!(next(&a_rx), text("all"));
    assert_eq!(next(&b_rx), text("all"));

    // a freed slot can be reused
    assert!(pool.remove(a));
    let (d_sink, d_rx) = recorder();
    let d = pool.add(d_sink, &server.ws_url()).unwrap();
    assert_eq!(next(&d_rx), Seen::Open);
    assert_ne!(a, d);
    pool.shutdown();
    assert!(pool.state(b).is_none());
}

#[test]
fn test_stale_handle_after_remove() {
    let server = MockWsServer::start();
    let pool = pool();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();
    assert_eq!(next(&rx), Seen::Open);

    assert!(pool.remove(handle));
    assert!(!pool.remove(handle));
    assert!(matches!(
        pool.send_text(handle, "gone"),
        Err(WirePoolError::StaleHandle)
    ));
    assert!(matches!(
        pool.close(handle, 1000, ""),
        Err(WirePoolError::StaleHandle)
    ));
    assert!(pool.state(handle).is_none());
    // removal is silent
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_worker_restarts_after_going_idle() {
    let server = MockWsServer::start();
    let pool = pool();

    for round in 0..3 {
        let (sink, rx) = recorder();
        let handle = pool.add(sink, &server.ws_url()).unwrap();
        assert!(pool.is_running());
        assert_eq!(next(&rx), Seen::Open);
        pool.send_text(handle, &format!("round {}", round)).unwrap();
        assert_eq!(next(&rx), text(&format!("round {}", round)));
        assert!(pool.remove(handle));
        assert!(!pool.is_running());
    }
}

#[test]
fn test_rejected_handshake_fires_failed() {
    let server = RawServer::start(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
    let pool = pool();
    let (sink, rx) = recorder();
    let handle = pool.add(sink, &server.ws_url()).unwrap();

    match next(&rx) {
        Seen::Failed(reason) => {
            verbose_println!("handshake failure: {}", reason);
            assert!(reason.contains("Handshake"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(wait_released(&pool, handle));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_secure_url_without_tls_fires_failed() {
    let pool = pool();
    let (sink, rx) = recorder();
    let port = closed_port();
    pool.add(sink, &format!("wss://127.0.0.1:{}/", port)).unwrap();
    assert_eq!(
        next(&rx),
        Seen::Failed(WirePoolError::TlsUnavailable.to_string())
    );
}

#[test]
fn test_refused_connect_releases_slot() {
    let pool = WsPool::with_tls(
        PoolConfig {
            max_connections: 1,
            ..PoolConfig::default()
        },
        None,
    )
    .unwrap();
    let url = format!("ws://127.0.0.1:{}/", closed_port());

    let (sink, rx) = recorder();
    let handle = pool.add(sink, &url).unwrap();
    assert!(matches!(next(&rx), Seen::Failed(_)));
    assert!(wait_released(&pool, handle));
    assert!(!pool.is_running());
    assert!(!pool.remove(handle));

    // the only slot is free again
    let (sink, rx) = recorder();
    let retry = pool.add(sink, &url).unwrap();
    assert!(matches!(next(&rx), Seen::Failed(_)));
    assert!(wait_released(&pool, retry));
    assert!(pool.is_empty());
}

#[test]
fn test_many_connections_share_one_worker() {
    let server = MockWsServer::start();
    let pool = pool();
    let mut clients = Vec::new();

    for i in 0..10 {
        let (sink, rx) = recorder();
        let client = pool.connect(sink, &server.ws_url()).unwrap();
        client.send_text(&format!("client {}", i)).unwrap();
        clients.push((client, rx));
    }
    for (i, (_client, rx)) in clients.iter().enumerate() {
        assert_eq!(next(rx), Seen::Open);
        assert_eq!(next(rx), text(&format!("client {}", i)));
    }
    assert_eq!(pool.len(), 10);

    clients.clear();
    assert!(pool.is_empty());
    assert!(!pool.is_running());
}

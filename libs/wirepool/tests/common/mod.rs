//! Common test utilities for WirePool integration tests
//!
//! Every server runs on its own thread so the synchronous pool APIs can be
//! exercised from plain `#[test]` functions.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdListener, TcpStream as StdStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Mock WebSocket server on a dedicated runtime thread
///
/// Echoes text and binary messages. Two text commands are special:
/// `close-me` makes the server start the close handshake (1000,
/// "server bye"); `ping-me` makes it send a Ping with payload `srv` and
/// report the Pong it gets back as the text message `pong:<payload>`.
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    pub fn start() -> Self {
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();

                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, _)) => {
                                    tokio::spawn(Self::handle_connection(stream));
                                }
                                Err(e) => {
                                    eprintln!("Accept error: {}", e);
                                    break;
                                }
                            }
                        }
                        _ = shutdown_clone.notified() => break,
                    }
                }
            });
        });

        let addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(_) => break,
            };
            let reply = match msg {
                Message::Text(text) if text == "close-me" => Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "server bye".into(),
                })),
                Message::Text(text) if text == "ping-me" => Message::Ping(b"srv".to_vec()),
                Message::Text(_) | Message::Binary(_) => msg,
                Message::Ping(data) => Message::Pong(data),
                Message::Pong(data) => {
                    Message::Text(format!("pong:{}", String::from_utf8_lossy(&data)))
                }
                Message::Close(_) => break,
                Message::Frame(_) => continue,
            };
            if write.send(reply).await.is_err() {
                break;
            }
        }
    }

    /// WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read one request head (and a `Content-Length` body) from a blocking socket
pub fn read_request(stream: &mut StdStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + body_len {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Unused loopback port (nothing listens on it)
pub fn closed_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Server that answers every connection with fixed bytes and hangs up
pub struct RawServer {
    pub addr: SocketAddr,
}

impl RawServer {
    pub fn start(response: &'static [u8]) -> Self {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                read_request(&mut stream);
                let _ = stream.write_all(response);
            }
        });
        Self { addr }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }
}

/// What the scripted HTTP server does with one request
pub enum Script {
    /// Write the bytes and close
    Respond(Vec<u8>),
    /// Write each piece with a pause in between, then close
    Trickle(Vec<Vec<u8>>, Duration),
    /// Read the request and never answer
    Hang,
}

/// Blocking HTTP/1.1 server whose replies come from a closure over the
/// raw request text; every request it saw is recorded
pub struct ScriptedHttpServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHttpServer {
    pub fn start<F>(script: F) -> Self
    where
        F: Fn(&str) -> Script + Send + Sync + 'static,
    {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let script = Arc::new(script);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let recorded = recorded.clone();
                let script = script.clone();
                thread::spawn(move || {
                    let request = read_request(&mut stream);
                    recorded.lock().push(request.clone());
                    match script(&request) {
                        Script::Respond(bytes) => {
                            let _ = stream.write_all(&bytes);
                        }
                        Script::Trickle(pieces, pause) => {
                            for piece in pieces {
                                if stream.write_all(&piece).is_err() {
                                    return;
                                }
                                let _ = stream.flush();
                                thread::sleep(pause);
                            }
                        }
                        Script::Hang => thread::sleep(Duration::from_secs(5)),
                    }
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

/// `HTTP/1.1 <status>` response with a Content-Length body
pub fn response(status: &str, headers: &[(&str, &str)], body: &str) -> Script {
    let mut text = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        text.push_str(&format!("{}: {}\r\n", name, value));
    }
    text.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    Script::Respond(text.into_bytes())
}

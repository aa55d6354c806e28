//! # WirePool
//!
//! Client-side network runtime: pooled WebSocket connections and pooled
//! HTTP/1.1 requests, each pool driven by a single background thread so
//! caller threads never block on socket I/O.
//!
//! ## Features
//!
//! - **Frame codec**: RFC6455 framing with SIMD masking and fragmentation
//! - **Connection state machine**: handshake, close negotiation, ping/pong
//! - **Connection multiplexer**: bounded, generation-checked connection table
//! - **HTTP client**: redirects, connect retries with backoff, deadlines
//! - **Async request pool**: one future per request, optional callbacks
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool::*;
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_message(&mut self, _conn: &mut ConnectionRef<'_>, payload: &[u8], _opcode: OpCode) {
//!         println!("{}", String::from_utf8_lossy(payload));
//!     }
//! }
//!
//! let pool = WsPool::new(PoolConfig::default())?;
//! let client = pool.connect(Printer, "wss://echo.example.com/")?;
//! client.send_text("hello")?;
//!
//! let http = HttpPool::new(HttpPoolConfig::default())?;
//! let reply = http.get("https://example.com/").wait();
//! ```

pub mod core;
pub mod http;
pub mod manager;
pub mod traits;

// Re-export all traits
pub use traits::*;

pub use crate::core::{
    close::CloseCode,
    config::{HttpPoolConfig, PoolConfig, TlsConfig},
    connection_state::{ConnectionState, ConnectionStats},
    frame::{self as codec, Decoded, Frame, OpCode},
    session::{Session, SessionConfig, SessionEvent},
    url::{ParsedUrl, Scheme},
};

pub use http::{HttpPool, HttpReply, HttpRequest, Method, RequestId, ResponseFuture};

pub use manager::{ConnectionHandle, PooledClient, WsPool};

//! # WirePool Manager
//!
//! Connection multiplexer: a bounded table of WebSocket connections driven
//! by one background thread, with a thread-safe command queue in front.

pub mod connection;
pub mod event_loop;
pub mod pool;
pub mod slots;

pub use pool::{PooledClient, WsPool};
pub use slots::ConnectionHandle;

//! # WirePool core
//!
//! Socket-free building blocks: the frame codec and masking, close codes,
//! URL parsing, the opening handshake, the per-connection state machine
//! and its shared state cells, plus the socket and worker helpers both
//! pools are built on.

pub mod close;
pub mod config;
pub mod connection_state;
pub mod frame;
pub mod handshake;
pub mod liveness;
pub mod mask;
pub mod reactor;
pub mod session;
pub mod stream;
pub mod url;

pub use close::CloseCode;
pub use config::{HttpPoolConfig, PoolConfig, TlsConfig};
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, ConnectionStats};
pub use frame::{Decoded, Frame, FrameHeader, OpCode};
pub use liveness::Liveness;
pub use session::{Session, SessionConfig, SessionEvent};
pub use stream::{AsyncStream, BoxedStream};
pub use url::{ParsedUrl, Scheme};

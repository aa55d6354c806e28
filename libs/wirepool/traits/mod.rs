//! # WirePool Traits
//!
//! Seams between the runtime and the application:
//!
//! - **EventSink**: receive WebSocket connection events
//! - **ResponseSink**: receive a streamed HTTP response
//! - **TlsProvider**: wrap sockets in TLS
//! - **RetryPolicy**: control HTTP connect retries

pub mod error;
pub mod response;
pub mod retry;
pub mod sink;
pub mod tls;

pub use error::{FrameError, Result, WirePoolError};
pub use response::ResponseSink;
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryPolicy};
pub use sink::{ConnectionRef, EventSink, NoOpSink};
pub use tls::{default_provider, TlsProvider};

#[cfg(feature = "native-tls")]
pub use tls::NativeTlsProvider;

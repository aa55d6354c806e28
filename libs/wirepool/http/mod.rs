//! # WirePool HTTP
//!
//! HTTP/1.1 client pieces: request model, incremental response parser,
//! the per-request state machine with redirects and connect retries, and
//! the async request pool.

pub mod exchange;
pub mod pool;
pub mod request;
pub mod response;

pub use exchange::{Exchange, ExchangeEvent, ExchangeState, Outcome};
pub use pool::{HttpPool, ReplyCallback, RequestId, ResponseFuture};
pub use request::{HttpRequest, Method};
pub use response::{HttpReply, ResponseHead, ResponseParser};

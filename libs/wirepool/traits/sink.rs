use crate::core::connection_state::ConnectionState;
use crate::core::frame::OpCode;
use crate::core::session::Session;
use crate::manager::slots::ConnectionHandle;
use crate::traits::error::{Result, WirePoolError};
use std::time::Duration;

/// Receiver of WebSocket connection events
///
/// Every method runs on the pool's background thread, so implementations
/// should hand heavy work off rather than block. `on_open` fires at most
/// once; after it, exactly one `on_close` follows. A connection that never
/// opened reports `on_failed` instead and nothing else.
///
/// # Example
/// ```ignore
/// struct Echo;
///
/// impl EventSink for Echo {
///     fn on_message(&mut self, conn: &mut ConnectionRef<'_>, payload: &[u8], opcode: OpCode) {
///         let _ = conn.send(payload, opcode);
///     }
/// }
/// ```
pub trait EventSink: Send + 'static {
    /// Handshake accepted
    fn on_open(&mut self, conn: &mut ConnectionRef<'_>) {
        let _ = conn;
    }

    /// One complete message; fragments are already reassembled
    fn on_message(&mut self, conn: &mut ConnectionRef<'_>, payload: &[u8], opcode: OpCode) {
        let _ = (conn, payload, opcode);
    }

    /// Close handshake finished, or the transport was lost after open
    fn on_close(&mut self, conn: &mut ConnectionRef<'_>, code: u16, reason: &str) {
        let _ = (conn, code, reason);
    }

    /// Connect or handshake failed
    fn on_failed(&mut self, error: &WirePoolError) {
        let _ = error;
    }
}

/// Sink that ignores every event
pub struct NoOpSink;

impl EventSink for NoOpSink {}

/// Borrowed view of a live connection handed to [`EventSink`] callbacks
///
/// Writes go straight into the connection's outbound buffer and are
/// flushed once the callback returns.
pub struct ConnectionRef<'a> {
    handle: ConnectionHandle,
    session: &'a mut Session,
}

impl<'a> ConnectionRef<'a> {
    pub(crate) fn new(handle: ConnectionHandle, session: &'a mut Session) -> Self {
        Self { handle, session }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Subprotocol selected by the server
    pub fn protocol(&self) -> Option<&str> {
        self.session.protocol()
    }

    pub fn send(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        self.session.send(payload, opcode)
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.session.send(text.as_bytes(), OpCode::Text)
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.session.send(data, OpCode::Binary)
    }

    /// Start the close handshake; `on_close` follows once the peer answers
    pub fn close(&mut self, code: u16, reason: &str) {
        // only reachable after open, so no failure event can come back
        let _ = self.session.close(code, reason);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.session.is_alive(timeout)
    }
}

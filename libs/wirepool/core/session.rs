//! WebSocket connection state machine
//!
//! `Session` owns everything about one connection except the socket:
//! handshake, receive buffer with read cursor, fragment accumulator,
//! outbound bytes, close negotiation, ping/pong bookkeeping. The pool's
//! connection task moves bytes between the socket and the session; tests
//! drive it directly.
//!
//! ```text
//! Connecting -> Handshake -> Connected -> Closing -> Closed
//!      \____________\______________________________/
//!              failure before open: straight to Closed
//! ```

use crate::core::close::{close_payload, parse_close_payload, CloseCode};
use crate::core::config::PoolConfig;
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::core::frame::{decode_header, encode_into, encoded_len, OpCode, MAX_CONTROL_PAYLOAD};
use crate::core::handshake::{build_request, generate_key, validate_response};
use crate::core::liveness::Liveness;
use crate::core::mask::apply_mask;
use crate::core::url::ParsedUrl;
use crate::http::response::{find_head_end, parse_head};
use crate::traits::error::{FrameError, Result, WirePoolError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upgrade responses larger than this are rejected
const MAX_HANDSHAKE_RESPONSE: usize = 16 * 1024;

/// What the session wants reported to the application
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake accepted
    Opened,
    /// One complete (possibly reassembled) message
    Message { opcode: OpCode, payload: Vec<u8> },
    /// Close handshake finished or the transport went away after open
    Closed { code: u16, reason: String },
    /// Connect or handshake failed; the connection never opened
    Failed(WirePoolError),
}

/// Subset of [`PoolConfig`] the state machine needs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fragment_size: usize,
    pub max_message_size: usize,
    pub verify_accept: bool,
}

impl From<&PoolConfig> for SessionConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            fragment_size: config.fragment_size,
            max_message_size: config.max_message_size,
            verify_accept: config.verify_accept,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from(&PoolConfig::default())
    }
}

pub struct Session {
    config: SessionConfig,
    state: Arc<AtomicConnectionState>,
    liveness: Arc<Liveness>,
    metrics: Arc<AtomicMetrics>,
    key: String,
    protocol: Option<String>,
    recv: Vec<u8>,
    cursor: usize,
    fragment: Option<(OpCode, Vec<u8>)>,
    outbound: Vec<u8>,
    /// Code and reason of whoever sent the first Close
    close_origin: Option<(u16, String)>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        state: Arc<AtomicConnectionState>,
        liveness: Arc<Liveness>,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        state.set(ConnectionState::Connecting);
        Self {
            config,
            state,
            liveness,
            metrics,
            key: generate_key(),
            protocol: None,
            recv: Vec::new(),
            cursor: 0,
            fragment: None,
            outbound: Vec::new(),
            close_origin: None,
        }
    }

    /// Standalone session with its own state cells
    pub fn detached(config: SessionConfig) -> Self {
        Self::new(
            config,
            Arc::new(AtomicConnectionState::new(ConnectionState::Connecting)),
            Arc::new(Liveness::new()),
            Arc::new(AtomicMetrics::new()),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// `Sec-WebSocket-Key` sent with the Upgrade request
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Subprotocol the server selected
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.liveness.is_alive(timeout)
    }

    pub fn metrics(&self) -> &AtomicMetrics {
        &self.metrics
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Drain bytes waiting to be written to the socket
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Transport is up: queue the Upgrade request
    pub fn begin_handshake(
        &mut self,
        url: &ParsedUrl,
        subprotocol: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<()> {
        if self.state() != ConnectionState::Connecting {
            return Err(WirePoolError::InvalidState(format!(
                "handshake from {:?}",
                self.state()
            )));
        }
        let request = build_request(url, &self.key, subprotocol, extra_headers);
        self.outbound.extend_from_slice(&request);
        self.state.set(ConnectionState::Handshake);
        Ok(())
    }

    /// Connect or TLS setup failed before the handshake
    pub fn fail(&mut self, error: WirePoolError) -> Vec<SessionEvent> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Handshake => {
                self.state.set(ConnectionState::Closed);
                vec![SessionEvent::Failed(error)]
            }
            _ => Vec::new(),
        }
    }

    /// Socket hit EOF or an error
    pub fn on_transport_closed(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Handshake => {
                self.state.set(ConnectionState::Closed);
                events.push(SessionEvent::Failed(WirePoolError::Transport(
                    "connection closed during handshake".into(),
                )));
            }
            ConnectionState::Connected => {
                self.finish(u16::from(CloseCode::Abnormal), "connection closed abnormally".into(), &mut events);
            }
            ConnectionState::Closing => {
                let (code, reason) = self
                    .close_origin
                    .clone()
                    .unwrap_or((u16::from(CloseCode::Abnormal), String::new()));
                self.finish(code, reason, &mut events);
            }
            ConnectionState::Closed => {}
        }
        events
    }

    /// Bytes read from the socket
    pub fn feed(&mut self, data: &[u8]) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Closed => return events,
            _ => {}
        }

        self.recv.extend_from_slice(data);

        if self.state() == ConnectionState::Handshake {
            self.process_handshake(&mut events);
        }
        if matches!(self.state(), ConnectionState::Connected | ConnectionState::Closing) {
            self.process_frames(&mut events);
        }

        self.compact();
        events
    }

    /// Queue an application message, fragmenting above the threshold
    pub fn send(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(WirePoolError::InvalidState(format!(
                "send while {:?}",
                self.state()
            )));
        }

        match opcode {
            OpCode::Continuation => {
                return Err(WirePoolError::InvalidState(
                    "continuation frames are produced by fragmentation".into(),
                ))
            }
            OpCode::Close => {
                let (code, reason) = parse_close_payload(payload, None)?;
                self.close(code, &reason);
                return Ok(());
            }
            OpCode::Ping | OpCode::Pong => {
                if payload.len() > MAX_CONTROL_PAYLOAD {
                    return Err(FrameError::ControlTooLarge(payload.len()).into());
                }
                self.push_frame(payload, opcode, true);
                return Ok(());
            }
            OpCode::Text | OpCode::Binary => {}
        }

        if payload.len() <= self.config.fragment_size {
            self.push_frame(payload, opcode, true);
        } else {
            let count = payload.len().div_ceil(self.config.fragment_size);
            for (i, chunk) in payload.chunks(self.config.fragment_size).enumerate() {
                let op = if i == 0 { opcode } else { OpCode::Continuation };
                self.push_frame(chunk, op, i + 1 == count);
            }
        }
        self.metrics.record_sent(payload.len());
        Ok(())
    }

    /// Keepalive Ping
    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Ping)?;
        self.liveness.record_ping_sent();
        self.metrics.record_ping();
        Ok(())
    }

    /// Start the close handshake
    ///
    /// Before open this abandons the attempt and reports `Failed(Cancelled)`
    /// through the returned events; once closing it does nothing.
    pub fn close(&mut self, code: u16, reason: &str) -> Vec<SessionEvent> {
        match self.state() {
            ConnectionState::Connected => {
                let code = if CloseCode::from(code).is_sendable() {
                    code
                } else {
                    u16::from(CloseCode::Normal)
                };
                self.push_frame(&close_payload(code, reason), OpCode::Close, true);
                self.close_origin = Some((code, reason.to_string()));
                self.state.set(ConnectionState::Closing);
                debug!("Close sent ({}): {}", code, reason);
                Vec::new()
            }
            ConnectionState::Connecting | ConnectionState::Handshake => self.fail(WirePoolError::Cancelled),
            ConnectionState::Closing | ConnectionState::Closed => Vec::new(),
        }
    }

    fn push_frame(&mut self, payload: &[u8], opcode: OpCode, fin: bool) {
        let start = self.outbound.len();
        let len = encoded_len(payload.len(), true);
        self.outbound.resize(start + len, 0);
        let written = encode_into(payload, opcode, fin, &mut self.outbound[start..]);
        self.outbound.truncate(start + written);
    }

    fn process_handshake(&mut self, events: &mut Vec<SessionEvent>) {
        let end = match find_head_end(&self.recv) {
            Some(end) => end,
            None => {
                if self.recv.len() > MAX_HANDSHAKE_RESPONSE {
                    self.state.set(ConnectionState::Closed);
                    events.push(SessionEvent::Failed(WirePoolError::Handshake(
                        "upgrade response too large".into(),
                    )));
                }
                return;
            }
        };

        let outcome = parse_head(&self.recv[..end])
            .and_then(|head| validate_response(&head, &self.key, self.config.verify_accept));

        match outcome {
            Ok(protocol) => {
                // anything after the head is already frame data
                self.cursor = end;
                self.protocol = protocol;
                self.state.set(ConnectionState::Connected);
                self.liveness.reset();
                events.push(SessionEvent::Opened);
            }
            Err(e) => {
                self.recv.clear();
                self.cursor = 0;
                self.state.set(ConnectionState::Closed);
                events.push(SessionEvent::Failed(e));
            }
        }
    }

    fn process_frames(&mut self, events: &mut Vec<SessionEvent>) {
        loop {
            if self.state() == ConnectionState::Closed {
                return;
            }

            let available = &self.recv[self.cursor..];
            let header = match decode_header(available, self.config.max_message_size) {
                Ok(Some(header)) => header,
                Ok(None) => return,
                Err(e) => {
                    self.protocol_violation(&e.to_string(), events);
                    return;
                }
            };
            if available.len() < header.frame_len() {
                return;
            }

            let raw = &available[header.header_len..header.frame_len()];
            let body = if header.opcode == OpCode::Close {
                match parse_close_payload(raw, header.mask) {
                    Ok(close) => FrameBody::Close(close),
                    Err(e) => FrameBody::Invalid(e),
                }
            } else {
                let mut payload = raw.to_vec();
                if let Some(key) = header.mask {
                    apply_mask(&mut payload, key);
                }
                FrameBody::Data(payload)
            };
            self.cursor += header.frame_len();

            match body {
                FrameBody::Invalid(e) => {
                    self.protocol_violation(&e.to_string(), events);
                    return;
                }
                FrameBody::Close(_) if self.fragment.is_some() => {
                    self.protocol_violation("Fragment not finished", events);
                    return;
                }
                FrameBody::Close((code, reason)) => self.on_close_frame(code, reason, events),
                FrameBody::Data(payload) => {
                    if !self.on_frame(header.opcode, header.fin, payload, events) {
                        return;
                    }
                }
            }
        }
    }

    /// Returns false when the frame was a protocol violation
    fn on_frame(&mut self, opcode: OpCode, fin: bool, payload: Vec<u8>, events: &mut Vec<SessionEvent>) -> bool {
        match opcode {
            OpCode::Continuation => {
                let (first_op, mut buffer) = match self.fragment.take() {
                    Some(fragment) => fragment,
                    None => {
                        self.protocol_violation("Unexpected continuation frame", events);
                        return false;
                    }
                };
                if buffer.len() + payload.len() > self.config.max_message_size {
                    self.protocol_violation("Fragmented message too large", events);
                    return false;
                }
                buffer.extend_from_slice(&payload);
                if fin {
                    self.deliver(first_op, buffer, events);
                } else {
                    self.fragment = Some((first_op, buffer));
                }
            }
            _ if self.fragment.is_some() => {
                self.protocol_violation("Fragment not finished", events);
                return false;
            }
            OpCode::Text | OpCode::Binary => {
                if fin {
                    self.deliver(opcode, payload, events);
                } else {
                    self.fragment = Some((opcode, payload));
                }
            }
            OpCode::Ping => {
                if self.state() == ConnectionState::Connected {
                    self.push_frame(&payload, OpCode::Pong, true);
                }
            }
            OpCode::Pong => {
                self.liveness.record_pong_received();
                self.metrics.record_pong();
            }
            OpCode::Close => {}
        }
        true
    }

    fn deliver(&mut self, opcode: OpCode, payload: Vec<u8>, events: &mut Vec<SessionEvent>) {
        self.metrics.record_received(payload.len());
        events.push(SessionEvent::Message { opcode, payload });
    }

    fn on_close_frame(&mut self, code: u16, reason: String, events: &mut Vec<SessionEvent>) {
        match self.state() {
            ConnectionState::Connected => {
                // peer spoke first: echo, and the handshake is complete
                self.state.set(ConnectionState::Closing);
                let echo = if CloseCode::from(code).is_sendable() {
                    code
                } else {
                    u16::from(CloseCode::Normal)
                };
                self.push_frame(&close_payload(echo, &reason), OpCode::Close, true);
                self.close_origin = Some((code, reason.clone()));
                debug!("Peer closed ({}): {}", code, reason);
                self.finish(code, reason, events);
            }
            ConnectionState::Closing => {
                let (code, reason) = self.close_origin.clone().unwrap_or((code, reason));
                self.finish(code, reason, events);
            }
            _ => {}
        }
    }

    fn protocol_violation(&mut self, reason: &str, events: &mut Vec<SessionEvent>) {
        warn!("Protocol violation: {}", reason);
        self.fragment = None;
        // whatever follows a bad frame cannot be trusted
        self.recv.clear();
        self.cursor = 0;

        match self.state() {
            ConnectionState::Connected => {
                let code = u16::from(CloseCode::Protocol);
                self.push_frame(&close_payload(code, reason), OpCode::Close, true);
                self.close_origin = Some((code, reason.to_string()));
                self.state.set(ConnectionState::Closing);
            }
            ConnectionState::Closing => {
                let (code, reason) = self
                    .close_origin
                    .clone()
                    .unwrap_or((u16::from(CloseCode::Protocol), reason.to_string()));
                self.finish(code, reason, events);
            }
            _ => {}
        }
    }

    /// Single exit to Closed after open; emits `Closed` at most once
    fn finish(&mut self, code: u16, reason: String, events: &mut Vec<SessionEvent>) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.state.set(ConnectionState::Closed);
        self.fragment = None;
        events.push(SessionEvent::Closed { code, reason });
    }

    fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        if self.cursor >= self.recv.len() {
            self.recv.clear();
            self.cursor = 0;
        } else if self.cursor > self.recv.len() / 2 {
            self.recv.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

enum FrameBody {
    Data(Vec<u8>),
    Close((u16, String)),
    Invalid(FrameError),
}

use crate::core::config::PoolConfig;
use crate::core::connection_state::ConnectionState;
use crate::core::frame::OpCode;
use crate::core::session::{Session, SessionConfig, SessionEvent};
use crate::core::stream::{self, BoxedStream};
use crate::core::url::ParsedUrl;
use crate::manager::slots::{ConnectionHandle, SlotEntry};
use crate::traits::error::{Result, WirePoolError};
use crate::traits::sink::{ConnectionRef, EventSink};
use crate::traits::tls::TlsProvider;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// How long to wait for the peer's Close echo before dropping the socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work the event loop forwards to one connection
#[derive(Debug)]
pub enum ConnectionCommand {
    Send { payload: Vec<u8>, opcode: OpCode },
    Close { code: u16, reason: String },
    /// Removed from the pool: best-effort Close, then silence
    Shutdown { code: u16 },
}

/// One socket-bound connection, run as a local task on the pool worker
///
/// Owns the socket, the session and the sink. Everything it touches is
/// private to the worker thread except the shared state cells in
/// [`SlotEntry`].
pub struct Connection {
    handle: ConnectionHandle,
    url: ParsedUrl,
    extra_headers: Vec<(String, String)>,
    sink: Box<dyn EventSink>,
    session: Session,
    config: Arc<PoolConfig>,
    tls: Option<Arc<dyn TlsProvider>>,
    rx: UnboundedReceiver<ConnectionCommand>,
    /// Sends queued before the handshake completed, flushed FIFO on open
    pending: VecDeque<(Vec<u8>, OpCode)>,
    /// Set once removed; no callback fires afterwards
    muted: bool,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: ConnectionHandle,
        url: ParsedUrl,
        extra_headers: Vec<(String, String)>,
        sink: Box<dyn EventSink>,
        entry: &SlotEntry,
        config: Arc<PoolConfig>,
        tls: Option<Arc<dyn TlsProvider>>,
        rx: UnboundedReceiver<ConnectionCommand>,
    ) -> Self {
        let session = Session::new(
            SessionConfig::from(config.as_ref()),
            Arc::clone(&entry.state),
            Arc::clone(&entry.liveness),
            Arc::clone(&entry.metrics),
        );
        Self {
            handle,
            url,
            extra_headers,
            sink,
            session,
            config,
            tls,
            rx,
            pending: VecDeque::new(),
            muted: false,
        }
    }

    pub async fn run(mut self) {
        debug!("{} connecting to {}", self.handle, self.url);

        let stream = match self.establish().await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                debug!("{} removed while connecting", self.handle);
                return;
            }
            Err(e) => {
                let events = self.session.fail(e);
                self.dispatch(events);
                return;
            }
        };

        self.drive(stream).await;
        trace!("{} task finished", self.handle);
    }

    /// TCP + TLS connect, still listening for commands
    ///
    /// `Ok(None)` means the connection was removed meanwhile.
    async fn establish(&mut self) -> Result<Option<BoxedStream>> {
        let connect = stream::open(&self.url, self.config.connect_timeout(), self.tls.as_ref());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return result.map(Some),
                command = self.rx.recv() => match command {
                    Some(ConnectionCommand::Send { payload, opcode }) => {
                        self.pending.push_back((payload, opcode));
                    }
                    Some(ConnectionCommand::Close { .. }) => return Err(WirePoolError::Cancelled),
                    Some(ConnectionCommand::Shutdown { .. }) | None => return Ok(None),
                },
            }
        }
    }

    async fn drive(&mut self, mut stream: BoxedStream) {
        let subprotocol = self.config.subprotocol.clone();
        if let Err(e) = self
            .session
            .begin_handshake(&self.url, subprotocol.as_deref(), &self.extra_headers)
        {
            let events = self.session.fail(e);
            self.dispatch(events);
            return;
        }

        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut close_deadline: Option<Instant> = None;
        // keepalive clock starts when this connection opens
        let ping_interval = self.config.ping_interval();
        let mut next_ping: Option<Instant> = None;

        loop {
            if self.session.has_outbound() {
                let bytes = self.session.take_outbound();
                if let Err(e) = stream.write_all(&bytes).await {
                    debug!("{} write failed: {}", self.handle, e);
                    let events = self.session.on_transport_closed();
                    self.dispatch(events);
                    break;
                }
            }

            match self.session.state() {
                ConnectionState::Closed => break,
                ConnectionState::Connected if next_ping.is_none() => {
                    next_ping = ping_interval.map(|interval| Instant::now() + interval);
                }
                ConnectionState::Closing => {
                    next_ping = None;
                    if close_deadline.is_none() {
                        close_deadline = Some(Instant::now() + CLOSE_TIMEOUT);
                    }
                }
                _ => {}
            }

            tokio::select! {
                read = stream.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("{} peer closed the socket", self.handle);
                        let events = self.session.on_transport_closed();
                        self.dispatch(events);
                        break;
                    }
                    Ok(n) => {
                        let events = self.session.feed(&buf[..n]);
                        self.dispatch(events);
                    }
                    Err(e) => {
                        debug!("{} read failed: {}", self.handle, e);
                        let events = self.session.on_transport_closed();
                        self.dispatch(events);
                        break;
                    }
                },
                command = self.rx.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            let bytes = self.session.take_outbound();
                            let _ = stream.write_all(&bytes).await;
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    debug!("{} no Close echo within {:?}", self.handle, CLOSE_TIMEOUT);
                    let events = self.session.on_transport_closed();
                    self.dispatch(events);
                    break;
                }
                _ = sleep_until(next_ping.unwrap_or_else(Instant::now)), if next_ping.is_some() => {
                    trace!("{} keepalive ping", self.handle);
                    if let Err(e) = self.session.ping(&[]) {
                        debug!("{} ping failed: {}", self.handle, e);
                    }
                    next_ping = ping_interval.map(|interval| Instant::now() + interval);
                }
            }
        }

        let _ = stream.shutdown().await;
    }

    /// Returns false when the connection should stop
    fn on_command(&mut self, command: ConnectionCommand) -> bool {
        match command {
            ConnectionCommand::Send { payload, opcode } => match self.session.state() {
                ConnectionState::Connecting | ConnectionState::Handshake => {
                    self.pending.push_back((payload, opcode));
                }
                ConnectionState::Connected => {
                    if let Err(e) = self.session.send(&payload, opcode) {
                        warn!("{} send rejected: {}", self.handle, e);
                    }
                }
                state => {
                    warn!("{} dropping {} byte send while {:?}", self.handle, payload.len(), state);
                }
            },
            ConnectionCommand::Close { code, reason } => {
                let events = self.session.close(code, &reason);
                self.dispatch(events);
            }
            ConnectionCommand::Shutdown { code } => {
                self.muted = true;
                if self.session.state() == ConnectionState::Connected {
                    let _ = self.session.close(code, "");
                }
                return false;
            }
        }
        true
    }

    fn dispatch(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            if self.muted {
                return;
            }
            match event {
                SessionEvent::Opened => {
                    info!("{} open ({})", self.handle, self.url);
                    self.sink
                        .on_open(&mut ConnectionRef::new(self.handle, &mut self.session));
                    self.flush_pending();
                }
                SessionEvent::Message { opcode, payload } => {
                    self.sink.on_message(
                        &mut ConnectionRef::new(self.handle, &mut self.session),
                        &payload,
                        opcode,
                    );
                }
                SessionEvent::Closed { code, reason } => {
                    info!("{} closed ({}): {}", self.handle, code, reason);
                    self.sink.on_close(
                        &mut ConnectionRef::new(self.handle, &mut self.session),
                        code,
                        &reason,
                    );
                }
                SessionEvent::Failed(e) => {
                    warn!("{} failed: {}", self.handle, e);
                    self.sink.on_failed(&e);
                }
            }
        }
    }

    fn flush_pending(&mut self) {
        while let Some((payload, opcode)) = self.pending.pop_front() {
            if self.session.state() != ConnectionState::Connected {
                warn!(
                    "{} dropping {} queued sends, connection no longer open",
                    self.handle,
                    self.pending.len() + 1
                );
                self.pending.clear();
                return;
            }
            if let Err(e) = self.session.send(&payload, opcode) {
                warn!("{} queued send rejected: {}", self.handle, e);
            }
        }
    }
}

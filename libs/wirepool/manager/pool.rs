use crate::core::config::PoolConfig;
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, ConnectionStats};
use crate::core::frame::OpCode;
use crate::core::liveness::Liveness;
use crate::core::reactor::{spawn_worker, Mailbox};
use crate::core::url::ParsedUrl;
use crate::http::request::check_header;
use crate::manager::event_loop::{EventLoop, PoolCommand, ReleaseFn};
use crate::manager::slots::{ConnectionHandle, SlotEntry, SlotTable};
use crate::traits::error::{Result, WirePoolError};
use crate::traits::sink::EventSink;
use crate::traits::tls::{default_provider, TlsProvider};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Worker thread bookkeeping; replaced wholesale on every restart
struct Lifecycle {
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    mailbox: Arc<Mailbox<PoolCommand>>,
}

struct PoolShared {
    config: Arc<PoolConfig>,
    tls: Option<Arc<dyn TlsProvider>>,
    /// Lock order: `lifecycle` before `table`
    lifecycle: Mutex<Lifecycle>,
    table: Mutex<SlotTable>,
}

/// Connection multiplexer
///
/// Hosts up to `max_connections` WebSocket connections on one background
/// thread. The thread starts with the first connection and is stopped and
/// joined when the last one is removed. A connection that fails or finishes
/// its close handshake gives its slot back on its own; its handle goes
/// stale. Cloning is cheap and every clone drives the same pool.
///
/// # Example
/// ```ignore
/// let pool = WsPool::new(PoolConfig::default())?;
/// let client = pool.connect(MySink::new(), "wss://stream.example.com/ws")?;
/// client.send_text("subscribe")?;
/// ```
#[derive(Clone)]
pub struct WsPool {
    shared: Arc<PoolShared>,
}

impl WsPool {
    /// Pool with the default TLS provider built from `config.tls`
    pub fn new(config: PoolConfig) -> Result<Self> {
        let tls = default_provider(&config.tls)?;
        Self::with_tls(config, tls)
    }

    /// Pool with an explicit TLS provider; `None` makes `wss://` fail
    pub fn with_tls(config: PoolConfig, tls: Option<Arc<dyn TlsProvider>>) -> Result<Self> {
        config.validate()?;
        let capacity = config.max_connections;
        Ok(Self {
            shared: Arc::new(PoolShared {
                config: Arc::new(config),
                tls,
                lifecycle: Mutex::new(Lifecycle {
                    worker: None,
                    running: Arc::new(AtomicBool::new(false)),
                    mailbox: Arc::new(Mailbox::new()),
                }),
                table: Mutex::new(SlotTable::new(capacity)),
            }),
        })
    }

    /// Register a connection and start connecting it
    ///
    /// Fails immediately with `PoolExhausted` at capacity; existing
    /// connections are unaffected.
    pub fn add<S: EventSink>(&self, sink: S, url: &str) -> Result<ConnectionHandle> {
        self.add_with_headers(sink, url, Vec::new())
    }

    /// [`add`](Self::add) with extra headers on the Upgrade request
    pub fn add_with_headers<S: EventSink>(
        &self,
        sink: S,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Result<ConnectionHandle> {
        let url = ParsedUrl::parse(url)?;
        if !url.scheme.is_websocket() {
            return Err(WirePoolError::InvalidUrl(format!(
                "{} is not a ws:// or wss:// URL",
                url
            )));
        }
        for (name, value) in &headers {
            check_header(name, value)?;
        }

        let entry = SlotEntry {
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Connecting)),
            liveness: Arc::new(Liveness::new()),
            metrics: Arc::new(AtomicMetrics::new()),
        };

        let mut life = self.shared.lifecycle.lock();
        let handle = match self.shared.table.lock().insert(entry.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Rejecting {}: {}", url, e);
                return Err(e);
            }
        };

        if life.worker.is_none() {
            if let Err(e) = self.start_worker(&mut life) {
                self.shared.table.lock().remove(handle);
                return Err(e);
            }
        }

        debug!("{} registered for {}", handle, url);
        life.mailbox.post(PoolCommand::Connect {
            handle,
            url,
            headers,
            sink: Box::new(sink),
            entry,
        })?;
        Ok(handle)
    }

    /// [`add`](Self::add) returning a handle that removes the connection on drop
    pub fn connect<S: EventSink>(&self, sink: S, url: &str) -> Result<PooledClient> {
        let handle = self.add(sink, url)?;
        Ok(PooledClient {
            pool: self.clone(),
            handle,
        })
    }

    /// Queue a message; per-connection FIFO, never blocks on I/O
    ///
    /// Sends issued before the handshake completes are held and flushed on
    /// open. Sends to a closing connection are dropped.
    pub fn send(&self, handle: ConnectionHandle, payload: impl Into<Vec<u8>>, opcode: OpCode) -> Result<()> {
        let life = self.shared.lifecycle.lock();
        if !self.shared.table.lock().contains(handle) {
            return Err(WirePoolError::StaleHandle);
        }
        life.mailbox.post(PoolCommand::Send {
            handle,
            payload: payload.into(),
            opcode,
        })
    }

    pub fn send_text(&self, handle: ConnectionHandle, text: &str) -> Result<()> {
        self.send(handle, text.as_bytes(), OpCode::Text)
    }

    pub fn send_binary(&self, handle: ConnectionHandle, data: &[u8]) -> Result<()> {
        self.send(handle, data, OpCode::Binary)
    }

    /// Queue the same message to every live connection
    ///
    /// Returns how many connections it was queued for.
    pub fn broadcast(&self, payload: &[u8], opcode: OpCode) -> usize {
        let life = self.shared.lifecycle.lock();
        let handles = self.shared.table.lock().handles();
        handles
            .into_iter()
            .filter(|&handle| {
                life.mailbox
                    .post(PoolCommand::Send {
                        handle,
                        payload: payload.to_vec(),
                        opcode,
                    })
                    .is_ok()
            })
            .count()
    }

    /// Start the close handshake; `on_close` fires when it completes
    pub fn close(&self, handle: ConnectionHandle, code: u16, reason: &str) -> Result<()> {
        let life = self.shared.lifecycle.lock();
        if !self.shared.table.lock().contains(handle) {
            return Err(WirePoolError::StaleHandle);
        }
        life.mailbox.post(PoolCommand::Close {
            handle,
            code,
            reason: reason.to_string(),
        })
    }

    /// Tear a connection down without further callbacks
    ///
    /// Idempotent: returns false for stale or already-removed handles.
    /// Removing the last connection stops and joins the worker, unless
    /// called from the worker itself (inside a callback), in which case
    /// the worker is only told to stop.
    pub fn remove(&self, handle: ConnectionHandle) -> bool {
        self.remove_with_code(handle, 1000)
    }

    fn remove_with_code(&self, handle: ConnectionHandle, code: u16) -> bool {
        let worker = {
            let mut life = self.shared.lifecycle.lock();
            let mut table = self.shared.table.lock();
            if table.remove(handle).is_none() {
                return false;
            }
            let now_empty = table.is_empty();
            drop(table);

            if let Err(e) = life.mailbox.post(PoolCommand::Remove { handle, code }) {
                warn!("{} remove not delivered: {}", handle, e);
            }
            debug!("{} removed", handle);

            if now_empty {
                Self::stop_worker(&mut life)
            } else {
                None
            }
        };
        // joined outside the lock so callbacks calling into the pool can finish
        join_worker(worker);
        true
    }

    /// Free the slot of a connection that ended without being removed
    ///
    /// Runs on the worker, so a worker stopped here is not joined.
    fn release(&self, handle: ConnectionHandle) -> bool {
        let worker = {
            let mut life = self.shared.lifecycle.lock();
            let mut table = self.shared.table.lock();
            if table.remove(handle).is_none() {
                return false;
            }
            let now_empty = table.is_empty();
            drop(table);
            debug!("{} released", handle);

            if now_empty {
                Self::stop_worker(&mut life)
            } else {
                None
            }
        };
        join_worker(worker);
        true
    }

    /// Remove every connection (Close 1001) and join the worker
    pub fn shutdown(&self) {
        let worker = {
            let mut life = self.shared.lifecycle.lock();
            let handles = {
                let mut table = self.shared.table.lock();
                let handles = table.handles();
                for handle in &handles {
                    table.remove(*handle);
                }
                handles
            };
            for handle in handles {
                let _ = life.mailbox.post(PoolCommand::Remove { handle, code: 1001 });
            }
            Self::stop_worker(&mut life)
        };
        join_worker(worker);
    }

    /// `None` for stale handles
    pub fn state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.shared.table.lock().get(handle).map(|entry| entry.state.get())
    }

    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.state(handle) == Some(ConnectionState::Connected)
    }

    /// False once no Pong arrived for longer than `timeout`; advisory
    pub fn is_alive(&self, handle: ConnectionHandle, timeout: Duration) -> bool {
        self.shared
            .table
            .lock()
            .get(handle)
            .map(|entry| entry.liveness.is_alive(timeout))
            .unwrap_or(false)
    }

    /// `None` for stale handles and connections that have not pinged yet
    pub fn time_since_last_ping(&self, handle: ConnectionHandle) -> Option<Duration> {
        self.shared
            .table
            .lock()
            .get(handle)
            .and_then(|entry| entry.liveness.time_since_last_ping())
    }

    pub fn stats(&self, handle: ConnectionHandle) -> Option<ConnectionStats> {
        self.shared.table.lock().get(handle).map(|entry| entry.metrics.snapshot())
    }

    pub fn len(&self) -> usize {
        self.shared.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.table.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.max_connections
    }

    /// Whether the background thread is up
    pub fn is_running(&self) -> bool {
        let life = self.shared.lifecycle.lock();
        life.worker.is_some() && life.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    fn start_worker(&self, life: &mut Lifecycle) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let mailbox = Arc::new(Mailbox::new());

        let config = Arc::clone(&self.shared.config);
        let tls = self.shared.tls.clone();
        let worker_mailbox = Arc::clone(&mailbox);
        let worker_running = Arc::clone(&running);
        let pool = Arc::downgrade(&self.shared);
        let release: ReleaseFn = Box::new(move |handle| {
            if let Some(shared) = pool.upgrade() {
                WsPool { shared }.release(handle);
            }
        });
        let worker = spawn_worker("wirepool-ws", move || {
            EventLoop::new(config, tls, worker_mailbox, worker_running, release).run()
        })?;

        life.worker = Some(worker);
        life.running = running;
        life.mailbox = mailbox;
        info!("WebSocket pool worker spawned");
        Ok(())
    }

    fn stop_worker(life: &mut Lifecycle) -> Option<JoinHandle<()>> {
        life.running.store(false, Ordering::Release);
        life.mailbox.wake();
        life.worker.take()
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let worker = {
            let life = self.lifecycle.get_mut();
            let handles = self.table.get_mut().handles();
            for handle in handles {
                self.table.get_mut().remove(handle);
                let _ = life.mailbox.post(PoolCommand::Remove { handle, code: 1001 });
            }
            WsPool::stop_worker(life)
        };
        join_worker(worker);
    }
}

fn join_worker(worker: Option<JoinHandle<()>>) {
    let Some(worker) = worker else {
        return;
    };
    if worker.thread().id() == std::thread::current().id() {
        debug!("Stop requested from the worker thread, not joining");
        return;
    }
    if worker.join().is_err() {
        error!("WebSocket pool worker panicked");
    }
}

/// Owned handle to one pooled connection; dropping it removes the connection
pub struct PooledClient {
    pool: WsPool,
    handle: ConnectionHandle,
}

impl PooledClient {
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn send(&self, payload: impl Into<Vec<u8>>, opcode: OpCode) -> Result<()> {
        self.pool.send(self.handle, payload, opcode)
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.pool.send_text(self.handle, text)
    }

    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.pool.send_binary(self.handle, data)
    }

    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.pool.close(self.handle, code, reason)
    }

    /// `Closed` once removed or ended
    pub fn state(&self) -> ConnectionState {
        self.pool.state(self.handle).unwrap_or(ConnectionState::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_connected(self.handle)
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.pool.is_alive(self.handle, timeout)
    }

    pub fn stats(&self) -> Option<ConnectionStats> {
        self.pool.stats(self.handle)
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.pool.remove(self.handle);
    }
}

use crate::core::config::PoolConfig;
use crate::core::frame::OpCode;
use crate::core::reactor::Mailbox;
use crate::core::url::ParsedUrl;
use crate::manager::connection::{Connection, ConnectionCommand};
use crate::manager::slots::{ConnectionHandle, SlotEntry};
use crate::traits::sink::EventSink;
use crate::traits::tls::TlsProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Grace period for connections to flush their Close frames on stop
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Commands posted by caller threads to the pool worker
pub enum PoolCommand {
    Connect {
        handle: ConnectionHandle,
        url: ParsedUrl,
        headers: Vec<(String, String)>,
        sink: Box<dyn EventSink>,
        entry: SlotEntry,
    },
    Send {
        handle: ConnectionHandle,
        payload: Vec<u8>,
        opcode: OpCode,
    },
    Close {
        handle: ConnectionHandle,
        code: u16,
        reason: String,
    },
    Remove {
        handle: ConnectionHandle,
        code: u16,
    },
    /// Posted by a connection task once it reached Closed on its own
    Finished { handle: ConnectionHandle },
}

/// Frees the pool slot of a connection that failed or closed
pub type ReleaseFn = Box<dyn Fn(ConnectionHandle) + Send>;

struct ConnectionTask {
    tx: UnboundedSender<ConnectionCommand>,
    task: JoinHandle<()>,
}

/// Body of the pool's background thread
///
/// Each tick drains the command mailbox and then waits on it for at most
/// `poll_timeout`; connection tasks do their socket I/O and keepalive on
/// the same thread while the loop waits.
pub struct EventLoop {
    config: Arc<PoolConfig>,
    tls: Option<Arc<dyn TlsProvider>>,
    mailbox: Arc<Mailbox<PoolCommand>>,
    running: Arc<AtomicBool>,
    release: ReleaseFn,
    connections: HashMap<ConnectionHandle, ConnectionTask>,
    /// Removed connections still flushing their Close
    retiring: Vec<JoinHandle<()>>,
}

impl EventLoop {
    pub fn new(
        config: Arc<PoolConfig>,
        tls: Option<Arc<dyn TlsProvider>>,
        mailbox: Arc<Mailbox<PoolCommand>>,
        running: Arc<AtomicBool>,
        release: ReleaseFn,
    ) -> Self {
        Self {
            config,
            tls,
            mailbox,
            running,
            release,
            connections: HashMap::new(),
            retiring: Vec::new(),
        }
    }

    pub async fn run(mut self) {
        info!("WebSocket pool worker started");
        let poll_timeout = self.config.poll_timeout();

        while self.running.load(Ordering::Acquire) {
            self.drain();
            self.retiring.retain(|task| !task.is_finished());

            self.mailbox.wait(poll_timeout).await;
        }

        self.shutdown().await;
        info!("WebSocket pool worker stopped");
    }

    fn drain(&mut self) {
        let commands: Vec<PoolCommand> = self.mailbox.drain().collect();
        for command in commands {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Connect {
                handle,
                url,
                headers,
                sink,
                entry,
            } => {
                let (tx, rx) = unbounded_channel();
                let connection = Connection::new(
                    handle,
                    url,
                    headers,
                    sink,
                    &entry,
                    Arc::clone(&self.config),
                    self.tls.clone(),
                    rx,
                );
                let mailbox = Arc::clone(&self.mailbox);
                let task = tokio::task::spawn_local(async move {
                    connection.run().await;
                    let _ = mailbox.post(PoolCommand::Finished { handle });
                });
                self.connections.insert(handle, ConnectionTask { tx, task });
            }
            PoolCommand::Send {
                handle,
                payload,
                opcode,
            } => self.forward(handle, ConnectionCommand::Send { payload, opcode }),
            PoolCommand::Close {
                handle,
                code,
                reason,
            } => self.forward(handle, ConnectionCommand::Close { code, reason }),
            PoolCommand::Remove { handle, code } => {
                if let Some(connection) = self.connections.remove(&handle) {
                    let _ = connection.tx.send(ConnectionCommand::Shutdown { code });
                    self.retiring.push(connection.task);
                    debug!("{} retired", handle);
                }
            }
            PoolCommand::Finished { handle } => {
                // removed connections already gave up their slot and sit in `retiring`
                if self.connections.remove(&handle).is_some() {
                    debug!("{} finished, releasing slot", handle);
                    (self.release)(handle);
                }
            }
        }
    }

    /// Hand a command to a live connection, skipping stale handles
    fn forward(&self, handle: ConnectionHandle, command: ConnectionCommand) {
        match self.connections.get(&handle) {
            Some(connection) => {
                if connection.tx.send(command).is_err() {
                    warn!("{} connection finished, dropping command", handle);
                }
            }
            None => trace!("{} unknown handle, dropping command", handle),
        }
    }

    async fn shutdown(&mut self) {
        // commands posted just before the stop flag still count
        self.drain();

        let mut tasks: Vec<JoinHandle<()>> = std::mem::take(&mut self.retiring);
        for (_, connection) in self.connections.drain() {
            let _ = connection.tx.send(ConnectionCommand::Shutdown { code: 1001 });
            tasks.push(connection.task);
        }
        if tasks.is_empty() {
            return;
        }

        debug!("Waiting for {} connections to close", tasks.len());
        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("Connections did not close within {:?}, aborting", SHUTDOWN_GRACE);
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

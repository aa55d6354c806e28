//! Background worker plumbing shared by both pools
//!
//! A worker is a dedicated OS thread running a current-thread tokio
//! runtime inside a `LocalSet`: every socket of a pool is driven by that
//! one thread, with tokio's reactor as the readiness poll. Callers talk to
//! it only through a [`Mailbox`].

use crate::traits::error::{Result, WirePoolError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::future::Future;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::error;

/// Cross-thread command queue with a wakeup for the worker
///
/// `post` never blocks; the worker drains everything queued since its
/// last tick in FIFO order.
pub struct Mailbox<C> {
    tx: Sender<C>,
    rx: Receiver<C>,
    notify: Notify,
}

impl<C> Mailbox<C> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            notify: Notify::new(),
        }
    }

    pub fn post(&self, command: C) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| WirePoolError::ChannelSend(e.to_string()))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Wake the worker without queueing anything
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn drain(&self) -> impl Iterator<Item = C> + '_ {
        self.rx.try_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Sleep until posted to, woken, or `timeout` elapses
    pub async fn wait(&self, timeout: Duration) {
        if !self.rx.is_empty() {
            return;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

impl<C> Default for Mailbox<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a named worker thread driving the future built by `make`
///
/// The future is constructed on the worker itself, so it may hold
/// `!Send` state and use `spawn_local`.
pub fn spawn_worker<F, Fut>(name: &str, make: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("{}: failed to build runtime: {}", thread_name, e);
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, make());
        })
        .map_err(WirePoolError::Io)
}

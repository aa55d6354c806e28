use crate::core::config::HttpPoolConfig;
use crate::core::reactor::{spawn_worker, Mailbox};
use crate::http::exchange::{perform, ExchangeEvent};
use crate::http::request::HttpRequest;
use crate::http::response::HttpReply;
use crate::traits::error::{Result, WirePoolError};
use crate::traits::response::ResponseSink;
use crate::traits::retry::RetryPolicy;
use crate::traits::tls::{default_provider, TlsProvider};
use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace, warn};

/// Identifier of one submitted request
pub type RequestId = u64;

/// Invoked on the worker thread with the final reply, before the future resolves
pub type ReplyCallback = Box<dyn FnOnce(&HttpReply) + Send + 'static>;

/// Write-once cell shared by a request and its [`ResponseFuture`]
struct ReplySlot {
    reply: Mutex<Option<HttpReply>>,
    ready: Condvar,
    waker: AtomicWaker,
}

impl ReplySlot {
    fn new() -> Self {
        Self {
            reply: Mutex::new(None),
            ready: Condvar::new(),
            waker: AtomicWaker::new(),
        }
    }

    /// First completion wins; later ones are ignored
    fn complete(&self, reply: HttpReply) -> bool {
        {
            let mut slot = self.reply.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reply);
        }
        self.ready.notify_all();
        self.waker.wake();
        true
    }
}

/// Handle to the eventual [`HttpReply`] of a request
///
/// Await it from async code, or block with [`wait`](Self::wait).
/// Transport failures, timeouts and cancellation resolve it with
/// `status_code == -1`.
pub struct ResponseFuture {
    id: RequestId,
    slot: Arc<ReplySlot>,
}

impl ResponseFuture {
    fn ready(id: RequestId, reply: HttpReply) -> Self {
        let slot = Arc::new(ReplySlot::new());
        slot.complete(reply);
        Self { id, slot }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn is_ready(&self) -> bool {
        self.slot.reply.lock().is_some()
    }

    /// Block the calling thread until the reply arrives
    pub fn wait(self) -> HttpReply {
        let mut slot = self.slot.reply.lock();
        loop {
            if let Some(reply) = slot.as_ref() {
                return reply.clone();
            }
            self.slot.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`; `None` if the reply is not in yet
    pub fn wait_timeout(&self, timeout: Duration) -> Option<HttpReply> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.reply.lock();
        loop {
            if let Some(reply) = slot.as_ref() {
                return Some(reply.clone());
            }
            if self.slot.ready.wait_until(&mut slot, deadline).timed_out() {
                return (*slot).clone();
            }
        }
    }
}

impl Future for ResponseFuture {
    type Output = HttpReply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<HttpReply> {
        if let Some(reply) = self.slot.reply.lock().clone() {
            return Poll::Ready(reply);
        }
        self.slot.waker.register(cx.waker());
        match self.slot.reply.lock().clone() {
            Some(reply) => Poll::Ready(reply),
            None => Poll::Pending,
        }
    }
}

/// Count of unresolved requests with an idle signal
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

struct Submission {
    id: RequestId,
    request: HttpRequest,
    slot: Arc<ReplySlot>,
    callback: Option<ReplyCallback>,
    sink: Option<Box<dyn ResponseSink>>,
}

enum HttpCommand {
    Submit(Submission),
    Cancel(RequestId),
}

/// Completion side of a request, owned by whoever settles it first
struct Completion {
    id: RequestId,
    slot: Arc<ReplySlot>,
    callback: Option<ReplyCallback>,
    sink: Option<Rc<RefCell<Box<dyn ResponseSink>>>>,
}

impl Completion {
    fn settle(self, result: Result<HttpReply>, pending: &Pending) {
        let reply = match result {
            Ok(reply) => {
                debug!("Request {} finished with {}", self.id, reply.status_code);
                reply
            }
            Err(e) => {
                warn!("Request {} failed: {}", self.id, e);
                if let Some(sink) = &self.sink {
                    sink.borrow_mut().on_failed(&e);
                }
                HttpReply::failure(e.to_string())
            }
        };
        if let Some(callback) = self.callback {
            callback(&reply);
        }
        self.slot.complete(reply);
        pending.decrement();
    }
}

struct InFlight {
    completion: Completion,
    abort: AbortHandle,
}

type InFlightMap = Rc<RefCell<HashMap<RequestId, InFlight>>>;

/// Body of the HTTP pool's background thread
struct HttpWorker {
    config: Arc<HttpPoolConfig>,
    tls: Option<Arc<dyn TlsProvider>>,
    retry: Arc<dyn RetryPolicy>,
    mailbox: Arc<Mailbox<HttpCommand>>,
    running: Arc<AtomicBool>,
    pending: Arc<Pending>,
    in_flight: InFlightMap,
}

impl HttpWorker {
    async fn run(self) {
        info!("HTTP pool worker started");
        let poll_timeout = self.config.poll_timeout();

        while self.running.load(Ordering::Acquire) {
            let commands: Vec<HttpCommand> = self.mailbox.drain().collect();
            for command in commands {
                match command {
                    HttpCommand::Submit(submission) => self.submit(submission),
                    HttpCommand::Cancel(id) => self.cancel(id),
                }
            }
            self.mailbox.wait(poll_timeout).await;
        }

        // queued but never started
        let commands: Vec<HttpCommand> = self.mailbox.drain().collect();
        for command in commands {
            if let HttpCommand::Submit(submission) = command {
                let completion = Completion {
                    id: submission.id,
                    slot: submission.slot,
                    callback: submission.callback,
                    sink: submission.sink.map(|sink| Rc::new(RefCell::new(sink))),
                };
                completion.settle(Err(WirePoolError::Shutdown), &self.pending);
            }
        }

        let in_flight: Vec<InFlight> = self.in_flight.borrow_mut().drain().map(|(_, f)| f).collect();
        if !in_flight.is_empty() {
            debug!("Failing {} in-flight requests", in_flight.len());
        }
        for flight in in_flight {
            flight.abort.abort();
            flight.completion.settle(Err(WirePoolError::Shutdown), &self.pending);
        }
        info!("HTTP pool worker stopped");
    }

    fn submit(&self, submission: Submission) {
        let Submission {
            id,
            request,
            slot,
            callback,
            sink,
        } = submission;
        debug!("Request {}: {} {}", id, request.method, request.url);

        let sink = sink.map(|sink| Rc::new(RefCell::new(sink)));
        let observer_sink = sink.clone();
        let collect_body = sink.is_none();
        let config = Arc::clone(&self.config);
        let tls = self.tls.clone();
        let retry = Arc::clone(&self.retry);
        let in_flight = Rc::clone(&self.in_flight);
        let pending = Arc::clone(&self.pending);

        let task = tokio::task::spawn_local(async move {
            let result = perform(request, &config, tls.as_ref(), retry.as_ref(), collect_body, move |event| {
                let Some(sink) = &observer_sink else {
                    return;
                };
                let mut sink = sink.borrow_mut();
                match event {
                    ExchangeEvent::Response(head) => {
                        sink.on_response(head.status_code, &head.status_message, &head.headers)
                    }
                    ExchangeEvent::Data { chunk, is_final } => sink.on_data(&chunk, is_final),
                }
            })
            .await;

            let flight = in_flight.borrow_mut().remove(&id);
            if let Some(flight) = flight {
                flight.completion.settle(result, &pending);
            }
        });

        self.in_flight.borrow_mut().insert(
            id,
            InFlight {
                completion: Completion {
                    id,
                    slot,
                    callback,
                    sink,
                },
                abort: task.abort_handle(),
            },
        );
    }

    fn cancel(&self, id: RequestId) {
        let flight = self.in_flight.borrow_mut().remove(&id);
        match flight {
            Some(flight) => {
                flight.abort.abort();
                info!("Request {} cancelled", id);
                flight.completion.settle(Err(WirePoolError::Cancelled), &self.pending);
            }
            None => trace!("Cancel for unknown or finished request {}", id),
        }
    }
}

struct Lifecycle {
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    mailbox: Arc<Mailbox<HttpCommand>>,
    closed: bool,
}

struct HttpShared {
    config: Arc<HttpPoolConfig>,
    tls: Option<Arc<dyn TlsProvider>>,
    retry: Arc<dyn RetryPolicy>,
    next_id: AtomicU64,
    pending: Arc<Pending>,
    lifecycle: Mutex<Lifecycle>,
}

impl HttpShared {
    fn shutdown(&self) {
        let worker = {
            let mut life = self.lifecycle.lock();
            life.closed = true;
            life.running.store(false, Ordering::Release);
            life.mailbox.wake();
            life.worker.take()
        };
        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("HTTP pool worker panicked");
            }
        }
    }
}

impl Drop for HttpShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Async request pool
///
/// Runs every request on one lazily started background thread and hands
/// back a [`ResponseFuture`] per request. Each future resolves exactly
/// once: with the final response after redirects, or with a
/// `status_code == -1` reply on failure, timeout, cancellation or
/// shutdown.
///
/// # Example
/// ```ignore
/// let pool = HttpPool::new(HttpPoolConfig::default())?;
/// let reply = pool.get("http://example.com/").wait();
/// println!("{} {}", reply.status_code, reply.text());
/// ```
#[derive(Clone)]
pub struct HttpPool {
    shared: Arc<HttpShared>,
}

impl HttpPool {
    pub fn new(config: HttpPoolConfig) -> Result<Self> {
        let tls = default_provider(&config.tls)?;
        Self::with_tls(config, tls)
    }

    /// Pool with an explicit TLS provider; `None` makes `https://` fail
    pub fn with_tls(config: HttpPoolConfig, tls: Option<Arc<dyn TlsProvider>>) -> Result<Self> {
        let retry = Arc::new(config.retry_policy());
        Self::with_retry_policy(config, tls, retry)
    }

    /// Pool whose connect retries follow `retry` instead of the backoff
    /// fields of `config`
    pub fn with_retry_policy(
        config: HttpPoolConfig,
        tls: Option<Arc<dyn TlsProvider>>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(HttpShared {
                config: Arc::new(config),
                tls,
                retry,
                next_id: AtomicU64::new(1),
                pending: Arc::new(Pending::new()),
                lifecycle: Mutex::new(Lifecycle {
                    worker: None,
                    running: Arc::new(AtomicBool::new(false)),
                    mailbox: Arc::new(Mailbox::new()),
                    closed: false,
                }),
            }),
        })
    }

    pub fn request(&self, request: HttpRequest) -> ResponseFuture {
        self.submit(request, None, None)
    }

    /// [`request`](Self::request), also calling `callback` with the reply
    pub fn request_with_callback<F>(&self, request: HttpRequest, callback: F) -> ResponseFuture
    where
        F: FnOnce(&HttpReply) + Send + 'static,
    {
        self.submit(request, Some(Box::new(callback)), None)
    }

    /// Deliver the response to `sink` as it arrives
    ///
    /// The returned future resolves with the status and headers only.
    pub fn stream<S: ResponseSink>(&self, request: HttpRequest, sink: S) -> ResponseFuture {
        self.submit(request, None, Some(Box::new(sink)))
    }

    pub fn get(&self, url: &str) -> ResponseFuture {
        match HttpRequest::get(url) {
            Ok(request) => self.request(request),
            Err(e) => self.rejected(e),
        }
    }

    pub fn post(&self, url: &str, body: impl Into<Vec<u8>>, content_type: &str) -> ResponseFuture {
        match HttpRequest::post(url, body).and_then(|request| request.content_type(content_type)) {
            Ok(request) => self.request(request),
            Err(e) => self.rejected(e),
        }
    }

    /// Abandon a request; its future resolves with a failure reply
    ///
    /// Unknown and already finished ids are ignored.
    pub fn cancel(&self, id: RequestId) {
        let life = self.shared.lifecycle.lock();
        if life.worker.is_some() {
            let _ = life.mailbox.post(HttpCommand::Cancel(id));
        }
    }

    pub fn has_pending_requests(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.get()
    }

    /// Block until no request is pending; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.pending.wait_idle(timeout)
    }

    pub fn is_running(&self) -> bool {
        let life = self.shared.lifecycle.lock();
        life.worker.is_some() && life.running.load(Ordering::Acquire)
    }

    /// Stop the worker; pending and later requests resolve with failures
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn config(&self) -> &HttpPoolConfig {
        &self.shared.config
    }

    fn next_id(&self) -> RequestId {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn rejected(&self, error: WirePoolError) -> ResponseFuture {
        let id = self.next_id();
        warn!("Request {} rejected: {}", id, error);
        ResponseFuture::ready(id, HttpReply::failure(error.to_string()))
    }

    fn submit(
        &self,
        request: HttpRequest,
        callback: Option<ReplyCallback>,
        sink: Option<Box<dyn ResponseSink>>,
    ) -> ResponseFuture {
        let id = self.next_id();
        let slot = Arc::new(ReplySlot::new());
        let future = ResponseFuture {
            id,
            slot: Arc::clone(&slot),
        };

        let mut life = self.shared.lifecycle.lock();
        let refusal = if life.closed {
            Some(WirePoolError::Shutdown)
        } else if life.worker.is_none() {
            self.start_worker(&mut life).err()
        } else {
            None
        };
        if let Some(e) = refusal {
            drop(life);
            warn!("Request {} refused: {}", id, e);
            let reply = HttpReply::failure(e.to_string());
            if let Some(mut sink) = sink {
                sink.on_failed(&e);
            }
            if let Some(callback) = callback {
                callback(&reply);
            }
            slot.complete(reply);
            return future;
        }

        self.shared.pending.increment();
        let posted = life.mailbox.post(HttpCommand::Submit(Submission {
            id,
            request,
            slot: Arc::clone(&slot),
            callback,
            sink,
        }));
        if let Err(e) = posted {
            self.shared.pending.decrement();
            slot.complete(HttpReply::failure(e.to_string()));
        }
        future
    }

    fn start_worker(&self, life: &mut Lifecycle) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let mailbox = Arc::new(Mailbox::new());

        let config = Arc::clone(&self.shared.config);
        let tls = self.shared.tls.clone();
        let retry = Arc::clone(&self.shared.retry);
        let pending = Arc::clone(&self.shared.pending);
        let worker_mailbox = Arc::clone(&mailbox);
        let worker_running = Arc::clone(&running);
        let worker = spawn_worker("wirepool-http", move || {
            HttpWorker {
                config,
                tls,
                retry,
                mailbox: worker_mailbox,
                running: worker_running,
                pending,
                in_flight: Rc::new(RefCell::new(HashMap::new())),
            }
            .run()
        })?;

        life.worker = Some(worker);
        life.running = running;
        life.mailbox = mailbox;
        Ok(())
    }
}

//! HTTP request state machine
//!
//! [`Exchange`] tracks one logical request through
//! `Idle -> Connecting -> Connected -> RequestSent -> ReadingResponse -> Done`
//! and decides what happens next: complete, or follow a redirect on a
//! fresh socket. [`execute`] drives it over real sockets with connect
//! retries; [`perform`] adds the request deadline.

use crate::core::config::HttpPoolConfig;
use crate::core::stream::{self, BoxedStream};
use crate::core::url::ParsedUrl;
use crate::http::request::{HttpRequest, Method};
use crate::http::response::{HttpReply, ParseEvent, ResponseHead, ResponseParser};
use crate::traits::error::{Result, WirePoolError};
use crate::traits::retry::RetryPolicy;
use crate::traits::tls::TlsProvider;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Connecting,
    Connected,
    RequestSent,
    ReadingResponse,
    Done,
}

/// Progress of the final (non-redirect) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    Response(ResponseHead),
    Data { chunk: Vec<u8>, is_final: bool },
}

/// What a finished exchange turned into
#[derive(Debug)]
pub enum Outcome {
    Complete(HttpReply),
    /// Request rewritten for the redirect target; connect again
    Redirect,
}

pub struct Exchange {
    request: HttpRequest,
    state: ExchangeState,
    parser: ResponseParser,
    max_response_size: usize,
    max_redirects: u32,
    redirect_count: u32,
    retry_count: u32,
    collect_body: bool,
    reply: Option<HttpReply>,
    /// Status and `Location` of a redirect response being read
    redirect: Option<(u16, String)>,
}

impl Exchange {
    /// # Arguments
    /// * `collect_body` - Accumulate the body into the final [`HttpReply`];
    ///   streaming callers leave it off and consume [`ExchangeEvent`]s
    pub fn new(request: HttpRequest, config: &HttpPoolConfig, collect_body: bool) -> Self {
        let parser = ResponseParser::new(config.max_response_size, request.method == Method::Head);
        Self {
            request,
            state: ExchangeState::Idle,
            parser,
            max_response_size: config.max_response_size,
            max_redirects: config.max_redirects,
            redirect_count: 0,
            retry_count: 0,
            collect_body,
            reply: None,
            redirect: None,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn target(&self) -> &ParsedUrl {
        &self.request.url
    }

    pub fn redirect_count(&self) -> u32 {
        self.redirect_count
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_done(&self) -> bool {
        self.state == ExchangeState::Done
    }

    /// A connect attempt begins (first try or retry)
    pub fn start_connect(&mut self) {
        self.state = ExchangeState::Connecting;
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Socket is up; returns the bytes to write
    pub fn on_connected(&mut self, user_agent: &str) -> Vec<u8> {
        self.state = ExchangeState::Connected;
        self.request.serialize(user_agent)
    }

    pub fn on_request_sent(&mut self) {
        self.state = ExchangeState::RequestSent;
    }

    pub fn on_data(&mut self, data: &[u8]) -> Result<Vec<ExchangeEvent>> {
        if self.state == ExchangeState::RequestSent {
            self.state = ExchangeState::ReadingResponse;
        }
        let parsed = self.parser.feed(data)?;
        Ok(self.translate(parsed))
    }

    /// Peer closed; completes a read-until-EOF body
    pub fn on_eof(&mut self) -> Result<Vec<ExchangeEvent>> {
        let parsed = self.parser.finish()?;
        let events = self.translate(parsed);
        self.state = ExchangeState::Done;
        Ok(events)
    }

    fn translate(&mut self, parsed: Vec<ParseEvent>) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        for event in parsed {
            match event {
                ParseEvent::Head(head) => {
                    trace!("{} {} from {}", head.status_code, head.status_message, self.request.url);
                    if head.is_redirect() {
                        let location = head.header("location").unwrap_or_default().to_string();
                        self.redirect = Some((head.status_code, location));
                    } else {
                        self.reply = Some(HttpReply::from_head(&head));
                        events.push(ExchangeEvent::Response(head));
                    }
                }
                ParseEvent::Body(chunk) => {
                    if self.redirect.is_some() {
                        continue;
                    }
                    if self.collect_body {
                        if let Some(reply) = self.reply.as_mut() {
                            reply.body.extend_from_slice(&chunk);
                        }
                    }
                    events.push(ExchangeEvent::Data {
                        chunk,
                        is_final: false,
                    });
                }
                ParseEvent::Done => {
                    self.state = ExchangeState::Done;
                    if self.redirect.is_none() {
                        events.push(ExchangeEvent::Data {
                            chunk: Vec::new(),
                            is_final: true,
                        });
                    }
                }
            }
        }
        events
    }

    /// Settle a `Done` exchange
    ///
    /// A redirect rewrites the request, resets the machine to `Idle` and
    /// counts against `max_redirects`.
    pub fn finish(&mut self) -> Result<Outcome> {
        if self.state != ExchangeState::Done {
            return Err(WirePoolError::InvalidState(format!(
                "finish while {:?}",
                self.state
            )));
        }

        let (status, location) = match self.redirect.take() {
            Some(redirect) => redirect,
            None => {
                return self
                    .reply
                    .take()
                    .map(Outcome::Complete)
                    .ok_or_else(|| WirePoolError::InvalidState("response already taken".into()))
            }
        };

        self.redirect_count += 1;
        if self.redirect_count > self.max_redirects {
            return Err(WirePoolError::TooManyRedirects(self.max_redirects));
        }
        self.request.redirect(status, &location)?;
        debug!(
            "Redirect {} ({}/{}) to {}",
            status, self.redirect_count, self.max_redirects, self.request.url
        );

        self.parser = ResponseParser::new(self.max_response_size, self.request.method == Method::Head);
        self.reply = None;
        self.state = ExchangeState::Idle;
        Ok(Outcome::Redirect)
    }
}

/// Drive an exchange to completion
///
/// Connect failures classed as transient are retried as `retry` allows;
/// anything after the request was written is final. Every
/// redirect opens a new socket. `observe` sees the final response only.
pub async fn execute<F>(
    exchange: &mut Exchange,
    config: &HttpPoolConfig,
    tls: Option<&Arc<dyn TlsProvider>>,
    retry: &dyn RetryPolicy,
    mut observe: F,
) -> Result<HttpReply>
where
    F: FnMut(ExchangeEvent),
{
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        let mut stream = connect_with_retry(exchange, config, tls, retry).await?;

        let request = exchange.on_connected(&config.user_agent);
        stream.write_all(&request).await?;
        stream.flush().await?;
        if exchange.request().half_close && !exchange.target().is_tls {
            stream.shutdown().await?;
        }
        exchange.on_request_sent();

        while !exchange.is_done() {
            let n = stream.read(&mut buf).await?;
            let events = if n == 0 {
                exchange.on_eof()?
            } else {
                exchange.on_data(&buf[..n])?
            };
            for event in events {
                observe(event);
            }
        }
        let _ = stream.shutdown().await;

        match exchange.finish()? {
            Outcome::Complete(reply) => return Ok(reply),
            Outcome::Redirect => continue,
        }
    }
}

async fn connect_with_retry(
    exchange: &mut Exchange,
    config: &HttpPoolConfig,
    tls: Option<&Arc<dyn TlsProvider>>,
    retry: &dyn RetryPolicy,
) -> Result<BoxedStream> {
    let mut attempt = 0usize;
    loop {
        exchange.start_connect();
        match stream::open(exchange.target(), config.request_timeout(), tls).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_transient() && retry.should_retry(attempt) => {
                let delay = retry.next_delay(attempt).unwrap_or_default();
                info!(
                    "Connect to {} failed ({}), retry {} in {:?}",
                    exchange.target(),
                    e,
                    attempt + 1,
                    delay
                );
                exchange.record_retry();
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`execute`] under the request deadline
pub async fn perform<F>(
    request: HttpRequest,
    config: &HttpPoolConfig,
    tls: Option<&Arc<dyn TlsProvider>>,
    retry: &dyn RetryPolicy,
    collect_body: bool,
    observe: F,
) -> Result<HttpReply>
where
    F: FnMut(ExchangeEvent),
{
    let mut exchange = Exchange::new(request, config, collect_body);
    let deadline = config.request_timeout();
    let outcome = tokio::time::timeout(deadline, execute(&mut exchange, config, tls, retry, observe)).await;
    match outcome {
        Ok(result) => result,
        Err(_) => Err(WirePoolError::Timeout(format!(
            "request to {} exceeded {:?}",
            exchange.target(),
            deadline
        ))),
    }
}

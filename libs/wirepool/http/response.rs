//! HTTP/1.1 response parsing
//!
//! `ResponseParser` is incremental: feed it whatever the socket produced
//! and it emits the head once `\r\n\r\n` has arrived, then body chunks as
//! they become available. Bodies are delimited by `Content-Length`,
//! `Transfer-Encoding: chunked`, or the peer closing the connection.

use crate::traits::error::{Result, WirePoolError};

/// Status line plus headers larger than this are rejected
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status_code: u16,
    pub status_message: String,
    /// Headers in wire order, names as sent
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.header("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| WirePoolError::Transport(format!("invalid Content-Length: {}", v))),
            None => Ok(None),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| {
                v.rsplit(',')
                    .next()
                    .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code) && self.header("location").is_some()
    }

    /// 1xx, 204 and 304 never carry a body
    pub fn forbids_body(&self) -> bool {
        (100..200).contains(&self.status_code) || self.status_code == 204 || self.status_code == 304
    }
}

/// Offset just past the `\r\n\r\n` terminating a message head
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parse a status line and header block (terminator included or not)
pub fn parse_head(raw: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(WirePoolError::Transport(format!(
            "malformed status line: {}",
            status_line
        )));
    }
    let status_code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| WirePoolError::Transport(format!("malformed status line: {}", status_line)))?;
    let status_message = parts.next().unwrap_or_default().trim().to_string();

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        // obsolete line folding continues the previous value
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(ResponseHead {
        version: version.to_string(),
        status_code,
        status_message,
        headers,
    })
}

/// Events produced while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Head(ResponseHead),
    Body(Vec<u8>),
    /// Response complete; no further events follow
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    Length(usize),
    Chunked(ChunkState),
    UntilEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Body(BodyMode),
    Done,
}

/// Incremental response parser
#[derive(Debug)]
pub struct ResponseParser {
    buf: Vec<u8>,
    phase: Phase,
    head_request: bool,
    max_body: usize,
    body_received: usize,
}

impl ResponseParser {
    /// # Arguments
    /// * `max_body` - Upper bound on body bytes before failing
    /// * `head_request` - The request was `HEAD`, so no body follows
    pub fn new(max_body: usize, head_request: bool) -> Self {
        Self {
            buf: Vec::new(),
            phase: Phase::Head,
            head_request,
            max_body,
            body_received: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Whether the head has been parsed
    pub fn has_head(&self) -> bool {
        self.phase != Phase::Head
    }

    /// Consume bytes read from the socket
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ParseEvent>> {
        let mut events = Vec::new();
        if self.phase == Phase::Done {
            return Ok(events);
        }
        self.buf.extend_from_slice(data);
        self.advance(&mut events)?;
        Ok(events)
    }

    /// The peer closed its side of the connection
    pub fn finish(&mut self) -> Result<Vec<ParseEvent>> {
        let mut events = Vec::new();
        match self.phase {
            Phase::Done => {}
            Phase::Head => {
                return Err(WirePoolError::Transport(
                    "connection closed before response head".into(),
                ))
            }
            Phase::Body(BodyMode::UntilEof) => {
                if !self.buf.is_empty() {
                    let chunk = std::mem::take(&mut self.buf);
                    self.account(chunk.len())?;
                    events.push(ParseEvent::Body(chunk));
                }
                self.phase = Phase::Done;
                events.push(ParseEvent::Done);
            }
            Phase::Body(_) => {
                return Err(WirePoolError::Transport(
                    "connection closed before response body completed".into(),
                ))
            }
        }
        Ok(events)
    }

    fn account(&mut self, len: usize) -> Result<()> {
        self.body_received += len;
        if self.body_received > self.max_body {
            return Err(WirePoolError::Transport(format!(
                "response body exceeds {} bytes",
                self.max_body
            )));
        }
        Ok(())
    }

    fn advance(&mut self, events: &mut Vec<ParseEvent>) -> Result<()> {
        loop {
            match self.phase {
                Phase::Done => return Ok(()),
                Phase::Head => {
                    let end = match find_head_end(&self.buf) {
                        Some(end) => end,
                        None if self.buf.len() > MAX_HEAD_SIZE => {
                            return Err(WirePoolError::Transport(format!(
                                "response head exceeds {} bytes",
                                MAX_HEAD_SIZE
                            )))
                        }
                        None => return Ok(()),
                    };
                    let head = parse_head(&self.buf[..end])?;
                    self.buf.drain(..end);

                    // interim responses (100 Continue and friends) are skipped
                    if (100..200).contains(&head.status_code) && head.status_code != 101 {
                        continue;
                    }

                    let mode = if self.head_request || head.forbids_body() {
                        None
                    } else if head.is_chunked() {
                        Some(BodyMode::Chunked(ChunkState::Size))
                    } else {
                        match head.content_length()? {
                            Some(0) => None,
                            Some(n) => {
                                if n > self.max_body {
                                    return Err(WirePoolError::Transport(format!(
                                        "response body of {} bytes exceeds {} bytes",
                                        n, self.max_body
                                    )));
                                }
                                Some(BodyMode::Length(n))
                            }
                            None => Some(BodyMode::UntilEof),
                        }
                    };

                    events.push(ParseEvent::Head(head));
                    match mode {
                        Some(mode) => self.phase = Phase::Body(mode),
                        None => {
                            self.phase = Phase::Done;
                            events.push(ParseEvent::Done);
                        }
                    }
                }
                Phase::Body(BodyMode::UntilEof) => {
                    if !self.buf.is_empty() {
                        let chunk = std::mem::take(&mut self.buf);
                        self.account(chunk.len())?;
                        events.push(ParseEvent::Body(chunk));
                    }
                    return Ok(());
                }
                Phase::Body(BodyMode::Length(remaining)) => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.buf.len());
                    let chunk: Vec<u8> = self.buf.drain(..take).collect();
                    self.account(chunk.len())?;
                    events.push(ParseEvent::Body(chunk));
                    if take == remaining {
                        self.phase = Phase::Done;
                        events.push(ParseEvent::Done);
                    } else {
                        self.phase = Phase::Body(BodyMode::Length(remaining - take));
                    }
                }
                Phase::Body(BodyMode::Chunked(state)) => {
                    if !self.advance_chunked(state, events)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One step of chunked decoding; false when more input is needed
    fn advance_chunked(&mut self, state: ChunkState, events: &mut Vec<ParseEvent>) -> Result<bool> {
        match state {
            ChunkState::Size => {
                let line_end = match self.buf.windows(2).position(|w| w == b"\r\n") {
                    Some(pos) => pos,
                    None => return Ok(false),
                };
                let line = String::from_utf8_lossy(&self.buf[..line_end]).into_owned();
                self.buf.drain(..line_end + 2);

                let size_str = line.split(';').next().unwrap_or_default().trim();
                let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                    WirePoolError::Transport(format!("invalid chunk size: {}", line))
                })?;
                self.phase = Phase::Body(BodyMode::Chunked(if size == 0 {
                    ChunkState::Trailers
                } else {
                    ChunkState::Data(size)
                }));
                Ok(true)
            }
            ChunkState::Data(remaining) => {
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buf.len());
                let chunk: Vec<u8> = self.buf.drain(..take).collect();
                self.account(chunk.len())?;
                events.push(ParseEvent::Body(chunk));
                self.phase = Phase::Body(BodyMode::Chunked(if take == remaining {
                    ChunkState::DataEnd
                } else {
                    ChunkState::Data(remaining - take)
                }));
                Ok(true)
            }
            ChunkState::DataEnd => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if &self.buf[..2] != b"\r\n" {
                    return Err(WirePoolError::Transport("missing CRLF after chunk".into()));
                }
                self.buf.drain(..2);
                self.phase = Phase::Body(BodyMode::Chunked(ChunkState::Size));
                Ok(true)
            }
            ChunkState::Trailers => {
                let line_end = match self.buf.windows(2).position(|w| w == b"\r\n") {
                    Some(pos) => pos,
                    None => return Ok(false),
                };
                let empty = line_end == 0;
                self.buf.drain(..line_end + 2);
                if empty {
                    self.phase = Phase::Done;
                    events.push(ParseEvent::Done);
                }
                Ok(true)
            }
        }
    }
}

/// Completed result of one logical request
///
/// `status_code` is -1 when the request failed at the transport level or
/// timed out; `status_message` then carries the failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status_code: i32,
    pub status_message: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status_code: -1,
            status_message: reason.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn from_head(head: &ResponseHead) -> Self {
        Self {
            status_code: head.status_code as i32,
            status_message: head.status_message.clone(),
            headers: head.headers.clone(),
            body: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status_code < 0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

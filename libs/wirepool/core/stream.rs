//! Socket setup shared by the WebSocket and HTTP paths

use crate::core::url::ParsedUrl;
use crate::traits::error::{Result, WirePoolError};
use crate::traits::tls::TlsProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, trace};

/// Byte stream the runtime reads and writes: plain TCP or TLS over TCP
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Non-blocking TCP connect bounded by `timeout`
///
/// Tries every resolved address in turn and keeps the last error.
pub async fn connect_tcp(url: &ParsedUrl, timeout: Duration) -> Result<TcpStream> {
    let target = format!("{}:{}", url.host, url.port);
    let stream = tokio::time::timeout(timeout, connect_any(&url.host, url.port))
        .await
        .map_err(|_| WirePoolError::Timeout(format!("connect to {}", target)))??;

    // SO_ERROR: a connect can report success and still carry a pending error
    if let Some(e) = stream.take_error()? {
        return Err(WirePoolError::Io(e));
    }
    stream.set_nodelay(true)?;
    debug!("TCP connected to {}", target);
    Ok(stream)
}

async fn connect_any(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        trace!("Connecting to {}:{} ({})", host, port, addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => WirePoolError::Io(e),
        None => WirePoolError::Transport(format!("no addresses for {}:{}", host, port)),
    })
}

/// Connect and, for `wss`/`https`, run the TLS handshake
pub async fn open(
    url: &ParsedUrl,
    timeout: Duration,
    tls: Option<&Arc<dyn TlsProvider>>,
) -> Result<BoxedStream> {
    if !url.is_tls {
        return Ok(Box::new(connect_tcp(url, timeout).await?));
    }

    let provider = tls.ok_or(WirePoolError::TlsUnavailable)?;
    let tcp = connect_tcp(url, timeout).await?;
    tokio::time::timeout(timeout, provider.connect(tcp, &url.host))
        .await
        .map_err(|_| WirePoolError::Timeout(format!("TLS handshake with {}", url.host)))?
}

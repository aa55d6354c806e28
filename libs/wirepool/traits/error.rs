use thiserror::Error;

/// Frame-level decoding/validation failures
///
/// Every variant is a protocol violation: the session answers it with
/// close code 1002.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// RSV1-3 set without a negotiated extension
    #[error("reserved bits set: {0:#05b}")]
    ReservedBits(u8),

    /// Opcode outside the RFC6455 table
    #[error("unknown opcode: {0:#x}")]
    InvalidOpCode(u8),

    /// Control frames must not be fragmented
    #[error("fragmented control frame")]
    FragmentedControl,

    /// Control frame payload above 125 bytes
    #[error("control frame payload too large: {0} bytes")]
    ControlTooLarge(usize),

    /// Declared payload exceeds the configured maximum
    #[error("payload of {len} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { len: u64, max: usize },

    /// 64-bit length with the most significant bit set
    #[error("invalid 64-bit payload length")]
    InvalidLength,

    /// Close payload of exactly one byte
    #[error("malformed close payload")]
    MalformedClose,
}

/// Main error type for wirepool
#[derive(Error, Debug)]
pub enum WirePoolError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect refused, reset, or peer vanished
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upgrade response rejected
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Peer violated the WebSocket protocol
    #[error("Protocol error ({code}): {reason}")]
    Protocol { code: u16, reason: String },

    /// Malformed frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Connection table is full
    #[error("Connection pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    /// Handle refers to a removed connection
    #[error("Stale connection handle")]
    StaleHandle,

    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Secure scheme requested but no TLS provider is available
    #[error("TLS support not available")]
    TlsUnavailable,

    /// TLS provider failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Redirect chain exceeded the configured bound
    #[error("Too many redirects ({0})")]
    TooManyRedirects(u32),

    /// Header name or value that cannot go on the wire as-is
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Request cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Pool is shutting down
    #[error("Pool shut down")]
    Shutdown,
}

impl WirePoolError {
    /// Whether a failed connect attempt may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            WirePoolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::AddrNotAvailable
                    | std::io::ErrorKind::Interrupted
            ),
            WirePoolError::Transport(_) | WirePoolError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result type for wirepool operations
pub type Result<T> = std::result::Result<T, WirePoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_converts() {
        let err: WirePoolError = FrameError::InvalidOpCode(0x3).into();
        assert!(matches!(err, WirePoolError::Frame(FrameError::InvalidOpCode(3))));
    }

    #[test]
    fn test_transient_classification() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(WirePoolError::Io(refused).is_transient());
        assert!(!WirePoolError::PoolExhausted { capacity: 1 }.is_transient());
        assert!(!WirePoolError::InvalidUrl("x".into()).is_transient());
    }
}

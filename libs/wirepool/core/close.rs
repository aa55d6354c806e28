//! Close codes and close-frame payloads

use crate::core::frame::MAX_CONTROL_PAYLOAD;
use crate::traits::error::FrameError;

/// Status codes carried by Close frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: purpose fulfilled
    Normal,
    /// 1001: endpoint going away
    Away,
    /// 1002: protocol error
    Protocol,
    /// 1003: unacceptable data type
    Unsupported,
    /// 1005: no status present (never sent on the wire)
    Status,
    /// 1006: closed without a Close frame (never sent on the wire)
    Abnormal,
    /// 1007: data inconsistent with message type
    Invalid,
    /// 1008: policy violation
    Policy,
    /// 1009: message too big
    Size,
    /// 1010: extension negotiation failed
    Extension,
    /// 1011: unexpected server condition
    Error,
    Other(u16),
}

impl CloseCode {
    /// Whether this code may appear in a Close frame on the wire
    pub fn is_sendable(&self) -> bool {
        match *self {
            CloseCode::Status | CloseCode::Abnormal => false,
            CloseCode::Other(code) => (3000..=4999).contains(&code),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

/// Build a Close payload: big-endian code followed by the reason
///
/// The reason is truncated on a char boundary so the payload fits in a
/// control frame.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// Parse a Close payload straight from the wire bytes
///
/// `raw` is the payload as received. When `mask` is set the code is read
/// first and then XORed with the first two key bytes, and reason byte `i`
/// is unmasked with `mask[(i + 2) % 4]`. An empty payload reports 1000.
pub fn parse_close_payload(raw: &[u8], mask: Option<[u8; 4]>) -> Result<(u16, String), FrameError> {
    match raw.len() {
        0 => return Ok((1000, String::new())),
        1 => return Err(FrameError::MalformedClose),
        _ => {}
    }

    let mut code = u16::from_be_bytes([raw[0], raw[1]]);
    let mut reason = raw[2..].to_vec();

    if let Some(key) = mask {
        code ^= u16::from_be_bytes([key[0], key[1]]);
        for (i, byte) in reason.iter_mut().enumerate() {
            *byte ^= key[(i + 2) % 4];
        }
    }

    Ok((code, String::from_utf8_lossy(&reason).into_owned()))
}

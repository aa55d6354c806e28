//! RFC6455 frame codec
//!
//! Pure functions translating between payloads and wire frames. Client
//! frames are always masked; frames from the server arrive unmasked, but
//! `decode` accepts both so the same codec serves tests and tooling.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::core::mask::apply_mask;
use crate::traits::error::FrameError;
use rand::RngCore;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Close, Ping and Pong: never fragmented, payload at most 125 bytes
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Text or Binary, the opcodes that may open a fragmented message
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    /// Key the payload was masked with on the wire, if any
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

/// Parsed frame header; payload bytes are left in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    /// Bytes occupied by the header, extended length and mask key
    pub header_len: usize,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Total on-wire size of the frame
    pub fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }
}

/// Outcome of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet; keep them and read more
    Incomplete,
    /// One frame, and how many input bytes it used
    Complete { frame: Frame, consumed: usize },
}

/// Header size for a payload of `payload_len` bytes
pub fn header_len(payload_len: usize, masked: bool) -> usize {
    let base = match payload_len {
        0..=125 => 2,
        126..=65535 => 4,
        _ => 10,
    };
    if masked {
        base + 4
    } else {
        base
    }
}

/// Exact size of the encoded frame
pub fn encoded_len(payload_len: usize, masked: bool) -> usize {
    header_len(payload_len, masked) + payload_len
}

/// Fresh masking key from the thread-local CSPRNG
pub fn random_mask() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Encode a client frame with a fresh random mask key
pub fn encode(payload: &[u8], opcode: OpCode, fin: bool) -> Vec<u8> {
    encode_frame(payload, opcode, fin, Some(random_mask()))
}

/// Encode a client frame into `out` with a fresh random mask key
///
/// Returns the number of bytes written, or 0 when `out` is too small
/// (size it with [`encoded_len`] and try again).
pub fn encode_into(payload: &[u8], opcode: OpCode, fin: bool, out: &mut [u8]) -> usize {
    encode_frame_into(payload, opcode, fin, Some(random_mask()), out)
}

/// Encode with an explicit key, or unmasked when `mask` is `None`
pub fn encode_frame(payload: &[u8], opcode: OpCode, fin: bool, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = vec![0u8; encoded_len(payload.len(), mask.is_some())];
    let written = encode_frame_into(payload, opcode, fin, mask, &mut out);
    out.truncate(written);
    out
}

/// Zero-copy encoder behind every other `encode*` function
pub fn encode_frame_into(
    payload: &[u8],
    opcode: OpCode,
    fin: bool,
    mask: Option<[u8; 4]>,
    out: &mut [u8],
) -> usize {
    let len = payload.len();
    let total = encoded_len(len, mask.is_some());
    if out.len() < total {
        return 0;
    }

    out[0] = if fin { 0x80 } else { 0x00 } | u8::from(opcode);
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };

    let mut pos = match len {
        0..=125 => {
            out[1] = mask_bit | len as u8;
            2
        }
        126..=65535 => {
            out[1] = mask_bit | 126;
            out[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        }
        _ => {
            out[1] = mask_bit | 127;
            out[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        }
    };

    if let Some(key) = mask {
        out[pos..pos + 4].copy_from_slice(&key);
        pos += 4;
    }

    let body = &mut out[pos..pos + len];
    body.copy_from_slice(payload);
    if let Some(key) = mask {
        apply_mask(body, key);
    }

    total
}

/// Parse and validate a frame header without touching the payload
///
/// `Ok(None)` means the header itself is not complete yet.
pub fn decode_header(bytes: &[u8], max_payload: usize) -> Result<Option<FrameHeader>, FrameError> {
    if bytes.len() < 2 {
        return Ok(None);
    }

    let fin = bytes[0] & 0x80 != 0;
    let rsv = (bytes[0] >> 4) & 0x07;
    if rsv != 0 {
        return Err(FrameError::ReservedBits(rsv));
    }
    let opcode = OpCode::try_from(bytes[0] & 0x0F)?;
    let masked = bytes[1] & 0x80 != 0;
    let len7 = bytes[1] & 0x7F;

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len7 as usize > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLarge(len7 as usize));
        }
    }

    let (declared, mut pos): (u64, usize) = match len7 {
        126 => {
            if bytes.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([bytes[2], bytes[3]]) as u64, 4)
        }
        127 => {
            if bytes.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(FrameError::InvalidLength);
            }
            (len, 10)
        }
        n => (n as u64, 2),
    };

    let payload_len = usize::try_from(declared).map_err(|_| FrameError::PayloadTooLarge {
        len: declared,
        max: max_payload,
    })?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len: declared,
            max: max_payload,
        });
    }

    let mask = if masked {
        if bytes.len() < pos + 4 {
            return Ok(None);
        }
        let key = [bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        header_len: pos,
        payload_len,
    }))
}

/// Decode one frame from the front of `bytes`
pub fn decode(bytes: &[u8]) -> Result<Decoded, FrameError> {
    decode_with_limit(bytes, usize::MAX)
}

/// Decode one frame, rejecting payloads larger than `max_payload`
///
/// The input is never modified; the unmasked payload is a copy.
pub fn decode_with_limit(bytes: &[u8], max_payload: usize) -> Result<Decoded, FrameError> {
    let header = match decode_header(bytes, max_payload)? {
        Some(header) => header,
        None => return Ok(Decoded::Incomplete),
    };

    let end = header.frame_len();
    if bytes.len() < end {
        return Ok(Decoded::Incomplete);
    }

    let mut payload = bytes[header.header_len..end].to_vec();
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Complete {
        frame: Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask: header.mask,
            payload,
        },
        consumed: end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_complete(bytes: &[u8]) -> (Frame, usize) {
        match decode(bytes).unwrap() {
            Decoded::Complete { frame, consumed } => (frame, consumed),
            Decoded::Incomplete => panic!("frame should be complete"),
        }
    }

    #[test]
    fn test_round_trip_edge_payloads() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0x00; 7],
            vec![0xFF; 33],
            b"hello\0world".to_vec(),
            (0..=255u8).collect(),
        ];

        for payload in payloads {
            for opcode in [OpCode::Text, OpCode::Binary] {
                let encoded = encode(&payload, opcode, true);
                let (frame, consumed) = decode_complete(&encoded);
                assert_eq!(consumed, encoded.len());
                assert_eq!(frame.opcode, opcode);
                assert!(frame.fin);
                assert_eq!(frame.payload, payload);
            }
        }
    }

    #[test]
    fn test_length_tiers() {
        for (len, expected_header) in [(125usize, 2usize), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0x5A; len];
            let encoded = encode_frame(&payload, OpCode::Binary, true, None);
            assert_eq!(encoded.len(), expected_header + len, "len {}", len);

            let masked = encode(&payload, OpCode::Binary, true);
            assert_eq!(masked.len(), expected_header + 4 + len, "masked len {}", len);

            let (frame, _) = decode_complete(&masked);
            assert_eq!(frame.payload.len(), len);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_client_frames_are_masked_with_fresh_keys() {
        let a = encode(b"same payload", OpCode::Text, true);
        let b = encode(b"same payload", OpCode::Text, true);
        assert_ne!(a[1] & 0x80, 0);
        // 2^-32 chance of a spurious collision
        assert_ne!(a[2..6], b[2..6]);
    }

    #[test]
    fn test_known_unmasked_encoding() {
        let encoded = encode_frame(b"Hello", OpCode::Text, true, None);
        assert_eq!(encoded, vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_known_masked_encoding() {
        // RFC6455 section 5.7
        let encoded = encode_frame(b"Hello", OpCode::Text, true, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            encoded,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_into_undersized_buffer_returns_zero() {
        let payload = vec![1u8; 200];
        let needed = encoded_len(payload.len(), true);

        let mut small = vec![0u8; needed - 1];
        assert_eq!(encode_into(&payload, OpCode::Binary, true, &mut small), 0);

        let mut exact = vec![0u8; needed];
        assert_eq!(encode_into(&payload, OpCode::Binary, true, &mut exact), needed);
        let (frame, _) = decode_complete(&exact);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_incomplete_at_every_prefix() {
        let encoded = encode(&vec![7u8; 300], OpCode::Binary, false);
        for cut in 0..encoded.len() {
            assert_eq!(decode(&encoded[..cut]).unwrap(), Decoded::Incomplete, "cut {}", cut);
        }
        let (frame, consumed) = decode_complete(&encoded);
        assert!(!frame.fin);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut stream = encode(b"first", OpCode::Text, true);
        let first_len = stream.len();
        stream.extend(encode(b"second", OpCode::Binary, true));

        let (frame, consumed) = decode_complete(&stream);
        assert_eq!(consumed, first_len);
        assert_eq!(frame.payload, b"first");

        let (frame, _) = decode_complete(&stream[consumed..]);
        assert_eq!(frame.payload, b"second");
        assert_eq!(frame.opcode, OpCode::Binary);
    }

    #[test]
    fn test_decode_does_not_mutate_input() {
        let encoded = encode(b"immutable", OpCode::Text, true);
        let snapshot = encoded.clone();
        let _ = decode(&encoded).unwrap();
        assert_eq!(encoded, snapshot);
    }

    #[test]
    fn test_rejects_reserved_bits() {
        let mut encoded = encode_frame(b"x", OpCode::Text, true, None);
        encoded[0] |= 0x40;
        assert_eq!(decode(&encoded), Err(FrameError::ReservedBits(0b100)));
    }

    #[test]
    fn test_rejects_unknown_opcode() {
        assert_eq!(decode(&[0x83, 0x00]), Err(FrameError::InvalidOpCode(0x3)));
        assert_eq!(decode(&[0x8B, 0x00]), Err(FrameError::InvalidOpCode(0xB)));
    }

    #[test]
    fn test_rejects_bad_control_frames() {
        assert_eq!(decode(&[0x09, 0x00]), Err(FrameError::FragmentedControl));
        assert_eq!(decode(&[0x89, 0x7E, 0x00, 0x7E]), Err(FrameError::ControlTooLarge(126)));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let encoded = encode(&vec![0u8; 2048], OpCode::Binary, true);
        assert!(matches!(
            decode_with_limit(&encoded, 1024),
            Err(FrameError::PayloadTooLarge { len: 2048, max: 1024 })
        ));
    }

    #[test]
    fn test_rejects_64bit_length_with_top_bit() {
        let mut bytes = vec![0x82, 0x7F];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert_eq!(decode(&bytes), Err(FrameError::InvalidLength));
    }

    #[test]
    fn test_opcode_conversions() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::try_from(u8::from(op)).unwrap(), op);
        }
        assert!(OpCode::Ping.is_control());
        assert!(!OpCode::Continuation.is_data());
    }
}

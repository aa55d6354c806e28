//! Opening handshake: HTTP Upgrade request and response validation

use crate::core::url::ParsedUrl;
use crate::http::response::ResponseHead;
use crate::traits::error::{Result, WirePoolError};
use base64::prelude::*;
use rand::RngCore;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const WEBSOCKET_VERSION: &str = "13";

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, base64
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    BASE64_STANDARD.encode(nonce)
}

/// `Sec-WebSocket-Accept` a server must answer `key` with
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Serialize the Upgrade request
pub fn build_request(
    url: &ParsedUrl,
    key: &str,
    subprotocol: Option<&str>,
    extra_headers: &[(String, String)],
) -> Vec<u8> {
    let mut request = String::with_capacity(256);

    request.push_str("GET ");
    request.push_str(&url.path);
    request.push_str(" HTTP/1.1\r\n");

    request.push_str("Host: ");
    request.push_str(&url.host_header());
    request.push_str("\r\n");
    request.push_str("Upgrade: websocket\r\n");
    request.push_str("Connection: Upgrade\r\n");
    request.push_str("Sec-WebSocket-Key: ");
    request.push_str(key);
    request.push_str("\r\n");
    request.push_str("Sec-WebSocket-Version: ");
    request.push_str(WEBSOCKET_VERSION);
    request.push_str("\r\n");

    if let Some(protocol) = subprotocol {
        request.push_str("Sec-WebSocket-Protocol: ");
        request.push_str(protocol);
        request.push_str("\r\n");
    }

    for (name, value) in extra_headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }

    request.push_str("\r\n");
    request.into_bytes()
}

/// Check the server's answer to the Upgrade request
///
/// Requires status 101, `Upgrade: websocket` and a `Connection` header
/// listing `upgrade`. When the server sends `Sec-WebSocket-Accept` and
/// `verify_accept` is on, it must match `key`. Returns the negotiated
/// subprotocol, if any.
pub fn validate_response(head: &ResponseHead, key: &str, verify_accept: bool) -> Result<Option<String>> {
    if head.status_code != 101 {
        return Err(WirePoolError::Handshake(format!(
            "expected 101 Switching Protocols, got {} {}",
            head.status_code, head.status_message
        )));
    }

    let upgrade_ok = head
        .header("upgrade")
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(WirePoolError::Handshake("missing Upgrade: websocket".into()));
    }

    let connection_ok = head
        .header("connection")
        .map(|v| v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    if !connection_ok {
        return Err(WirePoolError::Handshake("missing Connection: Upgrade".into()));
    }

    if verify_accept {
        if let Some(accept) = head.header("sec-websocket-accept") {
            if accept.trim() != accept_key(key) {
                return Err(WirePoolError::Handshake("Sec-WebSocket-Accept mismatch".into()));
            }
        }
    }

    Ok(head.header("sec-websocket-protocol").map(|p| p.trim().to_string()))
}

//! Hand-rolled HTTP/1.1 upgrade parsing. The server only ever needs to
//! recognize two request shapes (`/status`, `/socket.io`) and a fixed set
//! of upgrade headers, so this reads one byte at a time off the raw socket
//! rather than pulling in a general HTTP parser. A line never grows past
//! its bound, and nothing is ever over-read past the blank line
//! terminating the header block, so the socket handed to
//! `tokio_tungstenite` afterward is pristine.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::RtError;

const MAX_LINE_LEN: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The subprotocol this server always selects.
pub const SUBPROTOCOL: &str = "v8.real-time.overleaf.com";
const BOOTSTRAP_SUFFIX: &str = ".bootstrap.v8.real-time.overleaf.com";

#[derive(Debug)]
pub enum Request {
    Status,
    Upgrade {
        sec_websocket_key: String,
        /// A missing/malformed bootstrap token does not abort the upgrade.
        /// The connection still switches protocols and the first frame
        /// sent is a `connectionRejected` event.
        bootstrap_jwt: Result<String, RtError>,
    },
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum HttpError {
    #[error("400 Bad Request")]
    BadRequest,
    #[error("408 Request Timeout")]
    Timeout,
    #[error("414 URI Too Long")]
    UriTooLong,
    #[error("431 Request Header Fields Too Large")]
    HeadersTooLarge,
}

impl HttpError {
    pub fn status_line(self) -> &'static str {
        match self {
            HttpError::BadRequest => "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n",
            HttpError::Timeout => "HTTP/1.1 408 Request Timeout\r\nContent-Length: 0\r\n\r\n",
            HttpError::UriTooLong => "HTTP/1.1 414 URI Too Long\r\nContent-Length: 0\r\n\r\n",
            HttpError::HeadersTooLarge => "HTTP/1.1 431 Request Header Fields Too Large\r\nContent-Length: 0\r\n\r\n",
        }
    }
}

async fn read_line(stream: &mut TcpStream, max_len: usize, too_long: HttpError) -> Result<String, HttpError> {
    let mut line: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut byte))
            .await
            .map_err(|_| HttpError::Timeout)?
            .map_err(|_| HttpError::BadRequest)?;
        if n == 0 {
            return Err(HttpError::BadRequest);
        }
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return String::from_utf8(line).map_err(|_| HttpError::BadRequest);
        }
        line.push(byte[0]);
        if line.len() > max_len {
            return Err(too_long);
        }
    }
}

/// Read and parse one HTTP/1.1 request line plus headers off `stream`.
pub async fn parse_request(stream: &mut TcpStream) -> Result<Request, HttpError> {
    let request_line = read_line(stream, MAX_LINE_LEN, HttpError::UriTooLong).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HttpError::BadRequest)?;
    let path = parts.next().ok_or(HttpError::BadRequest)?;

    let mut headers: HashMap<String, String> = HashMap::new();
    for _ in 0..MAX_HEADERS {
        let line = read_line(stream, MAX_LINE_LEN, HttpError::HeadersTooLarge).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(HttpError::BadRequest)?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    match (method, path) {
        ("GET", "/status") | ("HEAD", "/status") => Ok(Request::Status),
        ("GET", "/socket.io") => parse_upgrade(&headers).ok_or(HttpError::BadRequest),
        _ => Err(HttpError::BadRequest),
    }
}

fn header_lists_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn parse_upgrade(headers: &HashMap<String, String>) -> Option<Request> {
    let connection = headers.get("connection")?;
    if !header_lists_token(connection, "upgrade") {
        return None;
    }
    if !headers.get("upgrade")?.eq_ignore_ascii_case("websocket") {
        return None;
    }
    if headers.get("sec-websocket-version")?.trim() != "13" {
        return None;
    }

    let key = headers.get("sec-websocket-key")?;
    if key.len() != 24 || base64::engine::general_purpose::STANDARD.decode(key).is_err() {
        return None;
    }

    let protocol_header = headers.get("sec-websocket-protocol")?;
    let tokens: Vec<&str> = protocol_header.split(',').map(str::trim).collect();
    if !tokens.iter().any(|t| *t == SUBPROTOCOL) {
        return None;
    }
    let bootstrap_jwt = tokens
        .iter()
        .find_map(|t| t.strip_suffix(BOOTSTRAP_SUFFIX))
        .map(str::to_string)
        .ok_or_else(|| RtError::Validation("missing bootstrap subprotocol token".into()));

    Some(Request::Upgrade { sec_websocket_key: key.clone(), bootstrap_jwt })
}

/// `Sec-WebSocket-Accept`: `base64(sha1(key || GUID))`.
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn upgrade_response(sec_websocket_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Sec-WebSocket-Protocol: {}\r\n\r\n",
        compute_accept(sec_websocket_key),
        SUBPROTOCOL,
    )
}

/// `/status` response: 200 while the server's `ok` flag is set, 503 while
/// draining.
pub fn status_response(ok: bool) -> &'static str {
    if ok {
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"
    } else {
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matches_rfc6455_worked_example() {
        assert_eq!(compute_accept("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_a_valid_upgrade() {
        let h = headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            (
                "sec-websocket-protocol",
                "v8.real-time.overleaf.com, abc.bootstrap.v8.real-time.overleaf.com",
            ),
        ]);
        match parse_upgrade(&h) {
            Some(Request::Upgrade { sec_websocket_key, bootstrap_jwt }) => {
                assert_eq!(sec_websocket_key, "dGhlIHNhbXBsZSBub25jZQ==");
                assert_eq!(bootstrap_jwt.unwrap(), "abc");
            }
            other => panic!("expected Upgrade, got {other:?}"),
        }
    }

    #[test]
    fn missing_bootstrap_token_defers_to_rejection() {
        let h = headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-protocol", "v8.real-time.overleaf.com"),
        ]);
        match parse_upgrade(&h) {
            Some(Request::Upgrade { bootstrap_jwt, .. }) => assert!(bootstrap_jwt.is_err()),
            other => panic!("expected a deferred Upgrade, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_version() {
        let h = headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-version", "8"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-protocol", "v8.real-time.overleaf.com"),
        ]);
        assert!(parse_upgrade(&h).is_none());
    }

    #[test]
    fn rejects_missing_subprotocol() {
        let h = headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-protocol", "some-other-protocol"),
        ]);
        assert!(parse_upgrade(&h).is_none());
    }
}

//! The HTTP upgrade handshake, server and client side (RFC 6455 §4).

use std::time::Duration;

use base64::Engine;
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use super::WebSocketError;
use super::connection::ClientWebSocket;
use crate::http::{Method, Request, Response, StatusCode, Version};
use crate::stream::{StreamReader, StreamWriter, TransportOptions};

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version accepted.
pub const WS_VERSION: &str = "13";

const MAX_RESPONSE_HEADERS: usize = 32;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Computes `Sec-WebSocket-Accept` for a client key: `base64(sha1(key + GUID))`.
#[inline]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// A random, base64-encoded 16-byte client key.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    fastrand::fill(&mut nonce);
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// Whether `request` is an acceptable WebSocket upgrade request.
///
/// Only headers are inspected: the method must be `GET` over HTTP/1.1, the
/// `Host`, `Upgrade`, `Connection`, `Sec-WebSocket-Version` and
/// `Sec-WebSocket-Key` headers must all be present, `Upgrade` must be
/// `websocket`, the version `13`, and the key must decode to 16 bytes.
pub fn is_upgrade_request(request: &Request) -> bool {
    if request.method() != Method::Get || request.version() != Version::Http11 {
        return false;
    }

    let headers = request.headers();
    let required = [
        "host",
        "upgrade",
        "connection",
        "sec-websocket-version",
        "sec-websocket-key",
    ];
    if !required.iter().all(|name| headers.contains(name)) {
        return false;
    }

    let upgrade_ok = headers
        .get("upgrade")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    let version_ok = headers.get("sec-websocket-version").map(str::trim) == Some(WS_VERSION);

    upgrade_ok && version_ok && headers.get("sec-websocket-key").is_some_and(is_valid_key)
}

fn is_valid_key(key: &str) -> bool {
    base64::engine::general_purpose::STANDARD
        .decode(key.trim())
        .is_ok_and(|raw| raw.len() == 16)
}

/// Picks the first subprotocol from `supported` (in server preference order)
/// that the client offered in `Sec-WebSocket-Protocol`.
pub fn select_subprotocol(request: &Request, supported: &[String]) -> Option<String> {
    let offered: Vec<&str> = request
        .headers()
        .get_all("sec-websocket-protocol")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    supported
        .iter()
        .find(|p| offered.iter().any(|o| o == p))
        .cloned()
}

/// The `101 Switching Protocols` reply for a client `key`.
pub fn switching_protocols(key: &str, protocol: Option<&str>) -> Response {
    let mut response = Response::new(StatusCode::SwitchingProtocols)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", accept_key(key.trim()));
    if let Some(protocol) = protocol {
        response.add_header("Sec-WebSocket-Protocol", protocol);
    }
    response
}

fn build_request(host: &str, path: &str, key: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(b"Host: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Sec-WebSocket-Version: 13\r\n");
    buf.put_slice(b"\r\n");
    buf
}

/// Validates the server's handshake response head against `key`.
fn verify_response(head: &[u8], key: &str) -> Result<(), WebSocketError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(WebSocketError::Handshake("incomplete response".into()));
        }
        Err(err) => return Err(WebSocketError::Handshake(err.to_string())),
    }

    if response.code != Some(101) {
        return Err(WebSocketError::Handshake(format!(
            "expected status 101, got {}",
            response.code.unwrap_or(0)
        )));
    }

    let header = |name: &str| {
        response
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
    };

    if !header("upgrade").is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket")) {
        return Err(WebSocketError::Handshake("missing Upgrade: websocket".into()));
    }
    let connection_ok = header("connection").is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    if !connection_ok {
        return Err(WebSocketError::Handshake("missing Connection: Upgrade".into()));
    }

    let expected = accept_key(key);
    match header("sec-websocket-accept") {
        Some(accept) if accept.trim() == expected => Ok(()),
        Some(_) => Err(WebSocketError::Handshake("Sec-WebSocket-Accept mismatch".into())),
        None => Err(WebSocketError::Handshake("missing Sec-WebSocket-Accept".into())),
    }
}

/// Runs the client handshake over an already opened stream pair.
pub async fn client_handshake(
    reader: StreamReader,
    writer: StreamWriter,
    host: &str,
    path: &str,
) -> Result<ClientWebSocket, WebSocketError> {
    let key = generate_key();
    writer
        .write_and_drain(build_request(host, path, &key).freeze(), None)
        .await?;

    let head = reader
        .read_until(b"\r\n\r\n", true, Some(HANDSHAKE_TIMEOUT))
        .await?;
    verify_response(&head, &key)?;

    tracing::debug!(%host, %path, "websocket client handshake complete");
    Ok(ClientWebSocket::new(reader, writer))
}

/// Opens `io` and performs the client side of the handshake for `path` on `host`.
///
/// ```rust,no_run
/// use switchyard::websocket;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let tcp = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let mut socket = websocket::connect(tcp, "127.0.0.1:8080", "/echo").await?;
/// socket.send_text("hello").await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect<T>(io: T, host: &str, path: &str) -> Result<ClientWebSocket, WebSocketError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = crate::stream::open(io, TransportOptions::default());
    client_handshake(reader, writer, host, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_head(extra: &str) -> Vec<u8> {
        format!(
            "GET /chat HTTP/1.1\r\n\
             Host: example.com\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             {extra}\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(accept_key(KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn generated_keys_are_valid() {
        let key = generate_key();
        assert!(is_valid_key(&key));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn recognizes_upgrade_request() {
        let request = Request::from_head(&upgrade_head("")).unwrap();
        assert!(is_upgrade_request(&request));
    }

    #[test]
    fn upgrade_value_is_case_insensitive() {
        let head = String::from_utf8(upgrade_head(""))
            .unwrap()
            .replace("Upgrade: websocket", "Upgrade: WebSocket");
        let request = Request::from_head(head.as_bytes()).unwrap();
        assert!(is_upgrade_request(&request));
    }

    #[test]
    fn rejects_incomplete_upgrades() {
        let cases = [
            ("Sec-WebSocket-Version: 13", "Sec-WebSocket-Version: 8"),
            ("Upgrade: websocket", "Upgrade: h2c"),
            ("Host: example.com\r\n", ""),
            (KEY, "c2hvcnQ="),
            ("GET /chat HTTP/1.1", "POST /chat HTTP/1.1"),
            ("GET /chat HTTP/1.1", "GET /chat HTTP/1.0"),
        ];
        for (from, to) in cases {
            let head = String::from_utf8(upgrade_head("")).unwrap().replace(from, to);
            let request = Request::from_head(head.as_bytes()).unwrap();
            assert!(!is_upgrade_request(&request), "accepted after replacing {from:?}");
        }
    }

    #[test]
    fn subprotocol_follows_server_preference() {
        let request =
            Request::from_head(&upgrade_head("Sec-WebSocket-Protocol: chat, superchat\r\n")).unwrap();
        let supported = vec!["superchat".to_owned(), "chat".to_owned()];
        assert_eq!(select_subprotocol(&request, &supported).as_deref(), Some("superchat"));
        assert_eq!(select_subprotocol(&request, &["mqtt".to_owned()]), None);
    }

    #[test]
    fn switching_protocols_response() {
        let response = switching_protocols(KEY, Some("chat"));
        assert_eq!(response.status(), StatusCode::SwitchingProtocols);
        let headers = response.headers();
        assert_eq!(headers.get("upgrade"), Some("websocket"));
        assert_eq!(headers.get("connection"), Some("Upgrade"));
        assert_eq!(headers.get("sec-websocket-accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert_eq!(headers.get("sec-websocket-protocol"), Some("chat"));
    }

    #[test]
    fn client_request_is_well_formed() {
        let raw = build_request("example.com", "/chat", KEY);
        let request = Request::from_head(&raw).unwrap();
        assert!(is_upgrade_request(&request));
        assert_eq!(request.path(), "/chat");
    }

    #[test]
    fn verifies_server_response() {
        let ok = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(KEY)
        );
        assert!(verify_response(ok.as_bytes(), KEY).is_ok());

        let wrong = ok.replace(&accept_key(KEY), "bm9wZQ==");
        assert!(matches!(
            verify_response(wrong.as_bytes(), KEY),
            Err(WebSocketError::Handshake(_))
        ));

        let refused = "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            verify_response(refused.as_bytes(), KEY),
            Err(WebSocketError::Handshake(msg)) if msg.contains("400")
        ));
    }
}

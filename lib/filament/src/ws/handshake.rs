use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;

/// Fixed handshake GUID, RFC 6455 §1.3.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    BASE64_STANDARD.encode(nonce)
}

/// The `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Fills the minimum viable upgrade request. Applications add `Origin`,
/// `Sec-WebSocket-Protocol` and friends on top.
pub fn fill_upgrade_request(request: &mut HttpRequest, host: &str, path: &str, key: &str) {
    request.set_begin("GET", path);
    request.set_header("Host", host);
    request.set_header("Upgrade", "websocket");
    request.set_header("Connection", "Upgrade");
    request.set_header("Sec-WebSocket-Key", key);
    request.set_header("Sec-WebSocket-Version", "13");
}

/// Validates a server upgrade request and returns its client key.
pub fn validate_upgrade_request(request: &HttpRequest) -> Result<&str, &'static str> {
    if request.method() != "GET" {
        return Err("Invalid WebSocket method");
    }

    if !header_matches(request.find_header("Upgrade"), "websocket") {
        return Err("Missing WebSocket upgrade header");
    }

    if !header_matches(request.find_header("Sec-WebSocket-Version"), "13") {
        return Err("Unsupported WebSocket version");
    }

    match request.find_header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err("Missing WebSocket key"),
    }
}

/// Builds the 101 upgrade response answering the given client key.
pub fn build_upgrade_response(response: &mut HttpResponse, key: &str) {
    response.set_begin(101);
    response.set_header("Upgrade", "websocket");
    response.set_header("Connection", "Upgrade");
    response.set_header("Sec-WebSocket-Accept", &accept_key(key));
    response.set_body(&[]);
}

/// Validates a client side upgrade response against the key that was sent.
pub fn validate_upgrade_response(response: &HttpResponse, key: &str) -> Result<(), &'static str> {
    if response.status() != 101 {
        return Err("Invalid WebSocket response status");
    }

    if !header_matches(response.find_header("Upgrade"), "websocket") {
        return Err("Missing WebSocket upgrade header");
    }

    if !header_contains(response.find_header("Connection"), "Upgrade") {
        return Err("Missing WebSocket connection header");
    }

    match response.find_header("Sec-WebSocket-Accept") {
        Some(accept) if accept == accept_key(key) => Ok(()),
        _ => Err("Invalid WebSocket accept key"),
    }
}

#[inline]
fn header_matches(value: Option<&str>, expected: &str) -> bool {
    match value {
        Some(value) => value.trim().eq_ignore_ascii_case(expected),
        None => false,
    }
}

/// Token-wise containment check for list-valued headers such as
/// `Connection: keep-alive, Upgrade`.
#[inline]
fn header_contains(value: Option<&str>, expected: &str) -> bool {
    match value {
        Some(value) => value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case(expected)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6455 §1.3 worked example
    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(accept_key(SAMPLE_KEY), SAMPLE_ACCEPT);
    }

    #[test]
    fn test_generate_key_shape() {
        let key = generate_key();

        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_upgrade_request_round_trip() {
        let mut request = HttpRequest::new();
        fill_upgrade_request(&mut request, "localhost", "/chat", SAMPLE_KEY);
        request.set_body(&[]);

        let wire = request.cache().to_vec();

        let mut parsed = HttpRequest::new();
        assert!(parsed.receive_header(&wire));
        assert_eq!(validate_upgrade_request(&parsed), Ok(SAMPLE_KEY));
    }

    #[test]
    fn test_upgrade_request_rejects_post() {
        let mut request = HttpRequest::new();
        fill_upgrade_request(&mut request, "h", "/", SAMPLE_KEY);

        let mut bad = HttpRequest::new();
        bad.set_begin("POST", "/");
        bad.set_header("Upgrade", "websocket");
        bad.set_header("Sec-WebSocket-Version", "13");
        bad.set_header("Sec-WebSocket-Key", SAMPLE_KEY);

        assert!(validate_upgrade_request(&bad).is_err());
    }

    #[test]
    fn test_upgrade_response_round_trip() {
        let mut response = HttpResponse::new();
        build_upgrade_response(&mut response, SAMPLE_KEY);

        assert_eq!(response.find_header("Sec-WebSocket-Accept"), Some(SAMPLE_ACCEPT));
        assert_eq!(validate_upgrade_response(&response, SAMPLE_KEY), Ok(()));
    }

    #[test]
    fn test_upgrade_response_case_insensitive_headers() {
        let mut response = HttpResponse::new();
        response.set_begin(101);
        response.set_header("upgrade", "WebSocket");
        response.set_header("connection", "keep-alive, upgrade");
        response.set_header("sec-websocket-accept", SAMPLE_ACCEPT);

        assert_eq!(validate_upgrade_response(&response, SAMPLE_KEY), Ok(()));
    }

    #[test]
    fn test_upgrade_response_rejects_wrong_accept() {
        let mut response = HttpResponse::new();
        response.set_begin(101);
        response.set_header("Upgrade", "websocket");
        response.set_header("Connection", "Upgrade");
        response.set_header("Sec-WebSocket-Accept", "bogus");

        assert!(validate_upgrade_response(&response, SAMPLE_KEY).is_err());
    }

    #[test]
    fn test_upgrade_response_rejects_non_101() {
        let mut response = HttpResponse::new();
        response.set_begin(200);
        response.set_header("Upgrade", "websocket");
        response.set_header("Connection", "Upgrade");
        response.set_header("Sec-WebSocket-Accept", SAMPLE_ACCEPT);

        assert!(validate_upgrade_response(&response, SAMPLE_KEY).is_err());
    }
}

use crate::http::message::Message;

/// HTTP/1.1 request: one contiguous byte cache holding exactly the wire
/// bytes, with slices pointing at the start line tokens, headers and body.
/// Doubles as builder and incremental parser, the same way on both sides of
/// a connection.
pub struct HttpRequest {
    inner: Message,
    method_index: usize,
    method_size: usize,
    url_index: usize,
    url_size: usize,
    protocol_index: usize,
    protocol_size: usize,
}

impl HttpRequest {
    #[inline]
    pub fn new() -> HttpRequest {
        HttpRequest {
            inner: Message::new(),
            method_index: 0,
            method_size: 0,
            url_index: 0,
            url_size: 0,
            protocol_index: 0,
            protocol_size: 0,
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.method_index = 0;
        self.method_size = 0;
        self.url_index = 0;
        self.url_size = 0;
        self.protocol_index = 0;
        self.protocol_size = 0;
    }

    #[inline]
    pub fn method(&self) -> &str {
        self.inner.slice_str(self.method_index, self.method_size)
    }

    #[inline]
    pub fn url(&self) -> &str {
        self.inner.slice_str(self.url_index, self.url_size)
    }

    /// The url with the query string stripped. No percent-decoding.
    pub fn url_path(&self) -> &str {
        let url = self.url();
        match url.find('?') {
            Some(index) => &url[..index],
            None => url,
        }
    }

    #[inline]
    pub fn protocol(&self) -> &str {
        self.inner.slice_str(self.protocol_index, self.protocol_size)
    }

    #[inline]
    pub fn headers_count(&self) -> usize {
        self.inner.headers.len()
    }

    #[inline]
    pub fn header_at(&self, i: usize) -> (&str, &str) {
        self.inner.header_at(i)
    }

    #[inline]
    pub fn find_header(&self, key: &str) -> Option<&str> {
        self.inner.find_header(key)
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        self.inner.body()
    }

    #[inline]
    pub fn body_length(&self) -> usize {
        self.inner.body_length
    }

    /// The raw wire bytes of the message built or parsed so far.
    #[inline]
    pub fn cache(&self) -> &[u8] {
        &self.inner.cache
    }

    #[inline]
    pub fn error(&self) -> bool {
        self.inner.error
    }

    #[inline]
    pub fn is_pending_header(&self) -> bool {
        self.inner.is_pending_header()
    }

    #[inline]
    pub fn is_pending_body(&self) -> bool {
        self.inner.is_pending_body()
    }

    /// Starts building a request with the given start line.
    pub fn set_begin(&mut self, method: &str, url: &str) {
        self.set_begin_with_protocol(method, url, "HTTP/1.1")
    }

    pub fn set_begin_with_protocol(&mut self, method: &str, url: &str, protocol: &str) {
        self.clear();

        self.method_index = self.inner.cache.len();
        self.method_size = method.len();
        self.inner.cache.extend_from_slice(method.as_bytes());

        self.inner.cache.extend_from_slice(b" ");

        self.url_index = self.inner.cache.len();
        self.url_size = url.len();
        self.inner.cache.extend_from_slice(url.as_bytes());

        self.inner.cache.extend_from_slice(b" ");

        self.protocol_index = self.inner.cache.len();
        self.protocol_size = protocol.len();
        self.inner.cache.extend_from_slice(protocol.as_bytes());

        self.inner.cache.extend_from_slice(b"\r\n");
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.inner.push_header(key, value);
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.inner.push_body(body);
    }

    pub fn set_body_length(&mut self, length: usize) {
        self.inner.push_body_length(length);
    }

    /// Feeds header-phase bytes. Returns true once the full header block
    /// was parsed; check [`error`](HttpRequest::error) on false.
    pub fn receive_header(&mut self, data: &[u8]) -> bool {
        let separator = match self.inner.feed_and_scan(data) {
            Some(separator) => separator,
            None => return false,
        };

        // Pessimistically flag the message until the start line and the
        // headers check out
        self.inner.error = true;

        if !self.parse_start_line(separator) {
            return false;
        }

        let headers_start = self.protocol_index + self.protocol_size + 2;
        if !self.inner.parse_headers(headers_start, separator) {
            return false;
        }

        self.inner.complete_header(separator);
        true
    }

    /// Feeds body-phase bytes. Returns true once the declared body length
    /// is reached; a request without `Content-Length` completes right after
    /// the header phase.
    pub fn receive_body(&mut self, data: &[u8]) -> bool {
        self.inner.receive_body(data)
    }

    /// Method SP url SP protocol CRLF. The method must be non-empty and
    /// alphabetic; the url non-empty.
    fn parse_start_line(&mut self, separator: usize) -> bool {
        let cache = &self.inner.cache;
        let mut index = 0;

        self.method_index = index;
        while cache[index] != b' ' {
            if !cache[index].is_ascii_alphabetic() {
                return false;
            }
            index += 1;
            if index >= separator {
                return false;
            }
        }
        self.method_size = index - self.method_index;
        if self.method_size == 0 {
            return false;
        }
        index += 1;

        self.url_index = index;
        while cache[index] != b' ' {
            index += 1;
            if index >= separator {
                return false;
            }
        }
        self.url_size = index - self.url_index;
        if self.url_size == 0 {
            return false;
        }
        index += 1;

        self.protocol_index = index;
        while cache[index] != b'\r' {
            index += 1;
            if index >= separator {
                break;
            }
        }
        self.protocol_size = index - self.protocol_index;

        if self.protocol_size == 0 || cache[index] != b'\r' || cache[index + 1] != b'\n' {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build() {
        let mut request = HttpRequest::new();
        request.set_begin("GET", "/index.html");
        request.set_header("Host", "example.com");
        request.set_body(b"");

        assert_eq!(
            request.cache(),
            &b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n"[..]
        );
        assert_eq!(request.method(), "GET");
        assert_eq!(request.url(), "/index.html");
        assert_eq!(request.protocol(), "HTTP/1.1");
    }

    #[test]
    fn test_parse_round_trip() {
        let mut request = HttpRequest::new();
        request.set_begin("PUT", "/storage/key");
        request.set_header("Host", "localhost");
        request.set_body(b"123");

        let wire = request.cache().to_vec();

        let mut parsed = HttpRequest::new();
        assert!(parsed.receive_header(&wire));
        assert!(!parsed.error());
        assert!(parsed.receive_body(&[]));

        assert_eq!(parsed.method(), "PUT");
        assert_eq!(parsed.url(), "/storage/key");
        assert_eq!(parsed.find_header("host"), Some("localhost"));
        assert_eq!(parsed.body(), b"123");
    }

    #[test]
    fn test_parse_one_byte_at_a_time_matches_one_shot() {
        let wire = b"GET /x?q=1 HTTP/1.1\r\nHost: h\r\nAccept: */*\r\n\r\n";

        let mut one_shot = HttpRequest::new();
        assert!(one_shot.receive_header(wire));

        let mut dribble = HttpRequest::new();
        let mut complete = false;
        for &byte in wire.iter() {
            complete = dribble.receive_header(&[byte]);
            if complete {
                break;
            }
            assert!(!dribble.error());
        }

        assert!(complete);
        assert_eq!(dribble.method(), one_shot.method());
        assert_eq!(dribble.url(), one_shot.url());
        assert_eq!(dribble.url_path(), "/x");
        assert_eq!(dribble.headers_count(), one_shot.headers_count());
        assert_eq!(dribble.header_at(0), one_shot.header_at(0));
        assert_eq!(dribble.header_at(1), one_shot.header_at(1));
    }

    #[test]
    fn test_parse_rejects_numeric_method() {
        let mut request = HttpRequest::new();

        assert!(!request.receive_header(b"G3T / HTTP/1.1\r\n\r\n"));
        assert!(request.error());
    }

    #[test]
    fn test_parse_rejects_missing_url() {
        let mut request = HttpRequest::new();

        assert!(!request.receive_header(b"GET  HTTP/1.1\r\n\r\n"));
        assert!(request.error());
    }

    #[test]
    fn test_body_arrives_with_header() {
        let mut request = HttpRequest::new();

        assert!(request.receive_header(b"PUT /k HTTP/1.1\r\nContent-Length: 4\r\n\r\nte"));
        assert!(!request.receive_body(&[]));
        assert!(request.receive_body(b"st"));
        assert_eq!(request.body(), b"test");
    }

    #[test]
    fn test_query_string_split() {
        let mut request = HttpRequest::new();
        request.set_begin("GET", "/storage/key?version=2");

        assert_eq!(request.url_path(), "/storage/key");
        assert_eq!(request.url(), "/storage/key?version=2");
    }
}

use crate::http::message::Message;

/// Canonical reason phrase of a status code, `"Unknown"` for anything not
/// in the table.
pub fn status_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",

        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",

        226 => "IM Used",

        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        306 => "Switch Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",

        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",

        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        427 => "Unassigned",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",

        451 => "Unavailable For Legal Reasons",

        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",

        510 => "Not Extended",
        511 => "Network Authentication Required",

        _ => "Unknown",
    }
}

/// HTTP/1.1 response, cache-backed like [`HttpRequest`](crate::http::HttpRequest).
pub struct HttpResponse {
    inner: Message,
    status: u16,
    status_phrase_index: usize,
    status_phrase_size: usize,
    protocol_index: usize,
    protocol_size: usize,
}

impl HttpResponse {
    #[inline]
    pub fn new() -> HttpResponse {
        HttpResponse {
            inner: Message::new(),
            status: 0,
            status_phrase_index: 0,
            status_phrase_size: 0,
            protocol_index: 0,
            protocol_size: 0,
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.status = 0;
        self.status_phrase_index = 0;
        self.status_phrase_size = 0;
        self.protocol_index = 0;
        self.protocol_size = 0;
    }

    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[inline]
    pub fn status_phrase(&self) -> &str {
        self.inner.slice_str(self.status_phrase_index, self.status_phrase_size)
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

    /// Starts building a response; the reason phrase comes from the
    /// canonical table.
    pub fn set_begin(&mut self, status: u16) {
        self.set_begin_with_phrase(status, status_phrase(status), "HTTP/1.1")
    }

    pub fn set_begin_with_phrase(&mut self, status: u16, phrase: &str, protocol: &str) {
        self.clear();

        self.protocol_index = self.inner.cache.len();
        self.protocol_size = protocol.len();
        self.inner.cache.extend_from_slice(protocol.as_bytes());

        self.inner.cache.extend_from_slice(b" ");

        self.status = status;
        self.inner.cache.extend_from_slice(status.to_string().as_bytes());

        self.inner.cache.extend_from_slice(b" ");

        self.status_phrase_index = self.inner.cache.len();
        self.status_phrase_size = phrase.len();
        self.inner.cache.extend_from_slice(phrase.as_bytes());

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
    /// was parsed; check [`error`](HttpResponse::error) on false.
    pub fn receive_header(&mut self, data: &[u8]) -> bool {
        let separator = match self.inner.feed_and_scan(data) {
            Some(separator) => separator,
            None => return false,
        };

        self.inner.error = true;

        if !self.parse_start_line(separator) {
            return false;
        }

        let headers_start = self.status_phrase_index + self.status_phrase_size + 2;
        if !self.inner.parse_headers(headers_start, separator) {
            return false;
        }

        self.inner.complete_header(separator);
        true
    }

    /// Feeds body-phase bytes. Returns true once the declared body length
    /// is reached; a zero declared length completes with the header.
    pub fn receive_body(&mut self, data: &[u8]) -> bool {
        self.inner.receive_body(data)
    }

    /// Protocol SP status SP phrase CRLF. The status must be exactly three
    /// ASCII digits.
    fn parse_start_line(&mut self, separator: usize) -> bool {
        let cache = &self.inner.cache;
        let mut index = 0;

        self.protocol_index = index;
        while cache[index] != b' ' {
            index += 1;
            if index >= separator {
                return false;
            }
        }
        self.protocol_size = index - self.protocol_index;
        if self.protocol_size == 0 {
            return false;
        }
        index += 1;

        let status_index = index;
        while cache[index] != b' ' {
            if !cache[index].is_ascii_digit() || index - status_index >= 3 {
                return false;
            }
            index += 1;
            if index >= separator {
                return false;
            }
        }
        if index - status_index != 3 {
            return false;
        }

        let mut status = 0u16;
        for &digit in &cache[status_index..index] {
            status = status * 10 + (digit - b'0') as u16;
        }
        self.status = status;
        index += 1;

        self.status_phrase_index = index;
        while cache[index] != b'\r' {
            index += 1;
            if index >= separator {
                break;
            }
        }
        self.status_phrase_size = index - self.status_phrase_index;

        if self.status_phrase_size == 0 || cache[index] != b'\r' || cache[index + 1] != b'\n' {
            return false;
        }

        true
    }
}

//! Cache-backed internals shared by the HTTP request and response types.
//! Both the builder and the incremental parser work against one contiguous
//! byte cache plus `(offset, length)` slices into it, so a built message is
//! exactly its wire bytes and a parsed message never re-copies them.

/// Header entry: key offset/length, value offset/length into the cache.
pub(crate) type HeaderSlice = (usize, usize, usize, usize);

pub(crate) struct Message {
    pub cache: Vec<u8>,
    /// Prefix of the cache already scanned for the header separator.
    pub cache_size: usize,
    pub error: bool,
    pub headers: Vec<HeaderSlice>,
    pub body_index: usize,
    pub body_size: usize,
    pub body_length: usize,
}

impl Message {
    #[inline]
    pub fn new() -> Message {
        Message {
            cache: Vec::new(),
            cache_size: 0,
            error: false,
            headers: Vec::new(),
            body_index: 0,
            body_size: 0,
            body_length: 0,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.cache_size = 0;
        self.error = false;
        self.headers.clear();
        self.body_index = 0;
        self.body_size = 0;
        self.body_length = 0;
    }

    #[inline]
    pub fn is_pending_header(&self) -> bool {
        !self.error && self.body_index == 0
    }

    #[inline]
    pub fn is_pending_body(&self) -> bool {
        !self.error && self.body_index > 0 && self.body_size > 0
    }

    #[inline]
    pub fn slice_str(&self, index: usize, size: usize) -> &str {
        std::str::from_utf8(&self.cache[index..index + size]).unwrap_or("")
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.cache[self.body_index..self.body_index + self.body_size]
    }

    /// Key/value text of the i-th header.
    pub fn header_at(&self, i: usize) -> (&str, &str) {
        match self.headers.get(i) {
            Some(&(key_index, key_size, value_index, value_size)) => (
                self.slice_str(key_index, key_size),
                self.slice_str(value_index, value_size),
            ),
            None => ("", ""),
        }
    }

    /// First value of the named header. Names compare case-insensitively.
    pub fn find_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|&&(key_index, key_size, _, _)| {
                self.slice_str(key_index, key_size).eq_ignore_ascii_case(key)
            })
            .map(|&(_, _, value_index, value_size)| self.slice_str(value_index, value_size))
    }

    /// Appends a `key: value` header line to the cache.
    pub fn push_header(&mut self, key: &str, value: &str) {
        let key_index = self.cache.len();
        self.cache.extend_from_slice(key.as_bytes());

        self.cache.extend_from_slice(b": ");

        let value_index = self.cache.len();
        self.cache.extend_from_slice(value.as_bytes());

        self.cache.extend_from_slice(b"\r\n");

        self.headers.push((key_index, key.len(), value_index, value.len()));
    }

    /// Terminates the header block and appends the body, recording its
    /// declared length as a `Content-Length` header.
    pub fn push_body(&mut self, body: &[u8]) {
        self.push_header("Content-Length", &body.len().to_string());

        self.cache.extend_from_slice(b"\r\n");

        self.body_index = self.cache.len();
        self.cache.extend_from_slice(body);
        self.body_size = body.len();
        self.body_length = body.len();
    }

    /// Terminates the header block declaring a body length without any body
    /// bytes.
    pub fn push_body_length(&mut self, length: usize) {
        self.push_header("Content-Length", &length.to_string());

        self.cache.extend_from_slice(b"\r\n");

        self.body_index = self.cache.len();
        self.body_size = 0;
        self.body_length = length;
    }

    /// Appends parser input and scans for the `CRLF CRLF` header separator.
    /// Remembers how far it scanned, so a separator straddling two feeds is
    /// still found.
    pub fn feed_and_scan(&mut self, data: &[u8]) -> Option<usize> {
        self.cache.extend_from_slice(data);

        let mut i = self.cache_size;
        while i + 3 < self.cache.len() {
            if &self.cache[i..i + 4] == b"\r\n\r\n" {
                return Some(i);
            }
            i += 1;
        }

        // Keep the last three bytes unscanned to catch a split separator
        self.cache_size = self.cache.len().saturating_sub(3);

        None
    }

    /// Parses the header lines between `start` and the separator at
    /// `separator`, remembering `Content-Length`. Returns false on any
    /// malformed line.
    pub fn parse_headers(&mut self, start: usize, separator: usize) -> bool {
        let mut index = start;

        while index < separator {
            // Header name up to the colon
            let name_index = index;
            while self.cache[index] != b':' {
                index += 1;
                if index >= separator {
                    return false;
                }
            }
            let name_size = index - name_index;
            index += 1;

            // Skip the whitespace prefix of the value
            while index < separator && (self.cache[index] as char).is_ascii_whitespace() {
                index += 1;
            }
            if index >= separator {
                return false;
            }

            // Header value up to the carriage return
            let value_index = index;
            while self.cache[index] != b'\r' {
                index += 1;
                if index > separator {
                    return false;
                }
            }
            let value_size = index - value_index;

            // Expect the full CRLF line ending; the separator guarantees
            // the lookahead stays in bounds
            if self.cache[index + 1] != b'\n' {
                return false;
            }
            index += 2;

            if name_size == 0 || value_size == 0 {
                return false;
            }

            self.headers.push((name_index, name_size, value_index, value_size));

            if self.slice_str(name_index, name_size).eq_ignore_ascii_case("Content-Length") {
                let mut length = 0usize;
                for &digit in &self.cache[value_index..value_index + value_size] {
                    if !digit.is_ascii_digit() {
                        return false;
                    }
                    length = length * 10 + (digit - b'0') as usize;
                }
                self.body_length = length;
            }
        }

        true
    }

    /// Completes the header phase: the body starts right after the
    /// separator and whatever already arrived past it counts as body bytes.
    pub fn complete_header(&mut self, separator: usize) {
        self.body_index = separator + 4;
        self.body_size = self.cache.len() - self.body_index;
        self.cache_size = self.cache.len();
        self.error = false;
    }

    /// Appends body bytes. Returns true once the declared length is
    /// reached; a zero declared length is complete as soon as the header
    /// phase is.
    pub fn receive_body(&mut self, data: &[u8]) -> bool {
        self.cache.extend_from_slice(data);
        self.cache_size = self.cache.len();
        self.body_size += data.len();

        if self.body_length > 0 && self.body_size >= self.body_length {
            self.body_size = self.body_length;
            return true;
        }

        self.body_index > 0 && self.body_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_straddling_feeds() {
        let mut message = Message::new();

        assert_eq!(message.feed_and_scan(b"GET / HTTP/1.1\r\nHost: h\r\n\r"), None);
        assert_eq!(message.feed_and_scan(b"\n"), Some(23));
    }

    #[test]
    fn test_separator_one_byte_at_a_time() {
        let wire = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";

        let mut message = Message::new();
        let mut found = None;

        for &byte in wire.iter() {
            if let Some(i) = message.feed_and_scan(&[byte]) {
                found = Some(i);
                break;
            }
        }

        assert_eq!(found, Some(23));
    }

    #[test]
    fn test_parse_headers() {
        let mut message = Message::new();
        let separator = message
            .feed_and_scan(b"X HTTP/1.1\r\nHost: h\r\nAccept:  text\r\n\r\n")
            .unwrap();

        assert!(message.parse_headers(12, separator));
        assert_eq!(message.headers.len(), 2);
        assert_eq!(message.header_at(0), ("Host", "h"));
        assert_eq!(message.header_at(1), ("Accept", "text"));
    }

    #[test]
    fn test_parse_headers_content_length() {
        let mut message = Message::new();
        let separator = message
            .feed_and_scan(b"X\r\ncontent-length: 42\r\n\r\n")
            .unwrap();

        assert!(message.parse_headers(3, separator));
        assert_eq!(message.body_length, 42);
    }

    #[test]
    fn test_parse_headers_rejects_empty_name_or_value() {
        let mut message = Message::new();
        let separator = message.feed_and_scan(b"X\r\n: v\r\n\r\n").unwrap();
        assert!(!message.parse_headers(3, separator));

        let mut message = Message::new();
        let separator = message.feed_and_scan(b"X\r\nHost: \r\n\r\n").unwrap();
        assert!(!message.parse_headers(3, separator));
    }

    #[test]
    fn test_parse_headers_rejects_malformed_content_length() {
        let mut message = Message::new();
        let separator = message.feed_and_scan(b"X\r\nContent-Length: 4x\r\n\r\n").unwrap();
        assert!(!message.parse_headers(3, separator));
    }

    #[test]
    fn test_receive_body_truncates_to_declared_length() {
        let mut message = Message::new();
        message.body_index = 1;
        message.body_length = 4;

        assert!(!message.receive_body(b"te"));
        assert!(message.receive_body(b"st-extra"));
        assert_eq!(message.body_size, 4);
    }

    #[test]
    fn test_receive_body_zero_declared_length() {
        let mut message = Message::new();
        message.body_index = 1;

        assert!(message.receive_body(&[]));
    }

    #[test]
    fn test_receive_body_incomplete_header_never_completes() {
        let mut message = Message::new();

        assert!(!message.receive_body(&[]));
    }

    #[test]
    fn test_find_header_case_insensitive() {
        let mut message = Message::new();
        message.push_header("Upgrade", "websocket");

        assert_eq!(message.find_header("upgrade"), Some("websocket"));
        assert_eq!(message.find_header("UPGRADE"), Some("websocket"));
        assert_eq!(message.find_header("missing"), None);
    }
}

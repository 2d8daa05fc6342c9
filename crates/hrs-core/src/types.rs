use std::time::Duration;

/// A single header as raw bytes. Names and values may violate RFC
/// token/vchar rules on purpose — nothing in this crate normalizes,
/// folds, reorders, or deduplicates them.
///
/// `sep` is the bytes emitted between the name and the colon-delimited
/// value (normally `": "`); catalogs that need an unusual colon
/// spacing (bare colon, tab, doubled space) put it here instead of the
/// serializer inventing a canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub sep: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sep: b": ".to_vec(),
        }
    }

    pub fn with_sep(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, sep: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sep: sep.into(),
        }
    }

    pub fn name_eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other.as_bytes())
    }

    pub fn value_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    /// Serialize as `NAME<sep>VALUE\r\n`.
    pub fn write_line(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.sep);
        out.extend_from_slice(&self.value);
        out.extend_from_slice(b"\r\n");
    }
}

/// A byte-exact HTTP/1.1 request. The serializer (`hrs_transport::http1`)
/// emits exactly what is described here: no automatic `Host`,
/// `Content-Length`, or `Transfer-Encoding` insertion.
#[derive(Debug, Clone)]
pub struct Request1 {
    pub method: Vec<u8>,
    pub path: Vec<u8>,
    pub version: Vec<u8>,
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
}

impl Request1 {
    pub fn new(method: impl Into<Vec<u8>>, path: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            version: b"HTTP/1.1".to_vec(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn push_header(mut self, field: HeaderField) -> Self {
        self.headers.push(field);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// An anomaly observed while parsing an HTTP/1.1 response — recorded,
/// never rejected on — a detector needs to observe the behavior,
/// not have the transport paper over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAnomaly {
    DuplicateContentLength,
    ConflictingContentLengthAndChunked,
}

/// An HTTP/1.1 response as actually observed on the wire.
#[derive(Debug, Clone)]
pub struct Response1 {
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub raw_bytes: Vec<u8>,
    pub anomalies: Vec<ResponseAnomaly>,
    /// Set when the read timed out before the response was fully
    /// received — the partial response is still returned.
    pub timed_out: bool,
}

impl Response1 {
    pub fn header(&self, name: &str) -> Option<&HeaderField> {
        self.headers.iter().find(|h| h.name_eq_ignore_ascii_case(name))
    }
}

/// An HTTP/2 request. HPACK encoding is permitted to duplicate
/// pseudo-headers and carry forbidden connection-specific headers —
/// nothing here enforces H2 header hygiene.
#[derive(Debug, Clone)]
pub struct Request2 {
    pub pseudo_headers: Vec<HeaderField>,
    pub headers: Vec<HeaderField>,
    pub data: Vec<u8>,
    pub end_stream: bool,
}

impl Request2 {
    pub fn new() -> Self {
        Self {
            pseudo_headers: Vec::new(),
            headers: Vec::new(),
            data: Vec::new(),
            end_stream: true,
        }
    }

    pub fn pseudo(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.pseudo_headers.push(HeaderField::new(name.as_bytes(), value));
        self
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn push_header(mut self, field: HeaderField) -> Self {
        self.headers.push(field);
        self
    }

    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn end_stream(mut self, end_stream: bool) -> Self {
        self.end_stream = end_stream;
        self
    }
}

impl Default for Request2 {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP/2 response, assembled from whatever HEADERS/CONTINUATION/DATA
/// frames arrived before `END_STREAM` or a timeout.
#[derive(Debug, Clone)]
pub struct Response2 {
    pub status_code: Option<u16>,
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Set when a GOAWAY or RST_STREAM carried an error code.
    pub error_code: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_line_preserves_case_and_sep() {
        let h = HeaderField::with_sep(*b"Transfer-Encoding", *b"chunked", *b" : ");
        let mut out = Vec::new();
        h.write_line(&mut out);
        assert_eq!(out, b"Transfer-Encoding : chunked\r\n");
    }

    #[test]
    fn name_eq_ignore_ascii_case_matches_cased_spellings() {
        let h = HeaderField::new(*b"Transfer-encoding", *b"chunked");
        assert!(h.name_eq_ignore_ascii_case("transfer-encoding"));
        assert!(h.name_eq_ignore_ascii_case("TRANSFER-ENCODING"));
    }
}

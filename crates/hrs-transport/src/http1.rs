//! Byte-level HTTP/1.1 client.

use std::time::{Duration, Instant};

use hrs_core::{DetectError, HeaderField, Request1, Response1, ResponseAnomaly, Target};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::connect;
use crate::stream::BoxedStream;

/// Hard cap on the status-line + header block, guarding against a
/// pathological server that never terminates with CRLFCRLF.
const MAX_HEAD_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 8192;

pub struct Http1Client {
    stream: Option<BoxedStream>,
}

impl Default for Http1Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Http1Client {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub async fn connect(
        &mut self,
        target: &Target,
        connect_timeout: Duration,
        verify: bool,
    ) -> Result<(), DetectError> {
        let (stream, _alpn) =
            connect::dial(target, connect_timeout, &["http/1.1"], verify).await?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    fn stream_mut(&mut self) -> Result<&mut BoxedStream, DetectError> {
        self.stream
            .as_mut()
            .ok_or_else(|| DetectError::Protocol("http/1 client is not connected".to_string()))
    }

    /// Write bytes verbatim — no framing is added.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), DetectError> {
        let stream = self.stream_mut()?;
        stream
            .write_all(bytes)
            .await
            .map_err(|e| DetectError::Connect(format!("write failed: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| DetectError::Connect(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Read up to `max` bytes, bounded by `timeout`.
    pub async fn receive_raw(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, DetectError> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; max];
        match tokio_timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(DetectError::Connect(format!("read failed: {e}"))),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn send_request(&mut self, req: &Request1, read_timeout: Duration) -> Result<Response1, DetectError> {
        let start = Instant::now();
        let bytes = serialize_request(req);
        self.send_raw(&bytes).await?;
        let is_head = req.method.eq_ignore_ascii_case(b"HEAD");
        self.read_response(start, read_timeout, is_head).await
    }

    /// Write every request back-to-back, then read `reqs.len()` responses
    /// in order — pipelined responses are returned in request order.
    pub async fn pipeline_requests(
        &mut self,
        reqs: &[Request1],
        read_timeout: Duration,
    ) -> Result<Vec<Response1>, DetectError> {
        let start = Instant::now();
        let mut out_bytes = Vec::new();
        let mut heads = Vec::with_capacity(reqs.len());
        for req in reqs {
            out_bytes.extend_from_slice(&serialize_request(req));
            heads.push(req.method.eq_ignore_ascii_case(b"HEAD"));
        }
        self.send_raw(&out_bytes).await?;

        let mut responses = Vec::with_capacity(reqs.len());
        for is_head in heads {
            responses.push(self.read_response(start, read_timeout, is_head).await?);
        }
        Ok(responses)
    }

    async fn read_response(
        &mut self,
        start: Instant,
        timeout: Duration,
        is_head: bool,
    ) -> Result<Response1, DetectError> {
        let stream = self.stream_mut()?;
        let mut buf: Vec<u8> = Vec::new();
        let mut read_buf = [0u8; READ_CHUNK];

        let headers_end = loop {
            if let Some(pos) = find_double_crlf(&buf) {
                break pos;
            }
            if buf.len() > MAX_HEAD_BYTES {
                return Err(DetectError::Protocol(
                    "response headers exceeded 64 KiB cap".to_string(),
                ));
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(partial_response(buf, start.elapsed()));
            }
            match tokio_timeout(remaining, stream.read(&mut read_buf)).await {
                Err(_) => return Ok(partial_response(buf, start.elapsed())),
                Ok(Ok(0)) => {
                    if buf.is_empty() {
                        return Err(DetectError::Protocol(
                            "connection closed before any response bytes arrived".to_string(),
                        ));
                    }
                    return Ok(partial_response(buf, start.elapsed()));
                }
                Ok(Ok(n)) => buf.extend_from_slice(&read_buf[..n]),
                Ok(Err(e)) => return Err(DetectError::Connect(format!("read failed: {e}"))),
            }
        };

        let parsed = parse_head(&buf[..headers_end])?;
        let body_start = headers_end;

        let mode = body_mode(&parsed.headers, parsed.status_code, is_head);
        debug!(status = parsed.status_code, ?mode, "resolved body length mode");

        let (body, timed_out) = match mode {
            BodyMode::Empty => (Vec::new(), false),
            BodyMode::ContentLength(n) => {
                read_exact_bounded(stream, &mut buf, body_start, n, start, timeout).await?
            }
            BodyMode::Chunked => read_chunked_bounded(stream, &mut buf, body_start, start, timeout).await?,
            BodyMode::UntilClose => read_until_close(stream, &mut buf, body_start, start, timeout).await?,
        };

        Ok(Response1 {
            status_code: parsed.status_code,
            reason: parsed.reason,
            headers: parsed.headers,
            body,
            elapsed: start.elapsed(),
            raw_bytes: buf,
            anomalies: parsed.anomalies,
            timed_out,
        })
    }
}

fn partial_response(raw_bytes: Vec<u8>, elapsed: Duration) -> Response1 {
    Response1 {
        status_code: 0,
        reason: String::new(),
        headers: Vec::new(),
        body: Vec::new(),
        elapsed,
        raw_bytes,
        anomalies: Vec::new(),
        timed_out: true,
    }
}

/// Serialize a [`Request1`] exactly: start line, headers in order with
/// their declared separator, blank line, body. Nothing is added,
/// removed, or reordered.
pub fn serialize_request(req: &Request1) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + req.body.len());
    out.extend_from_slice(&req.method);
    out.push(b' ');
    out.extend_from_slice(&req.path);
    out.push(b' ');
    out.extend_from_slice(&req.version);
    out.extend_from_slice(b"\r\n");
    for header in &req.headers {
        header.write_line(&mut out);
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

struct ParsedHead {
    status_code: u16,
    reason: String,
    headers: Vec<HeaderField>,
    anomalies: Vec<ResponseAnomaly>,
}

fn parse_head(head: &[u8]) -> Result<ParsedHead, DetectError> {
    let mut storage = [httparse::EMPTY_HEADER; 128];
    let mut resp = httparse::Response::new(&mut storage);
    match resp.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(DetectError::Protocol(
                "response head was not complete after CRLFCRLF".to_string(),
            ));
        }
        Err(e) => return Err(DetectError::Protocol(format!("unparseable response head: {e}"))),
    }

    let status_code = resp
        .code
        .ok_or_else(|| DetectError::Protocol("response had no status code".to_string()))?;
    let reason = resp.reason.unwrap_or("").to_string();

    let mut headers = Vec::with_capacity(resp.headers.len());
    let mut anomalies = Vec::new();
    let mut seen_cl: Vec<String> = Vec::new();

    for h in resp.headers.iter() {
        let field = HeaderField::new(h.name.as_bytes().to_vec(), h.value.to_vec());
        if field.name_eq_ignore_ascii_case("content-length") {
            seen_cl.push(field.value_str_lossy().trim().to_string());
        }
        headers.push(field);
    }

    if seen_cl.len() > 1 && seen_cl.iter().any(|v| v != &seen_cl[0]) {
        anomalies.push(ResponseAnomaly::DuplicateContentLength);
    }

    Ok(ParsedHead {
        status_code,
        reason,
        headers,
        anomalies,
    })
}

#[derive(Debug)]
enum BodyMode {
    Empty,
    ContentLength(usize),
    Chunked,
    UntilClose,
}

/// Resolve body length: chunked transfer-encoding wins over
/// Content-Length, which wins over the empty-body status codes,
/// which fall back to reading until the connection closes.
fn body_mode(headers: &[HeaderField], status_code: u16, is_head: bool) -> BodyMode {
    let te_values: Vec<String> = headers
        .iter()
        .filter(|h| h.name_eq_ignore_ascii_case("transfer-encoding"))
        .map(|h| h.value_str_lossy().into_owned())
        .collect();

    if !te_values.is_empty() {
        let joined = te_values.join(",");
        let last = joined.split(',').next_back().map(|s| s.trim().to_ascii_lowercase());
        if last.as_deref() == Some("chunked") {
            return BodyMode::Chunked;
        }
    }

    if let Some(cl_header) = headers
        .iter()
        .find(|h| h.name_eq_ignore_ascii_case("content-length"))
    {
        if let Ok(n) = cl_header.value_str_lossy().trim().parse::<usize>() {
            return BodyMode::ContentLength(n);
        }
    }

    if is_head || matches!(status_code, 100..=199 | 204 | 304) {
        return BodyMode::Empty;
    }

    BodyMode::UntilClose
}

/// Read exactly `want` body bytes, starting from whatever is already in
/// `buf[body_start..]`. Returns `(body, timed_out)`.
async fn read_exact_bounded(
    stream: &mut BoxedStream,
    buf: &mut Vec<u8>,
    body_start: usize,
    want: usize,
    start: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, bool), DetectError> {
    let mut read_buf = [0u8; READ_CHUNK];
    loop {
        if buf.len() >= body_start + want {
            return Ok((buf[body_start..body_start + want].to_vec(), false));
        }
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Ok((buf[body_start..].to_vec(), true));
        }
        match tokio_timeout(remaining, stream.read(&mut read_buf)).await {
            Err(_) => return Ok((buf[body_start..].to_vec(), true)),
            Ok(Ok(0)) => return Ok((buf[body_start..].to_vec(), false)),
            Ok(Ok(n)) => buf.extend_from_slice(&read_buf[..n]),
            Ok(Err(e)) => return Err(DetectError::Connect(format!("read failed: {e}"))),
        }
    }
}

/// Read until the peer closes the connection.
async fn read_until_close(
    stream: &mut BoxedStream,
    buf: &mut Vec<u8>,
    body_start: usize,
    start: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, bool), DetectError> {
    let mut read_buf = [0u8; READ_CHUNK];
    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Ok((buf[body_start..].to_vec(), true));
        }
        match tokio_timeout(remaining, stream.read(&mut read_buf)).await {
            Err(_) => return Ok((buf[body_start..].to_vec(), true)),
            Ok(Ok(0)) => return Ok((buf[body_start..].to_vec(), false)),
            Ok(Ok(n)) => buf.extend_from_slice(&read_buf[..n]),
            Ok(Err(e)) => return Err(DetectError::Connect(format!("read failed: {e}"))),
        }
    }
}

/// Decode a chunked body, ignoring chunk extensions, stopping at the
/// zero-size chunk and any trailers.
async fn read_chunked_bounded(
    stream: &mut BoxedStream,
    buf: &mut Vec<u8>,
    body_start: usize,
    start: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, bool), DetectError> {
    let mut read_buf = [0u8; READ_CHUNK];
    let mut out = Vec::new();
    let mut cursor = body_start;

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Ok((out, true));
        }

        match find_crlf(&buf[cursor..]) {
            Some(rel) => {
                let size_line_end = cursor + rel;
                let size_line = &buf[cursor..size_line_end];
                let size_str = std::str::from_utf8(size_line)
                    .map_err(|_| DetectError::Protocol("chunk size line was not utf-8".to_string()))?;
                let size_hex = size_str.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size_hex, 16)
                    .map_err(|_| DetectError::Protocol(format!("invalid chunk size: {size_hex:?}")))?;

                let chunk_data_start = size_line_end + 2;
                if size == 0 {
                    // Trailers (possibly empty) end with CRLFCRLF.
                    match find_double_crlf(&buf[size_line_end..]) {
                        Some(_) => return Ok((out, false)),
                        None => {
                            if read_more(stream, buf, start, remaining).await? {
                                continue;
                            }
                            return Ok((out, false));
                        }
                    }
                }

                let chunk_data_end = chunk_data_start + size;
                if buf.len() >= chunk_data_end + 2 {
                    out.extend_from_slice(&buf[chunk_data_start..chunk_data_end]);
                    cursor = chunk_data_end + 2;
                    continue;
                }
            }
            None => {}
        }

        if !read_more(stream, buf, start, remaining).await? {
            return Ok((out, false));
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Read one more chunk of bytes into `buf`; returns `Ok(false)` on EOF.
async fn read_more(
    stream: &mut BoxedStream,
    buf: &mut Vec<u8>,
    start: Instant,
    remaining: Duration,
) -> Result<bool, DetectError> {
    let mut read_buf = [0u8; READ_CHUNK];
    match tokio_timeout(remaining.min(Duration::from_secs(3600)), stream.read(&mut read_buf)).await {
        Err(_) => {
            warn!(elapsed = ?start.elapsed(), "chunked read timed out");
            Ok(false)
        }
        Ok(Ok(0)) => Ok(false),
        Ok(Ok(n)) => {
            buf.extend_from_slice(&read_buf[..n]);
            Ok(true)
        }
        Ok(Err(e)) => Err(DetectError::Connect(format!("read failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_preserves_order_case_and_duplicates() {
        let req = Request1::new(*b"POST", *b"/x")
            .header(*b"Content-Length", *b"6")
            .header(*b"Transfer-Encoding", *b"chunked")
            .push_header(HeaderField::with_sep(*b"X-Weird", *b"v", *b" :  "))
            .body(*b"0\r\n\r\nX");
        let bytes = serialize_request(&req);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("POST /x HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 6\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.contains("X-Weird :  v\r\n"));
        assert!(text.ends_with("0\r\n\r\nX"));
    }

    #[test]
    fn serializer_does_not_inject_host() {
        let req = Request1::new(*b"GET", *b"/");
        let bytes = serialize_request(&req);
        assert!(!String::from_utf8_lossy(&bytes).to_lowercase().contains("host:"));
    }

    #[test]
    fn parse_head_flags_differing_duplicate_content_length() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 10\r\n\r\n";
        let parsed = parse_head(&head[..head.len()]).unwrap();
        assert_eq!(parsed.status_code, 200);
        assert!(parsed.anomalies.contains(&ResponseAnomaly::DuplicateContentLength));
    }

    #[test]
    fn parse_head_does_not_flag_identical_duplicate_content_length() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n";
        let parsed = parse_head(&head[..head.len()]).unwrap();
        assert!(parsed.anomalies.is_empty());
    }

    #[test]
    fn body_mode_prefers_chunked_over_content_length() {
        let headers = vec![
            HeaderField::new(*b"Content-Length", *b"6"),
            HeaderField::new(*b"Transfer-Encoding", *b"chunked"),
        ];
        assert!(matches!(body_mode(&headers, 200, false), BodyMode::Chunked));
    }

    #[test]
    fn body_mode_empty_for_204_and_head() {
        assert!(matches!(body_mode(&[], 204, false), BodyMode::Empty));
        assert!(matches!(body_mode(&[], 200, true), BodyMode::Empty));
    }

    #[test]
    fn body_mode_falls_back_to_until_close() {
        assert!(matches!(body_mode(&[], 200, false), BodyMode::UntilClose));
    }

    #[tokio::test]
    async fn read_chunked_bounded_decodes_varying_chunk_sizes_extensions_and_trailers() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Two differently sized chunks, one with an ignored extension,
            // written in separate writes to exercise partial reads, then a
            // zero-size chunk followed by a trailer header.
            sock.write_all(b"3\r\nfoo\r\n").await.unwrap();
            tokio::task::yield_now().await;
            sock.write_all(b"5;ext=ignored\r\nhello\r\n").await.unwrap();
            tokio::task::yield_now().await;
            sock.write_all(b"0\r\nX-Trailer: done\r\n\r\n").await.unwrap();
        });

        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut stream: BoxedStream = Box::new(client);
        let mut buf: Vec<u8> = Vec::new();
        let start = Instant::now();
        let (body, timed_out) =
            read_chunked_bounded(&mut stream, &mut buf, 0, start, Duration::from_secs(2))
                .await
                .unwrap();
        assert_eq!(body, b"foohello");
        assert!(!timed_out);
    }

    #[tokio::test]
    async fn pipeline_requests_returns_responses_in_request_order() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = sock.read(&mut buf).await;
            // Two full responses written back-to-back, out of alphabetical
            // or status-code order, so a positional bug would be caught.
            sock.write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nBB")
                .await
                .unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nAA")
                .await
                .unwrap();
        });

        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut http1 = Http1Client {
            stream: Some(Box::new(client)),
        };
        let reqs = vec![
            Request1::new(*b"GET", *b"/first"),
            Request1::new(*b"GET", *b"/second"),
        ];
        let responses = http1.pipeline_requests(&reqs, Duration::from_secs(2)).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status_code, 201);
        assert_eq!(responses[0].body, b"BB");
        assert_eq!(responses[1].status_code, 200);
        assert_eq!(responses[1].body, b"AA");
    }
}

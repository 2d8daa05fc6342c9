//! Raw HTTP/2 client with manual frame encoding and HPACK.
//!
//! Frames are built and parsed by hand rather than through a conformant
//! H2 library, because the probes need to emit exactly what such a
//! library would refuse to: duplicate pseudo-headers, `transfer-encoding`
//! / `content-length` on a request, and header names a validator would
//! reject. `hpack` only encodes octets; it does not enforce any of that.

use std::time::{Duration, Instant};

use hrs_core::{DetectError, HeaderField, Request2, Response2, Target};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::connect;
use crate::stream::BoxedStream;

const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
const H2_FRAME_HDR_LEN: usize = 9;

const H2_TYPE_DATA: u8 = 0x0;
const H2_TYPE_HEADERS: u8 = 0x1;
const H2_TYPE_RST_STREAM: u8 = 0x3;
const H2_TYPE_SETTINGS: u8 = 0x4;
const H2_TYPE_PING: u8 = 0x6;
const H2_TYPE_GOAWAY: u8 = 0x7;
const H2_TYPE_WINDOW_UPDATE: u8 = 0x8;
const H2_TYPE_CONTINUATION: u8 = 0x9;

const H2_FLAG_END_STREAM: u8 = 0x1;
const H2_FLAG_ACK: u8 = 0x1;
const H2_FLAG_END_HEADERS: u8 = 0x4;
const H2_FLAG_PADDED: u8 = 0x8;
const H2_FLAG_PRIORITY: u8 = 0x20;

/// Matches the SETTINGS_INITIAL_WINDOW_SIZE default (RFC 9113 §6.5.2).
const DEFAULT_WINDOW: i64 = 65_535;
const WINDOW_UPDATE_THRESHOLD: i64 = 32_768;

pub struct Http2Client {
    stream: Option<BoxedStream>,
    recv_buf: Vec<u8>,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    next_stream_id: u32,
    negotiated_alpn: Option<String>,
}

impl Default for Http2Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Http2Client {
    pub fn new() -> Self {
        Self {
            stream: None,
            recv_buf: Vec::new(),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            next_stream_id: 1,
            negotiated_alpn: None,
        }
    }

    /// The protocol the peer actually selected over ALPN. Callers use
    /// this to confirm a handshake genuinely negotiated `h2` before
    /// trusting an H2.CL/H2.TE result.
    pub fn negotiated_alpn(&self) -> Option<&str> {
        self.negotiated_alpn.as_deref()
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.recv_buf.clear();
    }

    fn alloc_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        id
    }

    pub async fn connect(
        &mut self,
        target: &Target,
        connect_timeout: Duration,
        verify: bool,
    ) -> Result<(), DetectError> {
        let (stream, alpn) = connect::dial(target, connect_timeout, &["h2"], verify).await?;
        self.stream = Some(stream);
        self.negotiated_alpn = alpn;

        self.send_raw(H2_PREFACE).await?;
        self.send_raw(&frame_bytes(H2_TYPE_SETTINGS, 0, 0, &[])).await?;

        let start = Instant::now();
        loop {
            let (frame_type, flags, _sid, _payload) = self.read_frame(start, connect_timeout).await?;
            match frame_type {
                H2_TYPE_SETTINGS if flags & H2_FLAG_ACK == 0 => {
                    self.send_raw(&frame_bytes(H2_TYPE_SETTINGS, H2_FLAG_ACK, 0, &[])).await?;
                    debug!("h2 settings exchange complete");
                    return Ok(());
                }
                H2_TYPE_GOAWAY => {
                    return Err(DetectError::Protocol(
                        "server sent GOAWAY during h2 handshake".to_string(),
                    ));
                }
                _ => continue,
            }
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), DetectError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DetectError::Protocol("http/2 client is not connected".to_string()))?;
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

    /// Read one frame, buffering any extra bytes a single socket read
    /// picked up past the frame boundary. `overall_start`/`overall_timeout`
    /// bound the whole wait, not just this call, so a chain of small
    /// reads can't extend a probe's measured elapsed time.
    async fn read_frame(
        &mut self,
        overall_start: Instant,
        overall_timeout: Duration,
    ) -> Result<(u8, u8, u32, Vec<u8>), DetectError> {
        loop {
            if let Some(frame) = try_take_frame(&mut self.recv_buf) {
                return Ok(frame);
            }
            let remaining = overall_timeout.saturating_sub(overall_start.elapsed());
            if remaining.is_zero() {
                return Err(DetectError::Timeout("timed out reading h2 frame".to_string()));
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| DetectError::Protocol("http/2 client is not connected".to_string()))?;
            let mut buf = [0u8; 8192];
            match tokio_timeout(remaining, stream.read(&mut buf)).await {
                Err(_) => return Err(DetectError::Timeout("timed out reading h2 frame".to_string())),
                Ok(Ok(0)) => {
                    return Err(DetectError::Protocol(
                        "connection closed while reading h2 frame".to_string(),
                    ));
                }
                Ok(Ok(n)) => self.recv_buf.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(DetectError::Connect(format!("read failed: {e}"))),
            }
        }
    }

    /// HEADERS (+ optional DATA) for a well-formed or deliberately
    /// malformed request, by spelling out its pseudo-headers, regular
    /// headers, body, and `end_stream` directly.
    pub async fn send_malformed_headers(
        &mut self,
        pseudo: Vec<HeaderField>,
        headers: Vec<HeaderField>,
        data: Vec<u8>,
        end_stream: bool,
        timeout: Duration,
    ) -> Result<Response2, DetectError> {
        let req = Request2 {
            pseudo_headers: pseudo,
            headers,
            data,
            end_stream,
        };
        self.send_request(&req, timeout).await
    }

    pub async fn send_request(&mut self, req: &Request2, timeout: Duration) -> Result<Response2, DetectError> {
        let start = Instant::now();
        let stream_id = self.alloc_stream_id();

        // Pseudo-headers first, caller order preserved, duplicates kept —
        // HPACK has no concept of "already saw :path" to reject.
        let mut header_list: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(req.pseudo_headers.len() + req.headers.len());
        for h in &req.pseudo_headers {
            header_list.push((h.name.clone(), h.value.clone()));
        }
        for h in &req.headers {
            header_list.push((h.name.clone(), h.value.clone()));
        }
        let block = {
            let refs: Vec<(&[u8], &[u8])> = header_list.iter().map(|(n, v)| (n.as_slice(), v.as_slice())).collect();
            self.encoder.encode(refs)
        };

        let headers_end_stream = req.end_stream && req.data.is_empty();
        let mut flags = H2_FLAG_END_HEADERS;
        if headers_end_stream {
            flags |= H2_FLAG_END_STREAM;
        }
        self.send_raw(&frame_bytes(H2_TYPE_HEADERS, flags, stream_id, &block)).await?;

        if !req.data.is_empty() {
            let mut data_flags = 0u8;
            if req.end_stream {
                data_flags |= H2_FLAG_END_STREAM;
            }
            self.send_raw(&frame_bytes(H2_TYPE_DATA, data_flags, stream_id, &req.data))
                .await?;
        }

        debug!(stream_id, end_stream = req.end_stream, "h2 request sent");
        self.read_response(stream_id, start, timeout).await
    }

    async fn read_response(
        &mut self,
        stream_id: u32,
        start: Instant,
        timeout: Duration,
    ) -> Result<Response2, DetectError> {
        let mut status_code = None;
        let mut headers_out = Vec::new();
        let mut body = Vec::new();
        let mut error_code = None;

        let mut cont_active = false;
        let mut cont_buf: Vec<u8> = Vec::new();
        let mut cont_end_stream = false;

        let mut stream_recv_window: i64 = DEFAULT_WINDOW;

        loop {
            let frame = match self.read_frame(start, timeout).await {
                Ok(f) => f,
                Err(DetectError::Timeout(_)) => {
                    warn!(stream_id, elapsed = ?start.elapsed(), "h2 probe read timed out");
                    return Ok(Response2 {
                        status_code,
                        headers: headers_out,
                        body,
                        elapsed: start.elapsed(),
                        timed_out: true,
                        error_code,
                    });
                }
                Err(e) => return Err(e),
            };
            let (frame_type, flags, sid, payload) = frame;

            match frame_type {
                H2_TYPE_HEADERS if sid == stream_id => {
                    let end_stream = flags & H2_FLAG_END_STREAM != 0;
                    let end_headers = flags & H2_FLAG_END_HEADERS != 0;
                    let (s, e) = header_block_range(&payload, flags);
                    if end_headers {
                        apply_decoded_headers(&mut self.decoder, &payload[s..e], &mut status_code, &mut headers_out)?;
                        if end_stream {
                            break;
                        }
                    } else {
                        cont_active = true;
                        cont_buf = payload[s..e].to_vec();
                        cont_end_stream = end_stream;
                    }
                }
                H2_TYPE_CONTINUATION if sid == stream_id && cont_active => {
                    cont_buf.extend_from_slice(&payload);
                    if flags & H2_FLAG_END_HEADERS != 0 {
                        let block = std::mem::take(&mut cont_buf);
                        apply_decoded_headers(&mut self.decoder, &block, &mut status_code, &mut headers_out)?;
                        cont_active = false;
                        if cont_end_stream {
                            break;
                        }
                    }
                }
                H2_TYPE_DATA if sid == stream_id => {
                    let end_stream = flags & H2_FLAG_END_STREAM != 0;
                    let (s, e) = data_range(&payload, flags);
                    body.extend_from_slice(&payload[s..e]);

                    stream_recv_window -= payload.len() as i64;
                    if stream_recv_window <= WINDOW_UPDATE_THRESHOLD {
                        let increment = (DEFAULT_WINDOW - stream_recv_window).max(0) as u32;
                        self.send_raw(&frame_bytes(H2_TYPE_WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes()))
                            .await?;
                        self.send_raw(&frame_bytes(H2_TYPE_WINDOW_UPDATE, 0, 0, &increment.to_be_bytes()))
                            .await?;
                        stream_recv_window = DEFAULT_WINDOW;
                    }
                    if end_stream {
                        break;
                    }
                }
                H2_TYPE_RST_STREAM if sid == stream_id => {
                    if payload.len() >= 4 {
                        error_code = Some(u32::from_be_bytes(payload[..4].try_into().unwrap()));
                    }
                    break;
                }
                H2_TYPE_GOAWAY => {
                    if payload.len() >= 8 {
                        error_code = Some(u32::from_be_bytes(payload[4..8].try_into().unwrap()));
                    }
                    break;
                }
                H2_TYPE_SETTINGS if flags & H2_FLAG_ACK == 0 => {
                    self.send_raw(&frame_bytes(H2_TYPE_SETTINGS, H2_FLAG_ACK, 0, &[])).await?;
                }
                H2_TYPE_PING if flags & H2_FLAG_ACK == 0 => {
                    self.send_raw(&frame_bytes(H2_TYPE_PING, H2_FLAG_ACK, 0, &payload)).await?;
                }
                _ => {}
            }
        }

        Ok(Response2 {
            status_code,
            headers: headers_out,
            body,
            elapsed: start.elapsed(),
            timed_out: false,
            error_code,
        })
    }
}

fn frame_bytes(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(H2_FRAME_HDR_LEN + len);
    out.push(((len >> 16) & 0xff) as u8);
    out.push(((len >> 8) & 0xff) as u8);
    out.push((len & 0xff) as u8);
    out.push(frame_type);
    out.push(flags);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parse and remove one complete frame from the front of `buf`, if one
/// is fully buffered.
fn try_take_frame(buf: &mut Vec<u8>) -> Option<(u8, u8, u32, Vec<u8>)> {
    if buf.len() < H2_FRAME_HDR_LEN {
        return None;
    }
    let payload_len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | (buf[2] as usize);
    let total = H2_FRAME_HDR_LEN + payload_len;
    if buf.len() < total {
        return None;
    }
    let frame_type = buf[3];
    let flags = buf[4];
    let stream_id = u32::from_be_bytes([buf[5] & 0x7f, buf[6], buf[7], buf[8]]);
    let payload = buf[H2_FRAME_HDR_LEN..total].to_vec();
    buf.drain(..total);
    Some((frame_type, flags, stream_id, payload))
}

/// `[start, end)` of the header block fragment within a HEADERS frame
/// payload, stripping optional padding and priority bytes.
fn header_block_range(payload: &[u8], flags: u8) -> (usize, usize) {
    let mut start = 0usize;
    let mut end = payload.len();
    if flags & H2_FLAG_PADDED != 0 {
        if payload.is_empty() {
            return (0, 0);
        }
        let pad_len = payload[0] as usize;
        start += 1;
        end = end.saturating_sub(pad_len);
    }
    if flags & H2_FLAG_PRIORITY != 0 {
        start += 5;
    }
    if start > end {
        (0, 0)
    } else {
        (start, end)
    }
}

fn data_range(payload: &[u8], flags: u8) -> (usize, usize) {
    if flags & H2_FLAG_PADDED != 0 && !payload.is_empty() {
        let pad = payload[0] as usize;
        (1, payload.len().saturating_sub(pad))
    } else {
        (0, payload.len())
    }
}

fn apply_decoded_headers(
    decoder: &mut hpack::Decoder<'static>,
    block: &[u8],
    status_code: &mut Option<u16>,
    headers_out: &mut Vec<HeaderField>,
) -> Result<(), DetectError> {
    let decoded = decoder
        .decode(block)
        .map_err(|e| DetectError::Protocol(format!("invalid hpack block: {e:?}")))?;
    for (name, value) in decoded {
        if name == b":status" {
            *status_code = std::str::from_utf8(&value).ok().and_then(|v| v.parse().ok());
        } else {
            headers_out.push(HeaderField::new(name, value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_encodes_length_type_flags_and_stream_id() {
        let bytes = frame_bytes(H2_TYPE_DATA, H2_FLAG_END_STREAM, 3, b"hi");
        assert_eq!(bytes[0..3], [0, 0, 2]);
        assert_eq!(bytes[3], H2_TYPE_DATA);
        assert_eq!(bytes[4], H2_FLAG_END_STREAM);
        assert_eq!(&bytes[5..9], &3u32.to_be_bytes());
        assert_eq!(&bytes[9..], b"hi");
    }

    #[test]
    fn try_take_frame_waits_for_full_payload() {
        let mut buf = frame_bytes(H2_TYPE_SETTINGS, 0, 0, &[1, 2, 3, 4]);
        buf.truncate(buf.len() - 1);
        assert!(try_take_frame(&mut buf).is_none());
    }

    #[test]
    fn try_take_frame_drains_exactly_one_frame() {
        let mut buf = frame_bytes(H2_TYPE_PING, 0, 0, b"12345678");
        buf.extend(frame_bytes(H2_TYPE_SETTINGS, H2_FLAG_ACK, 0, &[]));
        let (frame_type, flags, stream_id, payload) = try_take_frame(&mut buf).unwrap();
        assert_eq!(frame_type, H2_TYPE_PING);
        assert_eq!(flags, 0);
        assert_eq!(stream_id, 0);
        assert_eq!(payload, b"12345678");
        assert_eq!(buf.len(), H2_FRAME_HDR_LEN);
    }

    #[test]
    fn header_block_range_strips_padding_and_priority() {
        let mut payload = vec![2u8]; // pad length
        payload.extend_from_slice(&[0, 0, 0, 1, 22]); // priority: stream dep + weight
        payload.extend_from_slice(b"hblock");
        payload.extend_from_slice(&[0, 0]); // padding
        let (s, e) = header_block_range(&payload, H2_FLAG_PADDED | H2_FLAG_PRIORITY);
        assert_eq!(&payload[s..e], b"hblock");
    }

    #[test]
    fn stream_ids_are_odd_and_increase_by_two() {
        let mut client = Http2Client::new();
        let a = client.alloc_stream_id();
        let b = client.alloc_stream_id();
        assert_eq!(a, 1);
        assert_eq!(b, 3);
    }

    #[test]
    fn encoder_preserves_duplicate_pseudo_headers() {
        let mut client = Http2Client::new();
        let req = Request2::new()
            .pseudo(":method", *b"POST")
            .pseudo(":path", *b"/a")
            .pseudo(":path", *b"/b")
            .header(*b"content-length", *b"4")
            .end_stream(true);
        let mut header_list = Vec::new();
        for h in &req.pseudo_headers {
            header_list.push((h.name.clone(), h.value.clone()));
        }
        for h in &req.headers {
            header_list.push((h.name.clone(), h.value.clone()));
        }
        let refs: Vec<(&[u8], &[u8])> = header_list.iter().map(|(n, v)| (n.as_slice(), v.as_slice())).collect();
        let block = client.encoder.encode(refs);

        let mut decoder = hpack::Decoder::new();
        let decoded = decoder.decode(&block).unwrap();
        let path_count = decoded.iter().filter(|(n, _)| n == b":path").count();
        assert_eq!(path_count, 2);
        assert!(decoded.iter().any(|(n, _)| n == b"content-length"));
    }
}

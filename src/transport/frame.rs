//! Frame encoding and decoding for the LDT wire format.
//!
//! Wire format (UTF-8 text):
//! ```text
//! request:  {route} / {data}\r\n
//! response: {status} / {data}\r\n
//! ```
//!
//! The field separator `" / "` may recur inside `data`; everything after the
//! first separator is the payload. The delimiter `\r\n` may not appear inside
//! a frame: on the wire every occurrence ends one, so text following a stray
//! delimiter is decoded as a frame of its own and dropped if malformed.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::core::{
    DEFAULT_MAX_BUFFERED_BYTES, DELIMITER, FIELD_SEPARATOR, STATUS_PUSH, SerializationError,
};

/// Reasons a candidate frame is discarded.
///
/// Never surfaced to callers of [`FrameCodec::feed`]; malformed frames are
/// logged and skipped without affecting the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame is not terminated by the delimiter.
    #[error("frame is not terminated by CR LF")]
    MissingDelimiter,

    /// Delimiter occurs inside the frame.
    #[error("delimiter occurs {0} times in one frame")]
    EmbeddedDelimiter(usize),

    /// Leading status field is empty.
    #[error("empty status field")]
    MissingStatus,

    /// Leading status field is not a decimal number.
    #[error("invalid status field: {0:?}")]
    InvalidStatus(String),

    /// Status zero is never valid.
    #[error("status zero")]
    ZeroStatus,

    /// No `" / "` after the status field.
    #[error("missing field separator")]
    MissingSeparator,
}

/// Result type for frame decoding.
pub type CodecResult<T> = Result<T, FrameError>;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    status_or_route: u16,
    body: String,
    raw: Bytes,
}

impl ProtocolMessage {
    /// Leading status (responses) or route (requests) code.
    pub fn status_or_route(&self) -> u16 {
        self.status_or_route
    }

    /// Payload with its internal separators preserved and the delimiter stripped.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The candidate frame exactly as it arrived, delimiter included.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Whether this is an unsolicited push (status 100).
    pub fn is_push(&self) -> bool {
        self.status_or_route == STATUS_PUSH
    }

    /// Consume the message, keeping only the payload.
    pub fn into_body(self) -> String {
        self.body
    }
}

impl std::fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.raw.len(), FIELD_SEPARATOR, self.body)
    }
}

/// Encode a request frame `"{route} / {data}\r\n"`.
///
/// The route must be non-empty and free of the separator and of CR/LF; the
/// data must not contain the delimiter.
pub fn encode(route: &str, data: &str) -> Result<Vec<u8>, SerializationError> {
    validate_route(route)?;
    if contains_delimiter(data.as_bytes()) {
        return Err(SerializationError::EmbeddedDelimiter);
    }

    let mut out =
        Vec::with_capacity(route.len() + FIELD_SEPARATOR.len() + data.len() + DELIMITER.len());
    out.extend_from_slice(route.as_bytes());
    out.extend_from_slice(FIELD_SEPARATOR.as_bytes());
    out.extend_from_slice(data.as_bytes());
    out.extend_from_slice(DELIMITER);
    Ok(out)
}

/// Encode a request frame from raw payload bytes, which must be UTF-8.
pub fn encode_bytes(route: &str, data: &[u8]) -> Result<Vec<u8>, SerializationError> {
    let data = std::str::from_utf8(data).map_err(|_| SerializationError::NotUtf8)?;
    encode(route, data)
}

/// Encode pre-formatted frame text by appending the delimiter.
pub fn encode_line(text: &str) -> Result<Vec<u8>, SerializationError> {
    if contains_delimiter(text.as_bytes()) {
        return Err(SerializationError::EmbeddedDelimiter);
    }
    let mut out = Vec::with_capacity(text.len() + DELIMITER.len());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(DELIMITER);
    Ok(out)
}

/// Decode one complete candidate frame (delimiter included).
pub fn decode_frame(frame: &[u8]) -> CodecResult<ProtocolMessage> {
    decode_candidate(Bytes::copy_from_slice(frame))
}

fn decode_candidate(raw: Bytes) -> CodecResult<ProtocolMessage> {
    let text = std::str::from_utf8(&raw).map_err(|_| FrameError::InvalidUtf8)?;

    let delimiters = text.matches("\r\n").count();
    if delimiters > 1 {
        return Err(FrameError::EmbeddedDelimiter(delimiters));
    }
    let content = text
        .strip_suffix("\r\n")
        .ok_or(FrameError::MissingDelimiter)?;

    let mut segments = content.split(FIELD_SEPARATOR);
    let status = parse_status(segments.next().unwrap_or_default())?;
    let first = segments.next().ok_or(FrameError::MissingSeparator)?;

    // Later segments were split off the payload itself; glue them back.
    let mut body = String::with_capacity(content.len());
    body.push_str(first);
    for segment in segments {
        body.push_str(FIELD_SEPARATOR);
        body.push_str(segment);
    }

    Ok(ProtocolMessage {
        status_or_route: status,
        body,
        raw,
    })
}

fn parse_status(field: &str) -> CodecResult<u16> {
    if field.is_empty() {
        return Err(FrameError::MissingStatus);
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidStatus(field.to_owned()));
    }
    let status: u16 = field
        .parse()
        .map_err(|_| FrameError::InvalidStatus(field.to_owned()))?;
    if status == 0 {
        return Err(FrameError::ZeroStatus);
    }
    Ok(status)
}

fn validate_route(route: &str) -> Result<(), SerializationError> {
    if route.is_empty()
        || route.contains(FIELD_SEPARATOR)
        || route.bytes().any(|b| b == b'\r' || b == b'\n')
    {
        return Err(SerializationError::InvalidRoute(route.to_owned()));
    }
    Ok(())
}

fn contains_delimiter(bytes: &[u8]) -> bool {
    find_delimiter(bytes).is_some()
}

fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Incremental decoder for one connection's inbound byte stream.
///
/// Bytes are accumulated until a delimiter is seen; every delimiter ends a
/// frame. Output therefore does not depend on how the stream is chunked, and
/// a malformed frame never takes a well-formed neighbour down with it.
///
/// Must be [`reset`](FrameCodec::reset) between connections.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    /// Offset where the next delimiter search resumes.
    scan_from: usize,
    max_buffered: usize,
    discarded: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with the default buffering limit.
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED_BYTES)
    }

    /// Create a codec that discards its buffer once more than `max` bytes
    /// accumulate without a frame boundary.
    pub fn with_max_buffered(max: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scan_from: 0,
            max_buffered: max,
            discarded: 0,
        }
    }

    /// Append a chunk and return the frames it completes, in arrival order.
    ///
    /// Frames are extracted lazily. Frames left unconsumed when the iterator
    /// is dropped stay buffered and come out of the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { codec: self }
    }

    /// Encode a request frame. See [`encode`].
    pub fn encode(&self, route: &str, data: &str) -> Result<Vec<u8>, SerializationError> {
        encode(route, data)
    }

    /// Drop any partial frame. Called on every new connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }

    /// Bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of frames discarded as malformed since creation.
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    fn next_candidate(&mut self) -> Option<Bytes> {
        if let Some(offset) = find_delimiter(&self.buffer[self.scan_from..]) {
            let end = self.scan_from + offset + DELIMITER.len();
            self.scan_from = 0;
            return Some(self.buffer.split_to(end).freeze());
        }

        // Keep a trailing CR in the next search window.
        self.scan_from = self.buffer.len().saturating_sub(DELIMITER.len() - 1);

        if self.buffer.len() > self.max_buffered {
            tracing::warn!(
                buffered = self.buffer.len(),
                limit = self.max_buffered,
                "no frame boundary within buffer limit, discarding buffered bytes"
            );
            self.discarded += 1;
            self.reset();
        }
        None
    }
}

/// Lazy iterator over the frames completed by one [`FrameCodec::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
}

impl Iterator for Frames<'_> {
    type Item = ProtocolMessage;

    fn next(&mut self) -> Option<ProtocolMessage> {
        loop {
            let candidate = self.codec.next_candidate()?;
            let len = candidate.len();
            match decode_candidate(candidate) {
                Ok(message) => return Some(message),
                Err(err) => {
                    self.codec.discarded += 1;
                    tracing::warn!(error = %err, len, "discarding malformed frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(codec: &mut FrameCodec, chunk: &[u8]) -> Vec<(u16, String)> {
        codec
            .feed(chunk)
            .map(|m| (m.status_or_route(), m.into_body()))
            .collect()
    }

    #[test]
    fn test_encode_request() {
        assert_eq!(encode("42", "hello").unwrap(), b"42 / hello\r\n");
        assert_eq!(encode("location", "").unwrap(), b"location / \r\n");
        assert_eq!(
            encode("7", "{\"a\": \"x / y\"}").unwrap(),
            b"7 / {\"a\": \"x / y\"}\r\n"
        );
    }

    #[test]
    fn test_encode_rejects_delimiter_and_bad_routes() {
        assert_eq!(
            encode("1", "a\r\nb"),
            Err(SerializationError::EmbeddedDelimiter)
        );
        assert!(matches!(encode("", "x"), Err(SerializationError::InvalidRoute(_))));
        assert!(matches!(encode("a / b", "x"), Err(SerializationError::InvalidRoute(_))));
        assert!(matches!(encode("a\n", "x"), Err(SerializationError::InvalidRoute(_))));
    }

    #[test]
    fn test_encode_bytes_requires_utf8() {
        assert_eq!(
            encode_bytes("1", &[0xff, 0xfe]),
            Err(SerializationError::NotUtf8)
        );
        assert_eq!(encode_bytes("1", "ok".as_bytes()).unwrap(), b"1 / ok\r\n");
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("5 / ping").unwrap(), b"5 / ping\r\n");
        assert_eq!(
            encode_line("x\r\ny"),
            Err(SerializationError::EmbeddedDelimiter)
        );
    }

    #[test]
    fn test_feed_single_frame() {
        let mut codec = FrameCodec::new();
        let frame = encode("200", "ok").unwrap();
        let messages: Vec<_> = codec.feed(&frame).collect();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status_or_route(), 200);
        assert_eq!(messages[0].body(), "ok");
        assert_eq!(messages[0].raw_bytes().as_ref(), frame.as_slice());
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_payload_separator_round_trip() {
        let mut codec = FrameCodec::new();
        for data in ["a / b", "x / ", " / y", "k / v / w / z", "a/b", "a  / b"] {
            let frame = encode("200", data).unwrap();
            assert_eq!(collect(&mut codec, &frame), vec![(200, data.to_owned())]);
        }
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let mut stream = Vec::new();
        stream.extend(encode("200", "ok").unwrap());
        stream.extend(encode("100", "push / with / separators").unwrap());
        stream.extend(encode("404", "").unwrap());

        let expected = collect(&mut FrameCodec::new(), &stream);
        assert_eq!(expected.len(), 3);

        for split in 0..=stream.len() {
            let mut codec = FrameCodec::new();
            let mut got = collect(&mut codec, &stream[..split]);
            got.extend(collect(&mut codec, &stream[split..]));
            assert_eq!(got, expected, "split at {split}");
        }

        let mut codec = FrameCodec::new();
        let got: Vec<_> = stream
            .iter()
            .flat_map(|b| collect(&mut codec, std::slice::from_ref(b)))
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_two_chunk_scenario() {
        let mut codec = FrameCodec::new();
        assert!(collect(&mut codec, b"200 / ok").is_empty());
        assert_eq!(
            collect(&mut codec, b"\r\n100 / ping\r\n"),
            vec![(200, "ok".to_owned()), (100, "ping".to_owned())]
        );
    }

    #[test]
    fn test_every_delimiter_ends_a_frame() {
        let mut codec = FrameCodec::new();
        assert_eq!(
            collect(&mut codec, b"200 / a\r\nb / c\r\n"),
            vec![(200, "a".to_owned())]
        );
        assert_eq!(
            collect(&mut codec, b"200 / a\r\nb\r\nc / d\r\n"),
            vec![(200, "a".to_owned())]
        );
        assert_eq!(codec.discarded_frames(), 3);

        // Scanning resumes after the dropped pieces.
        assert_eq!(
            collect(&mut codec, b"201 / next\r\n"),
            vec![(201, "next".to_owned())]
        );
    }

    #[test]
    fn test_stray_delimiter_across_chunks() {
        let mut codec = FrameCodec::new();
        assert_eq!(
            collect(&mut codec, b"200 / a\r\nb"),
            vec![(200, "a".to_owned())]
        );
        assert!(collect(&mut codec, b" / c\r\n").is_empty());
        assert_eq!(codec.buffered_len(), 0);
        assert_eq!(codec.discarded_frames(), 1);
    }

    #[test]
    fn test_malformed_neighbour_keeps_valid_frames() {
        let mut codec = FrameCodec::new();
        assert_eq!(
            collect(&mut codec, b"200 / ok\r\n / empty\r\n201 / next\r\n"),
            vec![(200, "ok".to_owned()), (201, "next".to_owned())]
        );
        assert_eq!(codec.discarded_frames(), 1);
    }

    #[test]
    fn test_malformed_lines_chunk_independent() {
        let stream = b"200 / a\r\nb / c\r\n / x\r\n7 / y\r\n";
        let expected = vec![(200, "a".to_owned()), (7, "y".to_owned())];
        assert_eq!(collect(&mut FrameCodec::new(), stream), expected);

        for split in 0..=stream.len() {
            let mut codec = FrameCodec::new();
            let mut got = collect(&mut codec, &stream[..split]);
            got.extend(collect(&mut codec, &stream[split..]));
            assert_eq!(got, expected, "split at {split}");
            assert_eq!(codec.discarded_frames(), 2, "split at {split}");
        }
    }

    #[test]
    fn test_decode_frame_rejects_embedded_delimiter() {
        assert_eq!(
            decode_frame(b"200 / a\r\nb\r\n"),
            Err(FrameError::EmbeddedDelimiter(2))
        );
    }

    #[test]
    fn test_malformed_status_discarded() {
        let mut codec = FrameCodec::new();
        assert!(collect(&mut codec, b"0 / zero\r\n").is_empty());
        assert!(collect(&mut codec, b"000 / zero\r\n").is_empty());
        assert!(collect(&mut codec, b" / empty\r\n").is_empty());
        assert!(collect(&mut codec, b"+1 / signed\r\n").is_empty());
        assert!(collect(&mut codec, b"99999 / overflow\r\n").is_empty());
        assert_eq!(codec.discarded_frames(), 5);

        assert_eq!(decode_frame(b"0 / x\r\n"), Err(FrameError::ZeroStatus));
        assert_eq!(decode_frame(b" / x\r\n"), Err(FrameError::MissingStatus));
        assert_eq!(
            decode_frame(b"abc / x\r\n"),
            Err(FrameError::InvalidStatus("abc".into()))
        );
    }

    #[test]
    fn test_missing_separator_and_delimiter() {
        assert_eq!(decode_frame(b"200\r\n"), Err(FrameError::MissingSeparator));
        assert_eq!(decode_frame(b"200 / ok"), Err(FrameError::MissingDelimiter));
    }

    #[test]
    fn test_invalid_utf8_discarded_then_recovers() {
        let mut codec = FrameCodec::new();
        let mut chunk = b"200 / \xff\xfe\r\n".to_vec();
        chunk.extend_from_slice(b"201 / fine\r\n");
        assert_eq!(collect(&mut codec, &chunk), vec![(201, "fine".to_owned())]);
        assert_eq!(codec.discarded_frames(), 1);
    }

    #[test]
    fn test_lone_cr_and_lf_are_payload() {
        let mut codec = FrameCodec::new();
        assert_eq!(
            collect(&mut codec, b"200 / a\rb\nc\r\n"),
            vec![(200, "a\rb\nc".to_owned())]
        );
    }

    #[test]
    fn test_empty_body() {
        let mut codec = FrameCodec::new();
        assert_eq!(collect(&mut codec, b"204 / \r\n"), vec![(204, String::new())]);
    }

    #[test]
    fn test_push_and_display() {
        let message = decode_frame(b"100 / ping\r\n").unwrap();
        assert!(message.is_push());
        assert_eq!(message.to_string(), "12 / ping");
        assert!(!decode_frame(b"200 / ok\r\n").unwrap().is_push());
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let mut codec = FrameCodec::new();
        assert!(collect(&mut codec, b"200 / half").is_empty());
        codec.reset();
        assert_eq!(codec.buffered_len(), 0);
        assert_eq!(
            collect(&mut codec, b"201 / whole\r\n"),
            vec![(201, "whole".to_owned())]
        );
    }

    #[test]
    fn test_iterator_is_restartable() {
        let mut codec = FrameCodec::new();
        let first = codec.feed(b"1 / a\r\n2 / b\r\n").next().unwrap();
        assert_eq!(first.body(), "a");

        // Second frame stays buffered until the next feed.
        assert_eq!(collect(&mut codec, b""), vec![(2, "b".to_owned())]);
    }

    #[test]
    fn test_buffer_limit_discards_runaway_frame() {
        let mut codec = FrameCodec::with_max_buffered(16);
        assert!(collect(&mut codec, &[b'x'; 32]).is_empty());
        assert_eq!(codec.buffered_len(), 0);
        assert_eq!(codec.discarded_frames(), 1);

        assert_eq!(collect(&mut codec, b"3 / ok\r\n"), vec![(3, "ok".to_owned())]);
    }
}

//! Newline-delimited JSON codec for the daemon socket.
//!
//! Wire format, both directions: one JSON document per line, UTF-8,
//! terminated by `\n`. The decoder reassembles lines across partial reads;
//! a complete line that fails to parse yields a [`BridgeError::MalformedFrame`]
//! item for that line only, and subsequent lines in the same read still
//! decode.

use bytes::BytesMut;
use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;

/// Maximum accepted line length (16 MB). Longer lines are discarded as
/// malformed up to the next newline.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Incremental decoder for newline-delimited JSON.
///
/// Feed raw socket bytes via [`LineCodec::feed`] and get back one result per
/// complete line. Incomplete trailing data is buffered for the next call.
#[derive(Debug, Default)]
pub struct LineCodec {
    buf: BytesMut,
    /// Set while discarding an oversized line up to its terminating newline.
    overflowed: bool,
}

impl LineCodec {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete lines.
    ///
    /// Returns one entry per complete line: the parsed JSON document, or a
    /// `MalformedFrame` error for lines that are not valid JSON. Empty lines
    /// are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Value, BridgeError>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_BYTES {
                    self.buf.clear();
                    if !self.overflowed {
                        self.overflowed = true;
                        out.push(Err(BridgeError::MalformedFrame(format!(
                            "line exceeds {MAX_LINE_BYTES} bytes"
                        ))));
                    }
                }
                break;
            };

            let line = self.buf.split_to(pos + 1);
            if self.overflowed {
                // Tail of a discarded oversized line.
                self.overflowed = false;
                continue;
            }

            let mut line = &line[..pos];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                continue;
            }

            out.push(serde_json::from_slice(line).map_err(|e| {
                BridgeError::MalformedFrame(format!("invalid JSON: {e}"))
            }));
        }

        out
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Serialize a request into exactly one newline-terminated JSON document.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the payload cannot be represented as JSON.
    pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, BridgeError> {
        let mut bytes = serde_json::to_vec(payload)
            .map_err(|e| BridgeError::EncodingError(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_frame() {
        let mut codec = LineCodec::new();
        let out = codec.feed(b"{\"type\":\"version\"}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"type": "version"}));
        assert!(!codec.has_partial());
    }

    #[test]
    fn test_multiple_frames_in_single_feed() {
        let mut codec = LineCodec::new();
        let out = codec.feed(b"{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a": 1}));
        assert_eq!(out[1].as_ref().unwrap(), &json!({"b": 2}));
        assert_eq!(out[2].as_ref().unwrap(), &json!({"c": 3}));
    }

    #[test]
    fn test_partial_frame_reassembly() {
        let mut codec = LineCodec::new();
        let encoded = b"{\"key\":\"value\"}\n";
        let mid = encoded.len() / 2;

        let out = codec.feed(&encoded[..mid]);
        assert!(out.is_empty());
        assert!(codec.has_partial());

        let out = codec.feed(&encoded[mid..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"key": "value"}));
        assert!(!codec.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut codec = LineCodec::new();
        let encoded = b"{\"n\":42}\n";
        for (i, byte) in encoded.iter().enumerate() {
            let out = codec.feed(&[*byte]);
            if i < encoded.len() - 1 {
                assert!(out.is_empty());
            } else {
                assert_eq!(out.len(), 1);
                assert_eq!(out[0].as_ref().unwrap(), &json!({"n": 42}));
            }
        }
    }

    #[test]
    fn test_malformed_line_between_valid_frames() {
        let mut codec = LineCodec::new();
        let out = codec.feed(b"{\"a\":1}\nnot json at all\n{\"b\":2}\n");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a": 1}));
        assert!(matches!(out[1], Err(BridgeError::MalformedFrame(_))));
        assert_eq!(out[2].as_ref().unwrap(), &json!({"b": 2}));
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut codec = LineCodec::new();
        let out = codec.feed(b"\n\n{\"a\":1}\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn test_crlf_tolerated() {
        let mut codec = LineCodec::new();
        let out = codec.feed(b"{\"a\":1}\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn test_oversized_line_discarded_then_recovers() {
        let mut codec = LineCodec::new();
        // Exceed the cap without a newline.
        let big = vec![b'x'; MAX_LINE_BYTES + 1];
        let out = codec.feed(&big);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(BridgeError::MalformedFrame(_))));

        // Remainder of the oversized line is swallowed, next frame decodes.
        let out = codec.feed(b"tail of the huge line\n{\"ok\":true}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"ok": true}));
    }

    #[test]
    fn test_encode_appends_newline() {
        let bytes = LineCodec::encode(&json!({"type": "subscribe"})).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(value, json!({"type": "subscribe"}));
    }

    #[test]
    fn test_encode_unrepresentable_payload() {
        use std::collections::HashMap;
        // Maps with non-string keys cannot be represented as JSON objects.
        let mut bad: HashMap<Vec<u8>, u32> = HashMap::new();
        bad.insert(vec![1, 2, 3], 1);
        let err = LineCodec::encode(&bad).unwrap_err();
        assert!(matches!(err, BridgeError::EncodingError(_)));
    }

    #[test]
    fn test_encode_round_trip_through_feed() {
        let payload = json!({"type": "send", "messageBody": "hi there"});
        let bytes = LineCodec::encode(&payload).unwrap();
        let mut codec = LineCodec::new();
        let out = codec.feed(&bytes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &payload);
    }
}

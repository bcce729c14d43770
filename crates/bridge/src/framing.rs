//! NDJSON framing for inbound stream bytes.

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::debug;

/// One unit produced by [`NdjsonCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, non-empty line with surrounding whitespace (and the `\n`) removed.
    Line(Bytes),
    /// A line longer than the configured limit. Its bytes were discarded.
    Oversized,
}

/// Splits a byte stream on `\n`.
///
/// Blank lines are skipped. Bytes after the last newline at end of input are dropped: a line
/// only counts once it is terminated.
#[derive(Debug)]
pub struct NdjsonCodec {
    max_line_bytes: usize,
    /// Offset already scanned for a newline, so partial lines are not rescanned per chunk.
    next_index: usize,
    /// Inside an oversized line; drop input until the next newline.
    discarding: bool,
}

impl NdjsonCodec {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for NdjsonCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| i + self.next_index);

            let Some(end) = newline else {
                if self.discarding || buf.len() > self.max_line_bytes {
                    self.discarding = true;
                    buf.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let line = buf.split_to(end + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                return Ok(Some(Frame::Oversized));
            }
            if end > self.max_line_bytes {
                return Ok(Some(Frame::Oversized));
            }

            let trimmed = line[..end].trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(Frame::Line(Bytes::copy_from_slice(trimmed))));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if !buf.is_empty() {
            debug!(bytes = buf.len(), "dropping unterminated trailing line");
            buf.advance(buf.len());
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Frame {
        Frame::Line(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn drain(codec: &mut NdjsonCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(f) = codec.decode(buf).expect("decode") {
            out.push(f);
        }
        out
    }

    #[test]
    fn splits_lines_and_skips_blank_ones() {
        let mut codec = NdjsonCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"a\":1}\n\n  \r\n{\"b\":2}\r\n"[..]);
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![line("{\"a\":1}"), line("{\"b\":2}")]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut codec = NdjsonCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"id\":\"1\",\"na"[..]);
        assert!(drain(&mut codec, &mut buf).is_empty());
        buf.extend_from_slice(b"me\":\"x\"}\n{\"id\"");
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![line("{\"id\":\"1\",\"name\":\"x\"}")]
        );
        buf.extend_from_slice(b":2}\n");
        assert_eq!(drain(&mut codec, &mut buf), vec![line("{\"id\":2}")]);
    }

    #[test]
    fn oversized_line_yields_one_frame_and_recovers() {
        let mut codec = NdjsonCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abc"[..]);
        assert!(drain(&mut codec, &mut buf).is_empty());
        assert!(buf.is_empty(), "oversized prefix must not be buffered");

        buf.extend_from_slice(b"more\n{}\n");
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![Frame::Oversized, line("{}")]
        );
    }

    #[test]
    fn complete_line_over_limit_is_oversized() {
        let mut codec = NdjsonCodec::new(4);
        let mut buf = BytesMut::from(&b"123456\n[]\n"[..]);
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![Frame::Oversized, line("[]")]
        );
    }

    #[test]
    fn unterminated_tail_is_dropped_at_eof() {
        let mut codec = NdjsonCodec::new(1024);
        let mut buf = BytesMut::from(&b"{}\n{\"partial\""[..]);
        assert_eq!(codec.decode_eof(&mut buf).expect("eof"), Some(line("{}")));
        assert_eq!(codec.decode_eof(&mut buf).expect("eof"), None);
        assert!(buf.is_empty());
    }
}

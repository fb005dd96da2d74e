//! grpc-web frame envelopes over a streaming HTTP body.
//!
//! Every frame is a 5-byte header `[flags, len as big-endian u32]` followed by
//! `len` payload bytes. Flag bit 0x80 marks a trailer whose payload is a block
//! of `\r\n`-separated ASCII headers; a non-zero `grpc-status` there is fatal
//! for the stream.

use crate::WireError;

const TRAILER_FLAG: u8 = 0x80;
const HEADER_LEN: usize = 5;

/// Wraps `payload` in a data-frame envelope.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(0x00);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One complete frame yielded by the reader.
pub enum Frame {
    /// A message payload.
    Message(Vec<u8>),
    /// A trailer with `grpc-status: 0`; the stream is complete.
    Trailer,
}

#[derive(Debug, Default)]
/// Incremental frame reader. Feed arbitrary chunk splits with [`extend`];
/// leftover bytes stay buffered until the next frame completes.
///
/// [`extend`]: FrameReader::extend
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Yields the next complete frame, or `None` when more bytes are needed.
    ///
    /// A trailer frame carrying a non-zero `grpc-status` returns
    /// [`WireError::RemoteStatus`] with the URL-decoded `grpc-message`.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let flags = self.buf[0];
        let length = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        let total = HEADER_LEN + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);

        if flags & TRAILER_FLAG != 0 {
            let (status, message) = parse_trailer(&payload);
            if status != 0 {
                return Err(WireError::RemoteStatus { status, message });
            }
            return Ok(Some(Frame::Trailer));
        }
        Ok(Some(Frame::Message(payload)))
    }

    /// Bytes currently buffered but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn parse_trailer(payload: &[u8]) -> (u32, String) {
    let text = String::from_utf8_lossy(payload);
    let mut status = 0_u32;
    let mut message = String::new();
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "grpc-status" => status = value.parse().unwrap_or(0),
            "grpc-message" => message = percent_decode(value),
            _ => {}
        }
    }
    (status, message)
}

/// Narrow percent-decoder for `grpc-message` values. Malformed escapes pass
/// through literally; `+` is not treated as a space.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            if let (Some(high), Some(low)) = (
                bytes.get(index + 1).copied().and_then(hex_digit),
                bytes.get(index + 2).copied().and_then(hex_digit),
            ) {
                out.push(high << 4 | low);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

/// Default cap on a single frame: 512 MB, the server's own bulk limit.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

// Arrays nested deeper than this are rejected instead of recursing further.
const MAX_NESTING_DEPTH: usize = 512;

// Smallest encoding of any element ("+\r\n").
const MIN_ELEMENT_SIZE: usize = 3;

/// A RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder handles streaming input and decodes frames incrementally.
/// Call [`append`](Decoder::append) to add data, then [`decode`](Decoder::decode)
/// to parse frames. `decode` returns `Ok(None)` when more data is needed and
/// leaves the buffer untouched, so it can be retried after every read no
/// matter where the previous chunk ended.
///
/// # Example
///
/// ```
/// use respite::proto::codec::Decoder;
/// use respite::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+O");
/// assert_eq!(decoder.decode().unwrap(), None);
/// decoder.append(b"K\r\n");
/// assert_eq!(decoder.decode().unwrap(), Some(Frame::SimpleString(b"OK".to_vec())));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes for a single frame
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Appends raw bytes to the internal buffer.
    ///
    /// Call this method when new data arrives from the network. Size limits
    /// are checked during decode, not append.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops any buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Attempts to decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(Frame))` if a complete frame was decoded and removes
    /// its bytes from the buffer. Returns `Ok(None)` if more data is needed.
    /// Returns `Err(...)` if the data is malformed; the buffer is then in an
    /// unspecified position and the stream must be abandoned.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let parser = Parser {
            buf: &self.buf,
            max_frame_size: self.max_frame_size,
        };
        match parser.parse(0, 0)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None if self.buf.len() > self.max_frame_size => Err(DecodeError::new(
                "buffer size exceeded maximum frame size",
            )),
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only parse over the buffered bytes. Every method returns the
/// decoded value plus the position just past it, or `None` if the buffer
/// ends first.
struct Parser<'a> {
    buf: &'a [u8],
    max_frame_size: usize,
}

impl Parser<'_> {
    fn parse(&self, pos: usize, depth: usize) -> Result<Option<(Frame, usize)>, DecodeError> {
        let Some(&marker) = self.buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = self.line(pos + 1)? else {
            return Ok(None);
        };

        let parsed = match marker {
            b'+' => Some((Frame::SimpleString(line.to_vec()), next)),
            b'-' => Some((Frame::Error(line.to_vec()), next)),
            b':' => Some((Frame::Integer(parse_int(line)?), next)),
            b'$' => self.bulk_string(parse_int(line)?, next)?,
            b'*' => self.array(parse_int(line)?, next, depth)?,
            other => {
                return Err(DecodeError::new(format!(
                    "unknown frame type: {:?}",
                    other as char
                )))
            }
        };
        Ok(parsed)
    }

    fn bulk_string(&self, len: i64, pos: usize) -> Result<Option<(Frame, usize)>, DecodeError> {
        if len == -1 {
            return Ok(Some((Frame::BulkString(None), pos)));
        }
        if len < 0 {
            return Err(DecodeError::new(format!("invalid bulk string length: {len}")));
        }
        let len = len as usize;
        if len > self.max_frame_size {
            return Err(DecodeError::new(
                "bulk string length exceeds maximum frame size",
            ));
        }

        let end = pos + len;
        if self.buf.len() < end + 2 {
            return Ok(None);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(DecodeError::new("bulk string not terminated by CRLF"));
        }
        let data = Bytes::copy_from_slice(&self.buf[pos..end]);
        Ok(Some((Frame::BulkString(Some(data)), end + 2)))
    }

    fn array(
        &self,
        count: i64,
        mut pos: usize,
        depth: usize,
    ) -> Result<Option<(Frame, usize)>, DecodeError> {
        if count == -1 {
            return Ok(Some((Frame::Array(None), pos)));
        }
        if count < 0 {
            return Err(DecodeError::new(format!("invalid array length: {count}")));
        }
        let count = count as usize;
        if count > self.max_frame_size / MIN_ELEMENT_SIZE {
            return Err(DecodeError::new("array length exceeds reasonable maximum"));
        }
        if depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::new("arrays nested too deeply"));
        }

        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            match self.parse(pos, depth + 1)? {
                Some((frame, next)) => {
                    items.push(frame);
                    pos = next;
                }
                None => return Ok(None),
            }
        }
        Ok(Some((Frame::Array(Some(items)), pos)))
    }

    /// Returns the bytes from `start` up to the next CRLF and the position
    /// after it.
    fn line(&self, start: usize) -> Result<Option<(&[u8], usize)>, DecodeError> {
        let rest = &self.buf[start.min(self.buf.len())..];
        let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if lf == 0 || rest[lf - 1] != b'\r' {
            return Err(DecodeError::new("line not terminated by CRLF"));
        }
        Ok(Some((&rest[..lf - 1], start + lf + 1)))
    }
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::new(format!(
                "invalid integer: {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

use bytes::{BufMut, Bytes, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that converts commands and [`Frame`]s to bytes.
///
/// The encoder accumulates data in an internal buffer and can be used
/// to encode multiple commands back to back, which is how a pipeline
/// batches its writes.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use respite::proto::codec::Encoder;
///
/// let mut encoder = Encoder::new();
/// encoder.encode_command(&[Bytes::from("GET"), Bytes::from("key")]);
/// assert_eq!(&encoder.take()[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a request as an array of bulk strings.
    ///
    /// Lengths are byte lengths, so arguments may hold any binary data,
    /// including `\r\n`.
    pub fn encode_command(&mut self, args: &[Bytes]) {
        let size: usize = args.iter().map(|a| a.len() + 16).sum::<usize>() + 16;
        self.buf.reserve(size);
        self.put_header(b'*', args.len() as i64);
        for arg in args {
            self.put_header(b'$', arg.len() as i64);
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Encodes a frame into the internal buffer using RESP protocol.
    ///
    /// # Arguments
    ///
    /// * `frame` - The frame to encode
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => {
                self.buf.put_u8(b'+');
                self.buf.extend_from_slice(s);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(e) => {
                self.buf.put_u8(b'-');
                self.buf.extend_from_slice(e);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => self.put_header(b':', *n),
            Frame::BulkString(Some(data)) => {
                self.put_header(b'$', data.len() as i64);
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(None) => self.put_header(b'$', -1),
            Frame::Array(Some(items)) => {
                self.put_header(b'*', items.len() as i64);
                for item in items {
                    self.encode(item);
                }
            }
            Frame::Array(None) => self.put_header(b'*', -1),
        }
    }

    /// Returns the number of encoded bytes waiting to be taken.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    ///
    /// The encoder can be reused afterwards.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    fn put_header(&mut self, marker: u8, n: i64) {
        self.buf.put_u8(marker);
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }
}

/// Encodes a single frame into a fresh buffer.
pub fn encode_frame(frame: &Frame) -> BytesMut {
    let mut encoder = Encoder::new();
    encoder.encode(frame);
    encoder.take()
}

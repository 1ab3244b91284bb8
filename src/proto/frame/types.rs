use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// One variant per RESP2 type marker:
/// - SimpleString: Status responses like "OK"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data, `None` for nil
/// - Array: Command arguments and array responses, `None` for a nil multi-bulk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar, or $-1 for nil).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n..., or *-1 for nil).
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Builds a bulk string frame from anything convertible to [`Bytes`].
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Builds a status frame.
    pub fn status(text: impl AsRef<[u8]>) -> Self {
        Frame::SimpleString(text.as_ref().to_vec())
    }

    /// Builds a non-nil array frame.
    pub fn array(items: Vec<Frame>) -> Self {
        Frame::Array(Some(items))
    }

    /// Converts the frame to a human-readable string representation.
    ///
    /// Nil bulk strings and nil arrays render as `nil`.
    pub fn to_display_string(&self) -> String {
        match self {
            Frame::SimpleString(s) => String::from_utf8_lossy(s).into_owned(),
            Frame::Error(e) => format!("(error) {}", String::from_utf8_lossy(e)),
            Frame::Integer(i) => i.to_string(),
            Frame::BulkString(Some(b)) => String::from_utf8_lossy(b).into_owned(),
            Frame::Array(Some(a)) => format!(
                "[{}]",
                a.iter()
                    .map(Frame::to_display_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Frame::BulkString(None) | Frame::Array(None) => "nil".to_string(),
        }
    }

    /// Returns the payload of a non-nil bulk string.
    pub fn as_bulk_string(&self) -> Option<&Bytes> {
        match self {
            Frame::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Returns the elements of a non-nil array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(Some(a)) => Some(a),
            _ => None,
        }
    }

    /// Returns the value of an integer frame.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns true for a nil bulk string or a nil array.
    pub fn is_nil(&self) -> bool {
        matches!(self, Frame::BulkString(None) | Frame::Array(None))
    }

    /// Returns true if this is a status frame with the given text.
    pub fn is_status(&self, text: &str) -> bool {
        matches!(self, Frame::SimpleString(s) if s.as_slice() == text.as_bytes())
    }
}

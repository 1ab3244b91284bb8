use std::fmt;

use bytes::Bytes;

use crate::proto::frame::Frame;

/// A command ready to be sent to the server.
///
/// Commands are built using the builder pattern and encoded as an array of
/// bulk strings when written. Every argument is binary safe.
///
/// # Example
///
/// ```
/// use respite::core::command::{get, set, Cmd};
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.args().len(), 3);
/// let get_cmd = get("key");
/// let set_cmd = set("key", "new_value");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name (e.g., "GET", "SET", "DEL")
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every item of `args`.
    #[inline]
    pub fn args_from<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command name followed by its arguments.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The command name, upper-cased for display.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(Some(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        ))
    }
}

impl fmt::Display for Cmd {
    /// Shows the command name and argument count, never the arguments
    /// themselves.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} args)", self.name(), self.args.len() - 1)
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates an ECHO command.
#[inline]
pub fn echo(msg: impl Into<Bytes>) -> Cmd {
    Cmd::new("ECHO").arg(msg)
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a SET command with expiration.
///
/// # Arguments
///
/// * `key` - The key to set
/// * `value` - The value to set
/// * `expiry` - Time until the key expires
#[inline]
pub fn set_with_expiry(
    key: impl Into<Bytes>,
    value: impl Into<Bytes>,
    expiry: std::time::Duration,
) -> Cmd {
    Cmd::new("SET")
        .arg(key)
        .arg(value)
        .arg("EX")
        .arg(expiry.as_secs().to_string())
}

/// Creates an MGET command.
#[inline]
pub fn mget<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    Cmd::new("MGET").args_from(keys)
}

/// Creates an MSET command.
#[inline]
pub fn mset<I, K, V>(pairs: I) -> Cmd
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Bytes>,
    V: Into<Bytes>,
{
    let mut cmd = Cmd::new("MSET");
    for (key, value) in pairs {
        cmd = cmd.arg(key).arg(value);
    }
    cmd
}

/// Creates a DEL command.
#[inline]
pub fn del<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    Cmd::new("DEL").args_from(keys)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    Cmd::new("EXISTS").args_from(keys)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates an INCRBY command.
#[inline]
pub fn incr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("INCRBY").arg(key).arg(amount.to_string())
}

/// Creates a DECR command.
#[inline]
pub fn decr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DECR").arg(key)
}

/// Creates an SADD command.
#[inline]
pub fn sadd<I, M>(key: impl Into<Bytes>, members: I) -> Cmd
where
    I: IntoIterator<Item = M>,
    M: Into<Bytes>,
{
    Cmd::new("SADD").arg(key).args_from(members)
}

/// Creates an SMEMBERS command.
#[inline]
pub fn smembers(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("SMEMBERS").arg(key)
}

/// Creates an LPUSH command.
#[inline]
pub fn lpush<I, V>(key: impl Into<Bytes>, values: I) -> Cmd
where
    I: IntoIterator<Item = V>,
    V: Into<Bytes>,
{
    Cmd::new("LPUSH").arg(key).args_from(values)
}

/// Creates an LPOP command.
#[inline]
pub fn lpop(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("LPOP").arg(key)
}

/// Creates a TYPE command.
#[inline]
pub fn key_type(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("TYPE").arg(key)
}

/// Creates a FLUSHDB command.
#[inline]
pub fn flushdb() -> Cmd {
    Cmd::new("FLUSHDB")
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a SELECT command.
#[inline]
pub fn select(db: u32) -> Cmd {
    Cmd::new("SELECT").arg(db.to_string())
}

/// Creates a WATCH command.
#[inline]
pub fn watch<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    Cmd::new("WATCH").args_from(keys)
}

/// Creates an UNWATCH command.
#[inline]
pub fn unwatch() -> Cmd {
    Cmd::new("UNWATCH")
}

/// Creates a MULTI command.
#[inline]
pub fn multi() -> Cmd {
    Cmd::new("MULTI")
}

/// Creates an EXEC command.
#[inline]
pub fn exec() -> Cmd {
    Cmd::new("EXEC")
}

/// Creates a DISCARD command.
#[inline]
pub fn discard() -> Cmd {
    Cmd::new("DISCARD")
}

/// Value type reported by `TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    /// The key does not exist.
    None,
    /// String value.
    String,
    /// List value.
    List,
    /// Set value.
    Set,
    /// Sorted set value.
    ZSet,
    /// Hash value.
    Hash,
    /// Stream value.
    Stream,
    /// A type this client does not know about.
    Other(String),
}

impl From<&str> for KeyType {
    fn from(name: &str) -> Self {
        match name {
            "none" => KeyType::None,
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::ZSet,
            "hash" => KeyType::Hash,
            "stream" => KeyType::Stream,
            other => KeyType::Other(other.to_string()),
        }
    }
}

fn unexpected(expected: &str, frame: &Frame) -> crate::Error {
    crate::Error::Protocol {
        message: format!(
            "expected {expected}, got {}",
            frame.to_display_string()
        ),
    }
}

/// Parses a frame as a server response, turning error replies into
/// [`Error::Server`](crate::Error::Server).
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame, crate::Error> {
    match frame {
        Frame::Error(e) => Err(crate::Error::server(&e)),
        _ => Ok(frame),
    }
}

/// Converts a frame to optional bytes. Nil becomes `None`; an empty bulk
/// string stays `Some` and empty.
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>, crate::Error> {
    match parse_frame_response(frame)? {
        Frame::BulkString(b) => Ok(b),
        Frame::Array(None) => Ok(None),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// Converts a frame to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64, crate::Error> {
    match parse_frame_response(frame)? {
        Frame::Integer(i) => Ok(i),
        Frame::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| crate::Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        other => Err(unexpected("integer", &other)),
    }
}

/// Converts a frame to a boolean. `+OK` and non-zero integers are true.
#[inline]
pub fn frame_to_bool(frame: Frame) -> Result<bool, crate::Error> {
    match parse_frame_response(frame)? {
        Frame::Integer(i) => Ok(i != 0),
        Frame::SimpleString(s) => Ok(s == b"OK"),
        Frame::BulkString(b) => Ok(b.is_some()),
        other => Err(unexpected("integer or status", &other)),
    }
}

/// Converts a frame array to a vector of optional bytes.
///
/// A nil array is `None`, distinct from an empty array.
#[inline]
pub fn frame_to_vec_bytes(frame: Frame) -> Result<Option<Vec<Option<Bytes>>>, crate::Error> {
    match parse_frame_response(frame)? {
        Frame::Array(Some(items)) => items
            .into_iter()
            .map(|item| match item {
                Frame::BulkString(b) => Ok(b),
                Frame::Error(e) => Err(crate::Error::server(&e)),
                other => Err(unexpected("bulk string in array", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Frame::Array(None) => Ok(None),
        other => Err(unexpected("array", &other)),
    }
}

/// Converts a status or bulk frame to a string.
#[inline]
pub fn frame_to_string(frame: Frame) -> Result<String, crate::Error> {
    match parse_frame_response(frame)? {
        Frame::SimpleString(s) => Ok(String::from_utf8_lossy(&s).into_owned()),
        Frame::BulkString(Some(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
        Frame::Integer(i) => Ok(i.to_string()),
        other => Err(unexpected("string", &other)),
    }
}

/// Converts a `TYPE` reply.
#[inline]
pub fn frame_to_key_type(frame: Frame) -> Result<KeyType, crate::Error> {
    frame_to_string(frame).map(|name| KeyType::from(name.as_str()))
}

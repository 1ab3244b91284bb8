use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::proto::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::{Error, Result};

/// Port used when an address does not name one.
pub const DEFAULT_PORT: u16 = 6379;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A TCP host and port.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// A Unix domain socket path.
    Unix(PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Address::Tcp { host, port } => write!(f, "{host}:{port}"),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Credential sent with `AUTH` and replayed after every reconnect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// ACL user name, if any.
    pub username: Option<String>,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session configuration applied at connect time and on every reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address.
    pub address: Address,
    /// Logical database selected after connecting.
    pub database: u32,
    /// Optional authentication credential.
    pub credentials: Option<Credentials>,
    /// Deadline for establishing the socket.
    pub connect_timeout: Duration,
    /// Deadline for each socket read. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Deadline for each socket write. `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Largest reply frame accepted from the server.
    pub max_frame_size: usize,
}

impl ClientConfig {
    /// Creates a configuration for the given address with default settings.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            database: 0,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            write_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Parses a connection URL.
    ///
    /// Accepted forms:
    ///
    /// - `redis://[[username]:password@]host[:port][/database]`
    /// - `unix:///path/to/socket[?db=N][&password=secret]`
    /// - `host:port` (no scheme)
    pub fn from_url(input: &str) -> Result<Self> {
        if !input.contains("://") {
            return Self::from_host_port(input);
        }

        let parsed = url::Url::parse(input).map_err(|e| invalid(format!("invalid address: {e}")))?;
        match parsed.scheme() {
            "redis" => Self::from_redis_url(&parsed),
            "unix" | "redis+unix" => Self::from_unix_url(&parsed),
            other => Err(invalid(format!(
                "invalid scheme {other:?}, expected redis:// or unix://"
            ))),
        }
    }

    fn from_host_port(input: &str) -> Result<Self> {
        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("invalid port in {input:?}")))?;
                (host, port)
            }
            None => (input, DEFAULT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("missing host in address"));
        }
        Ok(Self::new(Address::Tcp {
            host: host.to_string(),
            port,
        }))
    }

    fn from_redis_url(parsed: &url::Url) -> Result<Self> {
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host in address"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let mut config = Self::new(Address::Tcp { host, port });
        config.credentials = credentials_from_url(parsed)?;

        let path = parsed.path().trim_matches('/');
        if !path.is_empty() {
            config.database = parse_database(path)?;
        }
        config.apply_query(parsed)?;
        Ok(config)
    }

    fn from_unix_url(parsed: &url::Url) -> Result<Self> {
        let path = parsed.path();
        if path.is_empty() || path == "/" {
            return Err(invalid("missing socket path in address"));
        }
        let mut config = Self::new(Address::Unix(PathBuf::from(path)));
        config.credentials = credentials_from_url(parsed)?;
        config.apply_query(parsed)?;
        Ok(config)
    }

    fn apply_query(&mut self, parsed: &url::Url) -> Result<()> {
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "db" => self.database = parse_database(&value)?,
                "password" => {
                    let username = self.credentials.take().and_then(|c| c.username);
                    self.credentials = Some(Credentials {
                        username,
                        password: value.into_owned(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn credentials_from_url(parsed: &url::Url) -> Result<Option<Credentials>> {
    let Some(password) = parsed.password() else {
        return Ok(None);
    };
    let password = decode_component(password)?;
    let username = match parsed.username() {
        "" => None,
        user => Some(decode_component(user)?),
    };
    Ok(Some(Credentials { username, password }))
}

// url keeps userinfo percent-encoded.
fn decode_component(raw: &str) -> Result<String> {
    let raw = raw.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let hex = raw
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (raw[i], hex) {
            (b'%', Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (byte, _) => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| invalid("credential in address is not valid UTF-8"))
}

fn parse_database(value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| invalid(format!("invalid database index {value:?}")))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidArgument {
        message: message.into(),
    }
}

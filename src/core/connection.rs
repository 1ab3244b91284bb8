use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::core::config::{Address, ClientConfig};
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use tokio::net::UnixStream;

        async fn connect_unix(path: &std::path::Path, timeout: Duration) -> Result<Stream> {
            let stream = with_deadline(Some(timeout), "connect", UnixStream::connect(path)).await?;
            Ok(Stream::Unix(stream))
        }
    } else {
        async fn connect_unix(_path: &std::path::Path, _timeout: Duration) -> Result<Stream> {
            Err(Error::InvalidArgument {
                message: "unix sockets are not supported on this platform".to_string(),
            })
        }
    }
}

/// The socket underneath a [`Connection`].
#[derive(Debug)]
pub enum Stream {
    /// TCP socket.
    Tcp(TcpStream),
    /// Unix domain socket.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_read(buf),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A failed write, with the number of bytes the socket accepted before
/// the failure.
#[derive(Debug)]
pub struct WriteFailure {
    /// The error that stopped the write.
    pub error: Error,
    /// Bytes handed to the socket before the error.
    pub written: usize,
}

impl WriteFailure {
    /// Returns true when the peer is gone and nothing of the request left
    /// this process, so the request can be replayed on a new socket.
    pub fn is_retryable(&self) -> bool {
        self.written == 0 && matches!(&self.error, Error::Io { source } if is_disconnect(source))
    }
}

impl From<WriteFailure> for Error {
    fn from(failure: WriteFailure) -> Self {
        failure.error
    }
}

/// A connection to a RESP server.
///
/// This struct wraps the socket and handles RESP encoding and decoding.
/// Every read and write is bounded by the configured timeouts.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use respite::core::config::ClientConfig;
/// use respite::core::connection::Connection;
///
/// #[tokio::main]
/// async fn main() -> respite::Result<()> {
///     let config = ClientConfig::from_url("redis://127.0.0.1:6379")?;
///     let mut conn = Connection::connect(&config).await?;
///
///     conn.write_command(&[Bytes::from("PING")]).await?;
///     let resp = conn.read_frame().await?;
///     println!("{:?}", resp);
///
///     Ok(())
/// }
/// ```
pub struct Connection {
    stream: Stream,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    /// Opens a socket to the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the server refuses the connection and
    /// [`Error::Timeout`] if the connect timeout elapses.
    #[instrument(skip(config), fields(address = %config.address), level = "debug")]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let stream = match &config.address {
            Address::Tcp { host, port } => {
                let stream = with_deadline(
                    Some(config.connect_timeout),
                    "connect",
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await?;
                stream.set_nodelay(true)?;
                Stream::Tcp(stream)
            }
            Address::Unix(path) => connect_unix(path, config.connect_timeout).await?,
        };
        debug!("connected");

        Ok(Self::new(stream, Decoder::with_max_frame_size(config.max_frame_size))
            .with_timeouts(config.read_timeout, config.write_timeout))
    }

    /// Creates a new connection over an already open stream.
    pub fn new(stream: Stream, decoder: Decoder) -> Self {
        Self {
            stream,
            decoder,
            encoder: Encoder::new(),
            read_buf: vec![0u8; READ_CHUNK_SIZE],
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Configures read and write timeouts for this connection.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Encodes one command and writes it to the socket.
    ///
    /// On failure the returned [`WriteFailure`] says how many bytes were
    /// accepted, which decides whether the command may be retried.
    pub async fn write_command(&mut self, args: &[Bytes]) -> std::result::Result<(), WriteFailure> {
        self.encoder.encode_command(args);
        self.flush_encoder().await
    }

    /// Encodes an arbitrary frame and writes it to the socket.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.encoder.encode(frame);
        self.flush_encoder().await.map_err(Error::from)
    }

    async fn flush_encoder(&mut self) -> std::result::Result<(), WriteFailure> {
        let data = self.encoder.take();
        let mut written = 0;
        let stream = &mut self.stream;
        let write = async {
            while written < data.len() {
                let n = stream.write(&data[written..]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ));
                }
                written += n;
            }
            stream.flush().await
        };
        let result = with_deadline(self.write_timeout, "write", write).await;
        result.map_err(|error| WriteFailure { error, written })
    }

    /// Reads one complete reply frame.
    ///
    /// Keeps reading from the socket until the decoder holds a whole frame,
    /// however the bytes were split across reads.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the server closes the socket,
    /// [`Error::Timeout`] if the read timeout elapses and
    /// [`Error::Protocol`] if the bytes are not valid RESP.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                debug!(?frame, "received frame");
                return Ok(frame);
            }

            let n = with_deadline(
                self.read_timeout,
                "read",
                self.stream.read(&mut self.read_buf),
            )
            .await?;
            if n == 0 {
                let message = if self.decoder.buffered() == 0 {
                    "connection closed by server"
                } else {
                    "connection closed by server in the middle of a reply"
                };
                return Err(Error::Connection {
                    message: message.to_string(),
                });
            }
            self.decoder.append(&self.read_buf[..n]);
        }
    }

    /// Checks, without blocking, whether an idle connection is still usable.
    ///
    /// Returns false if the peer has closed or reset the socket, or if it
    /// sent bytes nobody asked for.
    pub fn is_alive(&self) -> bool {
        if self.decoder.buffered() > 0 {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.try_read(&mut probe) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }

    /// Closes only the sending side, leaving the peer connected.
    #[cfg(test)]
    pub(crate) async fn close_write_half(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Shuts the socket down.
    pub async fn shutdown(mut self) {
        if let Err(error) = self.stream.shutdown().await {
            debug!(%error, "error while shutting down socket");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation,
                duration,
            }),
        },
        None => fut.await.map_err(Error::from),
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

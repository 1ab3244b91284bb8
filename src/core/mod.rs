//! # Respite Core
//!
//! Session handling for a single RESP connection: command dispatch,
//! reconnection with session replay, and the pipeline/transaction API.
//!
//! ## Modules
//!
//! - [`connection`] - Single socket with codec and timeouts
//! - [`command`] - Command builders and reply converters
//! - [`builder`] - Client builder
//! - [`config`] - Session configuration and URL parsing
//! - [`executor`] - Command execution traits
//! - [`pipeline`] - Batch bookkeeping

#![warn(missing_docs)]

use bytes::Bytes;
use tracing::{debug, error, instrument, warn};

pub use crate::proto::error::{Error, Result};

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Session configuration.
pub mod config;
/// Low-level connection management.
pub mod connection;
/// Command execution traits.
pub mod executor;
pub mod pipeline;

use command::Cmd;
use config::{ClientConfig, Credentials};
use connection::{Connection, WriteFailure};
use pipeline::{Batch, BatchState, Expect, Reply};

use crate::proto::frame::Frame;

/// Client for one RESP server session.
///
/// Owns at most one connection. The connection is opened lazily on the
/// first command (or eagerly by [`Client::connect`]) and re-opened after a
/// failure, replaying the session's credential and selected database.
///
/// # Example
///
/// ```no_run
/// use respite::{Client, Commands};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = Client::connect("redis://localhost:6379").await?;
///     client.set("key", "value").await?;
///     let value = client.get("key").await?;
///     assert_eq!(value.as_deref(), Some(&b"value"[..]));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    connection: Option<Connection>,
    batch: Batch,
    // Set while a request is on the wire. Still set on entry means the
    // previous call was dropped mid-exchange.
    in_flight: bool,
}

impl Client {
    /// Creates a client without connecting. The first command connects.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: None,
            batch: Batch::default(),
            in_flight: false,
        }
    }

    /// Connects to the server at the given address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address such as `redis://:password@host:6379/2` or
    ///   `unix:///run/redis.sock?db=1`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the connected `Client` or an error.
    pub async fn connect<T: AsRef<str>>(addr: T) -> Result<Self> {
        let config = ClientConfig::from_url(addr.as_ref())?;
        Self::connect_with_config(config).await
    }

    /// Connects using an explicit configuration.
    pub async fn connect_with_config(config: ClientConfig) -> Result<Self> {
        let mut client = Self::new(config);
        client.open().await?;
        Ok(client)
    }

    /// The session configuration, including the current replay state.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The database that is selected now and after any reconnect.
    pub fn database(&self) -> u32 {
        self.config.database
    }

    /// Returns true if a usable socket is held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && !self.in_flight
    }

    /// Current state of the batch API.
    pub fn batch_state(&self) -> BatchState {
        self.batch.state()
    }

    /// Makes sure a live connection is held, reconnecting if needed.
    ///
    /// An idle connection is probed without blocking. If it is gone, a new
    /// one is opened and `AUTH` then `SELECT` are replayed.
    ///
    /// # Errors
    ///
    /// Connection errors from the new socket, or [`Error::Connection`] if
    /// the server rejects a replayed command. Inside a batch that already
    /// wrote commands the socket cannot be replaced, so a lost connection
    /// is reported as [`Error::Connection`].
    pub async fn ensure_connected(&mut self) -> Result<()> {
        self.recover_interrupted();
        if self.batch.has_written() {
            return match self.connection {
                Some(_) => Ok(()),
                None => Err(lost_in_batch()),
            };
        }
        self.connect_if_needed().await.map(|_| ())
    }

    /// Closes the connection. Any open batch is discarded.
    pub async fn close(&mut self) {
        self.batch.reset();
        self.in_flight = false;
        if let Some(conn) = self.connection.take() {
            conn.shutdown().await;
            debug!("connection closed");
        }
    }

    /// Sends one command and waits for its reply.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The command to send.
    ///
    /// # Errors
    ///
    /// [`Error::Server`] if the server answers with an error reply; the
    /// connection stays usable. Connection, timeout and protocol errors
    /// close the connection; the next call reconnects.
    /// [`Error::InvalidState`] while a batch is open.
    #[instrument(skip(self, cmd), fields(command = %cmd.name()), level = "debug")]
    pub async fn execute(&mut self, cmd: Cmd) -> Result<Frame> {
        self.recover_interrupted();
        if self.batch.is_open() {
            return Err(Error::invalid_state(
                "a batch is open; enqueue the command or drain the batch first",
            ));
        }
        self.write_fresh(cmd.args()).await?;
        let frame = self.read_reply().await?;
        self.in_flight = false;
        command::parse_frame_response(frame)
    }

    /// Selects the logical database for this session.
    ///
    /// The database is re-selected after every reconnect once the server
    /// has accepted it.
    ///
    /// # Arguments
    ///
    /// * `db` - The database index.
    pub async fn select(&mut self, db: u32) -> Result<()> {
        self.execute(command::select(db)).await?;
        self.config.database = db;
        Ok(())
    }

    /// Authenticates with a password and remembers it for reconnects.
    ///
    /// # Arguments
    ///
    /// * `password` - The password to use.
    pub async fn auth(&mut self, password: &str) -> Result<()> {
        self.execute(command::auth(password.to_string())).await?;
        self.config.credentials = Some(Credentials {
            username: None,
            password: password.to_string(),
        });
        Ok(())
    }

    /// Authenticates with a username and password (ACL) and remembers
    /// them for reconnects.
    ///
    /// # Arguments
    ///
    /// * `username` - The username to use.
    /// * `password` - The password to use.
    pub async fn auth_with_username(&mut self, username: &str, password: &str) -> Result<()> {
        self.execute(command::auth_with_username(
            username.to_string(),
            password.to_string(),
        ))
        .await?;
        self.config.credentials = Some(Credentials {
            username: Some(username.to_string()),
            password: password.to_string(),
        });
        Ok(())
    }

    /// Opens a pipeline. Enqueued commands are written at once and their
    /// replies are read by [`drain`](Client::drain).
    ///
    /// May be called inside an open transaction.
    pub fn begin_pipeline(&mut self) -> Result<()> {
        self.recover_interrupted();
        self.batch.begin_pipeline()
    }

    /// Starts a transaction by sending `MULTI`.
    ///
    /// Outside a pipeline the acknowledgement is read immediately.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if a transaction is already open.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.recover_interrupted();
        self.batch.check_begin_transaction()?;
        let frame = self.send_in_batch(command::multi()).await?;
        self.batch.record(Expect::Multi, frame);
        debug!(pipelined = self.batch.defers_reads(), "transaction opened");
        Ok(())
    }

    /// Adds a command to the open batch.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if no pipeline or transaction is open.
    pub async fn enqueue(&mut self, cmd: Cmd) -> Result<()> {
        self.recover_interrupted();
        self.batch.check_enqueue()?;
        let expect = self.batch.expect_for_command();
        let frame = self.send_in_batch(cmd).await?;
        self.batch.record(expect, frame);
        Ok(())
    }

    /// Sends `EXEC` for the open transaction and keeps the batch open.
    ///
    /// Outside a pipeline the reply is read immediately. Either way the
    /// transaction's results are delivered by [`drain`](Client::drain).
    pub async fn end_transaction(&mut self) -> Result<()> {
        self.recover_interrupted();
        self.batch.check_transaction_open()?;
        let exec = self.batch.exec_entry();
        let frame = self.send_in_batch(command::exec()).await?;
        self.batch.record(exec, frame);
        Ok(())
    }

    /// Sends `DISCARD` for the open transaction. Its commands produce no
    /// results, unless the server rejects the `DISCARD`: then each of them
    /// drains as that error.
    pub async fn discard(&mut self) -> Result<()> {
        self.recover_interrupted();
        self.batch.check_transaction_open()?;
        let discard = self.batch.discard_entry();
        let frame = self.send_in_batch(command::discard()).await?;
        self.batch.record(discard, frame);
        Ok(())
    }

    /// Reads back every outstanding reply of the open batch and closes it.
    ///
    /// An open transaction is executed first. The result holds one entry
    /// per enqueued command, in order, with transaction results flattened.
    ///
    /// # Errors
    ///
    /// A connection, timeout or protocol error fails the whole drain,
    /// closes the connection and resets the batch.
    #[instrument(skip(self), level = "debug")]
    pub async fn drain(&mut self) -> Result<Vec<Reply>> {
        self.recover_interrupted();
        self.batch.check_enqueue()?;
        if self.batch.in_transaction() {
            self.end_transaction().await?;
        }

        let outstanding = self.batch.outstanding();
        let mut drain = self.batch.start_drain()?;
        debug!(outstanding, "draining batch");
        self.in_flight = outstanding > 0;

        while let Some((expect, frame)) = drain.next() {
            let frame = match frame {
                Some(frame) => frame,
                None => self.read_reply().await?,
            };
            if let Err(error) = drain.accept(expect, frame) {
                self.drop_connection(&error);
                return Err(error);
            }
        }

        self.in_flight = false;
        self.batch.reset();
        Ok(drain.finish())
    }

    /// Opens a new socket and replays the session state on it.
    #[instrument(skip(self), fields(address = %self.config.address), level = "debug")]
    async fn open(&mut self) -> Result<()> {
        self.connection = None;
        self.in_flight = false;

        let mut conn = Connection::connect(&self.config).await?;
        if let Some(credentials) = &self.config.credentials {
            let cmd = match &credentials.username {
                Some(username) => {
                    command::auth_with_username(username.clone(), credentials.password.clone())
                }
                None => command::auth(credentials.password.clone()),
            };
            restore(&mut conn, cmd).await?;
        }
        if self.config.database != 0 {
            restore(&mut conn, command::select(self.config.database)).await?;
        }

        debug!(database = self.config.database, "session ready");
        self.connection = Some(conn);
        Ok(())
    }

    /// Returns true if a new connection was opened.
    async fn connect_if_needed(&mut self) -> Result<bool> {
        match self.connection.as_ref().map(Connection::is_alive) {
            Some(true) => return Ok(false),
            Some(false) => {
                warn!(address = %self.config.address, "connection lost while idle, reconnecting");
                self.connection = None;
            }
            None => {}
        }
        self.open().await?;
        Ok(true)
    }

    /// Writes a command on a connection that owes no replies. If the socket
    /// turns out to be dead before any byte left, reconnects once and
    /// writes again.
    async fn write_fresh(&mut self, args: &[Bytes]) -> Result<()> {
        let reconnected = self.connect_if_needed().await?;
        let failure = match self.write(args).await {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        if reconnected || !failure.is_retryable() {
            self.drop_connection(&failure.error);
            return Err(failure.error);
        }

        warn!(error = %failure.error, "connection dropped before the command was sent, reconnecting");
        self.open().await?;
        if let Err(failure) = self.write(args).await {
            self.drop_connection(&failure.error);
            return Err(failure.error);
        }
        Ok(())
    }

    async fn write_in_batch(&mut self, args: &[Bytes]) -> Result<()> {
        if !self.batch.has_written() {
            return self.write_fresh(args).await;
        }
        if let Err(failure) = self.write(args).await {
            self.drop_connection(&failure.error);
            return Err(failure.error);
        }
        Ok(())
    }

    /// Writes a batched command, reading its reply now unless pipelined.
    async fn send_in_batch(&mut self, cmd: Cmd) -> Result<Option<Frame>> {
        self.write_in_batch(cmd.args()).await?;
        let frame = if self.batch.defers_reads() {
            None
        } else {
            Some(self.read_reply().await?)
        };
        self.in_flight = false;
        Ok(frame)
    }

    async fn write(&mut self, args: &[Bytes]) -> std::result::Result<(), WriteFailure> {
        let conn = self.connection.as_mut().ok_or_else(|| WriteFailure {
            error: lost_in_batch(),
            written: 0,
        })?;
        self.in_flight = true;
        conn.write_command(args).await
    }

    async fn read_reply(&mut self) -> Result<Frame> {
        let result = match self.connection.as_mut() {
            Some(conn) => conn.read_frame().await,
            None => Err(lost_in_batch()),
        };
        result.map_err(|error| {
            self.drop_connection(&error);
            error
        })
    }

    fn drop_connection(&mut self, cause: &Error) {
        if matches!(cause, Error::Protocol { .. }) {
            error!(error = %cause, "protocol error, closing connection");
        } else {
            warn!(error = %cause, "closing connection");
        }
        self.connection = None;
        self.in_flight = false;
        self.batch.reset();
    }

    fn recover_interrupted(&mut self) {
        if self.in_flight {
            warn!("previous request was interrupted, discarding connection");
            self.connection = None;
            self.in_flight = false;
            self.batch.reset();
        }
    }
}

/// Replays one session command on a fresh connection.
async fn restore(conn: &mut Connection, cmd: Cmd) -> Result<()> {
    conn.write_command(cmd.args()).await?;
    match conn.read_frame().await? {
        Frame::Error(message) => Err(Error::Connection {
            message: format!(
                "{} rejected while restoring the session: {}",
                cmd.name(),
                String::from_utf8_lossy(&message)
            ),
        }),
        _ => Ok(()),
    }
}

fn lost_in_batch() -> Error {
    Error::Connection {
        message: "connection lost while a batch was open".to_string(),
    }
}

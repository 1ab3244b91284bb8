use std::time::Duration;

use crate::core::config::{ClientConfig, Credentials};
use crate::{Client, Error};

/// Builder for configuring and creating a [`Client`].
///
/// Settings given to the builder override the ones carried by the address
/// URL.
///
/// # Example
///
/// ```no_run
/// use respite::core::builder::ClientBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new()
///     .address("redis://localhost:6379")
///     .password("secret")
///     .database(2)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    address: Option<String>,
    password: Option<String>,
    username: Option<String>,
    database: Option<u32>,
    connection_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_frame_size: Option<usize>,
    lazy: bool,
}

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server address.
    ///
    /// # Arguments
    ///
    /// * `address` - `redis://[[user]:password@]host[:port][/db]`,
    ///   `unix:///path/to.sock[?db=N]` or plain `host:port`
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the password for authentication.
    ///
    /// # Arguments
    ///
    /// * `password` - Password string
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the username for ACL authentication. Only used together with a
    /// password.
    ///
    /// # Arguments
    ///
    /// * `username` - Username string
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the database to select after every connect.
    ///
    /// # Arguments
    ///
    /// * `database` - Database index
    #[inline]
    pub fn database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the connection timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for connection establishment
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout for commands.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for a response. `None` means no timeout.
    #[inline]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout for commands.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for writes. `None` means no timeout.
    #[inline]
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the largest reply frame accepted from the server.
    ///
    /// # Arguments
    ///
    /// * `size` - Size limit in bytes (default: 512 MiB)
    #[inline]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Defers connecting until the first command.
    #[inline]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Resolves the settings into a [`ClientConfig`] without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the address is missing or
    /// malformed, or if a username is given without a password.
    pub fn config(&self) -> Result<ClientConfig, Error> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument {
                message: "address is required".to_string(),
            })?;
        let mut config = ClientConfig::from_url(address)?;

        match (&self.username, &self.password) {
            (_, Some(password)) => {
                let username = self
                    .username
                    .clone()
                    .or_else(|| config.credentials.take().and_then(|c| c.username));
                config.credentials = Some(Credentials {
                    username,
                    password: password.clone(),
                });
            }
            (Some(_), None) => {
                return Err(Error::InvalidArgument {
                    message: "username requires a password".to_string(),
                })
            }
            (None, None) => {}
        }

        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(timeout) = self.connection_timeout {
            config.connect_timeout = timeout;
        }
        if self.read_timeout.is_some() {
            config.read_timeout = self.read_timeout;
        }
        if self.write_timeout.is_some() {
            config.write_timeout = self.write_timeout;
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        Ok(config)
    }

    /// Builds the [`Client`], connecting unless [`lazy`](Self::lazy) was set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if address is not set.
    /// Returns [`Error::Io`] if connection fails.
    #[inline]
    pub async fn build(self) -> Result<Client, Error> {
        let config = self.config()?;
        if self.lazy {
            return Ok(Client::new(config));
        }
        Client::connect_with_config(config).await
    }
}

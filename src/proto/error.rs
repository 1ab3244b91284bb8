use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for respite operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a RESP server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The socket could not be opened, or an I/O operation on it failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// The connection was dropped by the peer or could not be restored.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// A connect, read or write exceeded its configured deadline.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that was exceeded.
        duration: Duration,
    },

    /// The server sent bytes that are not valid RESP.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error reply.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// A transaction was discarded by the server and none of its commands ran.
    #[error("transaction aborted")]
    TransactionAborted,

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// An operation was called in a batch state that does not allow it.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the misuse.
        message: String,
    },
}

impl Error {
    /// Returns true for failures that leave the connection unusable
    /// until it is re-established.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Connection { .. } | Error::Timeout { .. }
        )
    }

    /// Returns true if the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        self.is_connection_error() || matches!(self, Error::Protocol { .. })
    }

    pub(crate) fn server(message: &[u8]) -> Self {
        Error::Server {
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }
}

/// Error returned when the decoder meets malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description of what was malformed.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Protocol {
            message: err.message,
        }
    }
}

/// Failure recorded for a single reply slot of a drained batch.
///
/// Unlike [`Error`], a `ReplyError` does not affect sibling replies or the
/// health of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The server answered this command with an error reply.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// The command belonged to a transaction that was not executed.
    #[error("transaction aborted")]
    TransactionAborted,
}

impl ReplyError {
    pub(crate) fn server(message: &[u8]) -> Self {
        ReplyError::Server {
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }
}

impl From<ReplyError> for Error {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::Server { message } => Error::Server { message },
            ReplyError::TransactionAborted => Error::TransactionAborted,
        }
    }
}

//! # Respite
//!
//! Client library for key-value servers speaking RESP2, with one persistent
//! connection per session, transparent reconnection, pipelining and
//! MULTI/EXEC transactions.
//!
//! ## Example
//!
//! ```no_run
//! use respite::{Client, Commands};
//! use respite::core::command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("redis://localhost:6379").await?;
//!     let _ = client.ping().await?;
//!
//!     client.begin_pipeline()?;
//!     client.begin_transaction().await?;
//!     client.enqueue(command::incr("a")).await?;
//!     client.enqueue(command::incr("b")).await?;
//!     let replies = client.drain().await?;
//!     assert_eq!(replies.len(), 2);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod proto;

#[cfg(test)]
mod stress;

// Re-export high-level client types for convenience
pub use crate::core::builder::ClientBuilder;
pub use crate::core::command::{Cmd, KeyType};
pub use crate::core::config::ClientConfig;
pub use crate::core::executor::{Commands, Executor};
pub use crate::core::pipeline::{BatchState, Reply};
pub use crate::core::{Client, Error, Result};
pub use crate::proto::error::ReplyError;
pub use crate::proto::frame::Frame;

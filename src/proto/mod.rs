//! # Respite Proto
//!
//! RESP2 (REdis Serialization Protocol) codec.
//! Provides encoding of requests and streaming decoding of replies.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for RESP protocol
//! - [`error`] - Error types for protocol and session operations
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;

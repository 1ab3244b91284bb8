//! RESP frame types.
//!
//! This module defines the reply values of the protocol: simple strings,
//! errors, integers, bulk strings and arrays, each of which may be nil
//! where RESP2 allows it.

/// Frame type definitions.
pub mod types;

pub use types::Frame;

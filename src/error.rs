//! # Error Types
//!
//! Error handling for the protocol core.
//!
//! This module defines every error variant that can surface from schema
//! compilation, packet (de)serialization, framing, and connection handling.
//!
//! ## Error Categories
//! - **Schema Errors**: raised while compiling a protocol definition (fatal at startup)
//! - **Codec Errors**: per-packet decode/encode failures (recoverable)
//! - **Session Errors**: `NotReady`, `TimedOut`, `Cancelled`, `ResourceExhausted`
//! - **Transport Errors**: socket failures not covered by a more specific variant
//!
//! Low-level resets and broken pipes are ordinary disconnects. Use
//! [`ProtocolError::is_disconnect`] to filter them (and `Cancelled`) out of
//! user-visible error reporting.
//!
//! ## Example Usage
//! ```rust
//! use td2d_protocol::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn require_pinned(pinned: bool) -> Result<()> {
//!     if !pinned {
//!         return Err(ProtocolError::NotReady);
//!     }
//!     Ok(())
//! }
//!
//! if let Err(e) = require_pinned(false) {
//!     error!(error = %e, "UDP send rejected");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Codec errors
    pub const ERR_BUFFER_UNDERRUN: &str = "Unexpected end of buffer";
    pub const ERR_BUFFER_OVERRUN: &str = "Output buffer too small";
    pub const ERR_FRAME_TOO_LARGE: &str = "Payload exceeds the 255 byte frame limit";

    /// Connection errors
    pub const ERR_WRITER_GONE: &str = "TCP writer task has stopped";

    /// Registry errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("UDP endpoint not known yet")]
    NotReady,

    #[error("Client id space exhausted")]
    ResourceExhausted,

    #[error("Connection timed out (no activity)")]
    TimedOut,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error is an expected teardown signal rather than a fault.
    ///
    /// Cancellation, connection resets, broken pipes and aborted sockets all
    /// count as ordinary disconnects.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Cancelled | ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Owned copy of this error. Wrapped I/O and JSON errors keep their kind and message.
    pub fn replicate(&self) -> ProtocolError {
        match self {
            ProtocolError::Io(e) => ProtocolError::Io(io::Error::new(e.kind(), e.to_string())),
            ProtocolError::Json(e) => ProtocolError::Decode(e.to_string()),
            ProtocolError::Schema(m) => ProtocolError::Schema(m.clone()),
            ProtocolError::Decode(m) => ProtocolError::Decode(m.clone()),
            ProtocolError::Encode(m) => ProtocolError::Encode(m.clone()),
            ProtocolError::NotReady => ProtocolError::NotReady,
            ProtocolError::ResourceExhausted => ProtocolError::ResourceExhausted,
            ProtocolError::TimedOut => ProtocolError::TimedOut,
            ProtocolError::Cancelled => ProtocolError::Cancelled,
            ProtocolError::TransportError(m) => ProtocolError::TransportError(m.clone()),
            ProtocolError::ConnectionClosed => ProtocolError::ConnectionClosed,
            ProtocolError::UnsupportedVersion(v) => ProtocolError::UnsupportedVersion(*v),
            ProtocolError::UnknownPacketType(n) => ProtocolError::UnknownPacketType(n.clone()),
            ProtocolError::ConfigError(m) => ProtocolError::ConfigError(m.clone()),
        }
    }

    /// Whether this error came from the codec layer (schema-driven decode/encode).
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            ProtocolError::Decode(_) | ProtocolError::Encode(_) | ProtocolError::UnknownPacketType(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

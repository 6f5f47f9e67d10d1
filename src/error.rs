//! Error types and result handling for cdc-capture.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use cdc_capture::{Error, Result};
//!
//! fn read_header(buf: &[u8]) -> Result<()> {
//!     if buf.len() < 19 {
//!         return Err(Error::TruncatedStream { needed: 19, available: buf.len() });
//!     }
//!     Ok(())
//! }
//!
//! match read_header(&[0u8; 4]) {
//!     Ok(()) => println!("Header present"),
//!     Err(Error::TruncatedStream { needed, .. }) => eprintln!("Need {} bytes", needed),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for cdc-capture operations.
///
/// Protocol variants are raised by the binlog codec and always reach the
/// caller. Extraction variants are raised inside a polling run and are
/// converted into an error event at the run boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer bytes remain than a field's declared width.
    #[error("Truncated stream: needed {needed} bytes, {available} available")]
    TruncatedStream {
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Binlog event type code outside the supported catalog.
    #[error("Unknown binlog event type: {0}")]
    UnknownEventType(u8),

    /// Query event status variable code outside the supported catalog.
    #[error("Unknown status variable code: {0}")]
    UnknownStatusVariable(u8),

    /// A decoder finished with bytes left over in a fixed-size body.
    #[error("Corrupt {context}: {remaining} trailing bytes")]
    TrailingBytes {
        /// What was being decoded
        context: &'static str,
        /// Bytes left unconsumed
        remaining: usize,
    },

    /// Column type with no row image decoder.
    #[error("Unsupported column type: {0}")]
    UnsupportedColumnType(u8),

    /// Rows event for a table id without a preceding table map.
    #[error("Rows event references unknown table id {0}")]
    UnknownTable(u64),

    /// Invalid or malformed protocol message.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// A watermark marker literal occurs more than once in a template.
    #[error("Watermark marker {marker} appears {count} times in command")]
    AmbiguousMarker {
        /// The marker literal
        marker: String,
        /// Number of occurrences found
        count: usize,
    },

    /// A stored checkpoint cannot be used for its marker.
    #[error("Invalid checkpoint {key}={value:?}: {reason}")]
    MissingCheckpointPrerequisite {
        /// Position key
        key: String,
        /// Stored value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The row reader failed while executing a resolved command.
    #[error("Extraction failed for command {command}: {source}")]
    ExtractionExecution {
        /// Index of the command in the listener configuration
        command: usize,
        /// Underlying reader failure
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error when encoding events or positions.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from the byte stream or the position file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The binlog server answered with an error packet.
    #[error("Server error {code}: {message}")]
    Server {
        /// MySQL error code
        code: u16,
        /// Server supplied message
        message: String,
    },
}

impl Error {
    /// True for errors raised while decoding the replication stream.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::TruncatedStream { .. }
                | Error::UnknownEventType(_)
                | Error::UnknownStatusVariable(_)
                | Error::TrailingBytes { .. }
                | Error::UnsupportedColumnType(_)
                | Error::UnknownTable(_)
                | Error::InvalidMessage { .. }
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// A convenient Result type alias for cdc-capture operations.
///
/// This is equivalent to `std::result::Result<T, cdc_capture::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

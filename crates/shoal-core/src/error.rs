//! Error types for Shoal

use thiserror::Error;

/// Core Shoal errors
#[derive(Error, Debug)]
pub enum ShoalError {
    // Wire errors
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Field key is not valid UTF-8")]
    InvalidFieldKey,

    #[error("Trailing bytes after record: {0}")]
    TrailingBytes(usize),

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend replied with error: {0}")]
    Backend(String),

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },

    // Write errors
    #[error("Field name {0:?} is reserved")]
    ReservedField(String),

    // Reader errors
    #[error("Reader not found: {0}")]
    ReaderNotFound(u64),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for Shoal operations
pub type ShoalResult<T> = Result<T, ShoalError>;

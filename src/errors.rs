use thiserror::Error;

use crate::protocol::ValueKind;

/// Failure of `MessageDispatcher::send_message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// There is no established connection to write to. Callers decide
    /// whether to retry, queue or drop the request.
    #[error("not connected")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Codec(#[from] CodecError),
}

/// Failure of a strict `Message` accessor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field `{0}` is missing")]
    Missing(String),
    #[error("field `{field}` holds {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Errors produced while encoding or decoding the binary message format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },
    #[error("unknown field type {0}")]
    UnknownType(u8),
    #[error("integer field `{0}` is longer than 8 bytes")]
    IntegerTooLong(String),
    #[error("string field `{0}` is not valid utf-8")]
    InvalidString(String),
    #[error("field name is longer than 255 bytes: {0}")]
    NameTooLong(String),
    #[error("payload of `{0}` does not fit into a frame")]
    PayloadTooLarge(String),
    #[error("frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),
}

/// Outcome of a failed `Connection::connect` attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("failed to connect to {addr}: {reason}")]
    Transport { addr: String, reason: String },
    #[error("timed out connecting to {0}")]
    Timeout(String),
    /// The connection has failed before and must be rebuilt.
    #[error("connection has failed")]
    Failed,
    #[error("connection closed")]
    Closed,
}

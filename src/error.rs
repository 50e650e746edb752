//! Error types for protolite.
//!
//! Decode errors are local and never leave a half-built message behind.
//! Connection-level failures are not errors at all from the caller's point
//! of view: they surface as an [`ErrorCode`] through the registered error
//! handler and as failed (message-less) completions of pending calls.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::codec::WireType;

/// Failure while unpacking a message from wire bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A varint ran past the end of the input or past 10 bytes.
    #[error("unterminated varint at offset {offset}")]
    UnterminatedVarint { offset: usize },

    /// A fixed-width value was cut short.
    #[error("truncated {wire_type:?} value at offset {offset}")]
    Truncated { wire_type: WireType, offset: usize },

    /// Length prefix larger than the bytes remaining.
    #[error("length prefix {len} exceeds remaining {remaining} bytes at offset {offset}")]
    LengthOverflow {
        len: usize,
        remaining: usize,
        offset: usize,
    },

    /// Field number 0 or a tag wider than 32 bits.
    #[error("invalid tag at offset {offset}")]
    InvalidTag { offset: usize },

    /// Groups and wire types 6/7 are not supported.
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),

    /// Known field encoded with a wire type its declared type cannot use.
    #[error("field '{field}' cannot be encoded with wire type {wire_type:?}")]
    WireTypeMismatch {
        field: &'static str,
        wire_type: WireType,
    },

    /// Packed payload length does not divide into whole elements.
    #[error("bad packed payload for field '{field}'")]
    BadPackedPayload { field: &'static str },

    /// A required field without a default never appeared.
    #[error("required field '{field}' missing in '{message}'")]
    MissingRequired {
        message: &'static str,
        field: &'static str,
    },

    /// String field holding bytes that are not UTF-8.
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Sub-messages nested deeper than the decoder allows.
    #[error("message nesting exceeds {0} levels")]
    RecursionLimit(usize),

    /// Reserving a repeated field array failed.
    #[error("out of memory reserving {count} elements for field '{field}'")]
    OutOfMemory { field: &'static str, count: usize },
}

/// Misuse of the dynamic message accessors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message '{message}' has no field '{field}'")]
    NoSuchField { message: &'static str, field: String },

    #[error("field '{field}' expects {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{0}' is repeated")]
    Repeated(&'static str),

    #[error("field '{0}' is not repeated")]
    NotRepeated(&'static str),
}

/// Failure inside a frame protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message failed `is_initialized` (required fields unset).
    #[error("message '{0}' is missing required fields")]
    Uninitialized(&'static str),

    /// Header names a method the service does not have.
    #[error("bad method_index {0}")]
    BadMethod(u32),

    /// Response names a request id that is not outstanding.
    #[error("bad request-id {0} in response")]
    BadRequestId(u32),

    /// Status code outside the known set.
    #[error("unknown status code {0}")]
    BadStatus(u32),

    /// Failure response that still carries a payload.
    #[error("status {status} response carries {len} payload bytes")]
    UnexpectedPayload { status: u32, len: u32 },

    #[error("payload decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Construction and configuration failures of clients and servers.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// `Responder::detach` on a server without `configure_threading`.
    #[error("thread proxying is not configured")]
    ThreadingNotConfigured,

    /// The reactor side of a proxy channel is gone.
    #[error("proxy channel closed")]
    ProxyClosed,
}

/// Code passed to client/server error handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    HostNotFound,
    ConnectionRefused,
    ClientTerminated,
    BadRequest,
    ProxyProblem,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::HostNotFound => "host not found",
            ErrorCode::ConnectionRefused => "connection refused",
            ErrorCode::ClientTerminated => "client terminated",
            ErrorCode::BadRequest => "bad request",
            ErrorCode::ProxyProblem => "proxy problem",
        };
        f.write_str(s)
    }
}

/// Result type alias for fallible RPC setup.
pub type Result<T> = std::result::Result<T, RpcError>;

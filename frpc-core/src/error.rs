//! Error types for frpc
//!
//! Two layers of errors exist:
//!
//! - **Error**: the local error enum returned by every fallible frpc operation
//! - **ApplicationException**: the exception envelope that crosses the wire
//!   inside an `EXCEPTION` message
//!
//! # Propagation
//!
//! Per-call failures (`Timeout`, `RateLimit`, `RemoteApplication`) only ever
//! reach the caller that issued the call. Framing failures (`Decode`,
//! `UnknownMethod`) are fatal to the connection they occurred on, see
//! [`Error::is_connection_fatal`].
//!
//! # Examples
//!
//! ```rust
//! use frpc_core::{ApplicationException, Error, ExceptionKind};
//! use frpc_core::error::exception_code;
//!
//! let envelope = ApplicationException::new(exception_code::RATE_LIMIT_EXCEEDED, "slow down");
//! assert_eq!(envelope.kind(), ExceptionKind::DeclaredDomain);
//!
//! let error = Error::RemoteApplication(ApplicationException::unknown("boom"));
//! assert!(!error.is_connection_fatal());
//! ```

use crate::protocol::{ProtocolReader, ProtocolWriter, TType};
use std::time::Duration;
use thiserror::Error;

/// Result type for frpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reserved exception codes carried in [`ApplicationException::code`]
pub mod exception_code {
    pub const UNKNOWN: i32 = 0;
    pub const UNKNOWN_METHOD: i32 = 1;
    pub const INVALID_MESSAGE_TYPE: i32 = 2;
    pub const WRONG_METHOD_NAME: i32 = 3;
    pub const BAD_SEQUENCE_ID: i32 = 4;
    pub const MISSING_RESULT: i32 = 5;
    pub const INTERNAL_ERROR: i32 = 6;
    pub const PROTOCOL_ERROR: i32 = 7;
    pub const RESPONSE_TOO_LARGE: i32 = 100;
    /// Declared domain exception signalling that the caller is being throttled
    pub const RATE_LIMIT_EXCEEDED: i32 = 102;
}

/// Message used in generic exception envelopes when the failure carried none
pub const UNKNOWN_EXCEPTION_MESSAGE: &str = "unknown exception";

/// Application-level error type for frpc operations
///
/// # Error Categories
///
/// - **Per-call**: Timeout, RateLimit, RemoteApplication, Handler, AlreadyRegistered
/// - **Connection-level**: UnknownMethod, Decode, WebSocket, Io, ConnectionClosed
/// - **Local**: RequestTooLarge, Internal
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The call exceeded its deadline before a reply arrived
    ///
    /// Raised on the client only. The server may still be working on the
    /// call; its eventual reply is dropped by the correlation registry.
    #[error("{method} timed out after {millis} milliseconds", millis = .timeout.as_millis())]
    Timeout {
        /// Name of the method that timed out
        method: String,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// Declared rate-limit exception
    ///
    /// Raised by a handler to throttle the caller. It round-trips over the
    /// wire with [`exception_code::RATE_LIMIT_EXCEEDED`] and is recoverable.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Any other exception envelope received from the remote peer
    #[error("Remote application error: {0}")]
    RemoteApplication(ApplicationException),

    /// Inbound call named a method missing from the dispatch table
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Malformed frame
    #[error("Decode error: {0}")]
    Decode(String),

    /// Generic failure raised by a handler or middleware
    #[error("Handler error: {0}")]
    Handler(String),

    /// A call with the same op id is still pending on the transport
    ///
    /// Happens when one [`CallContext`](crate::CallContext) is reused for
    /// concurrent calls. The pending call is left untouched.
    #[error("Context already registered: op id {0}")]
    AlreadyRegistered(u64),

    /// Encoded request exceeded the transport's size limit
    #[error("Request too large: limit={limit}, actual={actual}")]
    RequestTooLarge {
        /// The transport's configured limit in bytes
        limit: usize,
        /// Size of the rejected request in bytes
        actual: usize,
    },

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Input/output error
    #[error("IO error: {0}")]
    Io(String),

    /// The connection is no longer active
    #[error("Connection closed")]
    ConnectionClosed,

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a generic handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// Create a declared rate-limit exception
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Error::RateLimit(message.into())
    }

    /// Whether this error must tear down the connection it occurred on
    ///
    /// Framing failures leave the byte stream in an unknown state, so they
    /// are never retried on the same connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownMethod(_)
                | Error::Decode(_)
                | Error::WebSocket(_)
                | Error::Io(_)
                | Error::ConnectionClosed
        )
    }

    /// Low-cardinality label used by metrics
    pub fn label(&self) -> &'static str {
        match self {
            Error::Timeout { .. } => "timeout",
            Error::RateLimit(_) => "rate_limit",
            Error::RemoteApplication(_) => "remote_application",
            Error::UnknownMethod(_) => "unknown_method",
            Error::Decode(_) => "decode",
            Error::Handler(_) => "handler",
            Error::AlreadyRegistered(_) => "already_registered",
            Error::RequestTooLarge { .. } => "request_too_large",
            Error::WebSocket(_) | Error::Io(_) | Error::ConnectionClosed => "connection",
            Error::Internal(_) => "internal",
        }
    }

    /// Best-effort message for a generic exception envelope
    ///
    /// Handler failures contribute their own message, everything else its
    /// display form. Falls back to [`UNKNOWN_EXCEPTION_MESSAGE`] when empty.
    pub fn wire_message(&self) -> String {
        let message = match self {
            Error::Handler(message) | Error::RateLimit(message) => message.clone(),
            Error::RemoteApplication(envelope) => envelope.message.clone(),
            other => other.to_string(),
        };
        if message.is_empty() {
            UNKNOWN_EXCEPTION_MESSAGE.to_string()
        } else {
            message
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Classification of an exception envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Exception type known to both schemas, carried with a reserved code
    DeclaredDomain,
    /// Any other application failure
    GenericApplication,
}

/// Exception envelope carried inside an `EXCEPTION` message
///
/// Encoded as a struct with field 1 `message: string` and field 2
/// `type: i32`. Unknown fields are skipped on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    /// One of the [`exception_code`] values
    pub code: i32,
    /// Human-readable description
    pub message: String,
}

impl ApplicationException {
    const MESSAGE_FIELD: i16 = 1;
    const TYPE_FIELD: i16 = 2;

    /// Create a new envelope
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a generic envelope with [`exception_code::UNKNOWN`]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(exception_code::UNKNOWN, message)
    }

    /// Create the envelope sent for a method missing from the dispatch table
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            exception_code::UNKNOWN_METHOD,
            format!("Unknown function: {}", method),
        )
    }

    /// Classify the envelope by its code
    pub fn kind(&self) -> ExceptionKind {
        if self.code == exception_code::RATE_LIMIT_EXCEEDED {
            ExceptionKind::DeclaredDomain
        } else {
            ExceptionKind::GenericApplication
        }
    }

    /// Map the envelope onto the local error taxonomy
    pub fn into_error(self) -> Error {
        match self.kind() {
            ExceptionKind::DeclaredDomain => Error::RateLimit(self.message),
            ExceptionKind::GenericApplication => Error::RemoteApplication(self),
        }
    }

    /// Write the envelope as a struct
    pub fn encode(&self, oprot: &mut dyn ProtocolWriter) -> Result<()> {
        oprot.write_struct_begin("TApplicationException")?;
        oprot.write_field_begin(TType::String, Self::MESSAGE_FIELD)?;
        oprot.write_string(&self.message)?;
        oprot.write_field_end()?;
        oprot.write_field_begin(TType::I32, Self::TYPE_FIELD)?;
        oprot.write_i32(self.code)?;
        oprot.write_field_end()?;
        oprot.write_field_stop()?;
        oprot.write_struct_end()
    }

    /// Read the envelope from a struct
    pub fn decode(iprot: &mut dyn ProtocolReader) -> Result<Self> {
        let mut envelope = Self::unknown("");
        iprot.read_struct_begin()?;
        loop {
            let field = iprot.read_field_begin()?;
            match (field.field_type, field.id) {
                (TType::Stop, _) => break,
                (TType::String, Self::MESSAGE_FIELD) => envelope.message = iprot.read_string()?,
                (TType::I32, Self::TYPE_FIELD) => envelope.code = iprot.read_i32()?,
                (other, _) => crate::protocol::skip(iprot, other)?,
            }
            iprot.read_field_end()?;
        }
        iprot.read_struct_end()?;
        Ok(envelope)
    }
}

impl std::fmt::Display for ApplicationException {
    /// Formats as "[code] message"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApplicationException {}

//! Driver error taxonomy.
//!
//! Mirrors the DB-API error hierarchy as a single tagged enum: callers match
//! on variants instead of catching subclasses. Server ERROR frames surface as
//! [`CqlError::Operational`] with the 4-byte server code; every other variant
//! reports code `-1`.

use std::io;
use thiserror::Error;

/// Result type for all driver operations.
pub type CqlResult<T> = Result<T, CqlError>;

/// Driver errors.
#[derive(Error, Debug)]
pub enum CqlError {
    /// Client-side misuse of the driver interface (bad configuration,
    /// missing credentials, malformed input).
    #[error("interface error: {0}")]
    Interface(String),

    /// Error reported by the server in an ERROR frame.
    #[error("operational error {code:#06x}: {message}")]
    Operational {
        /// 4-byte server error code.
        code: i32,
        /// Server-supplied message.
        message: String,
    },

    /// Programming error, e.g. using a cursor after its connection closed.
    #[error("programming error: {0}")]
    Programming(String),

    /// Relational integrity violation.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A value on the wire could not be represented natively.
    #[error("data error: {0}")]
    Data(String),

    /// Protocol violation or internal inconsistency; the connection is no
    /// longer usable.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wire construct the driver does not implement.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Transport failure (closed socket, short read). Never retried.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CqlError {
    /// Client interface error.
    pub fn interface(msg: impl Into<String>) -> Self {
        Self::Interface(msg.into())
    }

    /// Server-side operational error.
    pub fn operational(code: i32, message: impl Into<String>) -> Self {
        Self::Operational {
            code,
            message: message.into(),
        }
    }

    /// Programming error.
    pub fn programming(msg: impl Into<String>) -> Self {
        Self::Programming(msg.into())
    }

    /// Data conversion error.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Protocol violation.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Unsupported wire construct.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// The standard "cursor outlived its connection" error.
    pub fn lost_connection() -> Self {
        Self::Programming("Lost connection".to_string())
    }

    /// Error code: the server code for [`CqlError::Operational`], `-1` for
    /// everything else.
    pub fn code(&self) -> i32 {
        match self {
            Self::Operational { code, .. } => *code,
            _ => -1,
        }
    }

    /// True for errors raised by the server rather than the client.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::Operational { .. }
                | Self::Programming(_)
                | Self::Integrity(_)
                | Self::Data(_)
                | Self::Internal(_)
                | Self::NotSupported(_)
        )
    }

    /// True for transport-level failures.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operational_carries_server_code() {
        let err = CqlError::operational(0x2200, "bad syntax");
        assert_eq!(err.code(), 0x2200);
        assert!(err.to_string().contains("bad syntax"));
    }

    #[test]
    fn test_non_operational_code_is_minus_one() {
        assert_eq!(CqlError::programming("oops").code(), -1);
        assert_eq!(CqlError::interface("oops").code(), -1);
        assert_eq!(CqlError::not_supported("custom type").code(), -1);
    }

    #[test]
    fn test_lost_connection_message() {
        let err = CqlError::lost_connection();
        assert!(matches!(&err, CqlError::Programming(m) if m == "Lost connection"));
    }

    #[test]
    fn test_classification() {
        assert!(CqlError::operational(0, "x").is_database_error());
        assert!(!CqlError::interface("x").is_database_error());

        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "closed");
        let err: CqlError = io_err.into();
        assert!(err.is_io_error());
        assert!(!err.is_database_error());
    }
}

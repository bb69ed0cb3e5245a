//! Crate-level error types.

use std::error::Error as StdError;
use std::io;

/// Crate-level error type.
///
/// Request outcomes are reported as [`RequestOutcome`](crate::RequestOutcome)
/// values; this type covers the failures of the operations underneath them
/// (socket I/O, malformed device replies, invalid parameters).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device could not be reached, or the connection broke.
    #[error("connection error: {context}: {source}")]
    Connection {
        context: String,
        #[source]
        source: io::Error,
    },

    /// An HTTP exchange with the command interface failed.
    #[error("http error: {context}: {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The device did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The device answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device understood the request and refused it.
    #[error("device error {code}: {text}")]
    Device { code: i32, text: String },

    /// A parameter batch failed validation before submission.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// An error with context describing what operation failed.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    /// Wrap an I/O error, classifying socket timeouts as [`Error::Timeout`].
    pub fn connection(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if matches!(
            source.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ) {
            return Self::Timeout(context);
        }
        Self::Connection { context, source }
    }

    /// Wrap an HTTP client error, classifying timeouts as [`Error::Timeout`].
    pub fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        let context = context.into();
        if source.is_timeout() {
            return Self::Timeout(context);
        }
        Self::Http { context, source }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid-parameters error.
    pub fn invalid_parameters(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Create an error with context wrapping another error.
    pub fn context(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true if the device rejected the request.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device { .. })
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_is_classified_as_timeout() {
        let err = Error::connection(
            "reading reply",
            io::Error::new(io::ErrorKind::TimedOut, "slow"),
        );
        assert!(err.is_timeout());

        let err = Error::connection(
            "reading reply",
            io::Error::new(io::ErrorKind::WouldBlock, "slow"),
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_io_failure_keeps_source() {
        let err = Error::connection(
            "connecting to 10.0.0.5:80",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(!err.is_timeout());
        assert!(StdError::source(&err).is_some());
        assert!(err.to_string().contains("10.0.0.5:80"));
    }

    #[test]
    fn test_device_error_display() {
        let err = Error::Device {
            code: 110,
            text: "invalid parameter value".to_string(),
        };
        assert!(err.is_device_error());
        assert_eq!(err.to_string(), "device error 110: invalid parameter value");
    }
}

//! Error handling for sensorgraph
//!
//! This module defines the error taxonomy shared by the route builder, the
//! realizer and the log reconciler, plus a Result alias for use throughout
//! the crate.
//!
//! Propagation rules:
//!
//! - Builder errors ([`Error::IllegalRouteOperation`]) abort the current
//!   builder expression only; nothing has been sent to the device.
//! - Realization errors ([`Error::DeviceTimeout`], [`Error::ConnectionLost`])
//!   abort one `realize` call after it rolled back its own stages.
//! - Decode errors are per sample and never terminate a subscription.

use thiserror::Error;

/// Main error type for sensorgraph operations
#[derive(Error, Debug)]
pub enum Error {
    /// A route builder precondition was violated. Never reaches the device.
    #[error("Illegal route operation: {0}")]
    IllegalRouteOperation(String),

    /// Type inference met a processor configuration it cannot describe
    #[error("Unsupported transform for processor config [{config}]")]
    UnsupportedTransform { config: String },

    /// A signal's module/register pair has no known name
    #[error("Unidentifiable signal at module 0x{module:02x}, register 0x{register:02x}")]
    UnidentifiableSignal { module: u8, register: u8 },

    /// A single outstanding request exceeded its deadline
    #[error("Timeout after {timeout_ms}ms waiting for {request}")]
    DeviceTimeout { request: String, timeout_ms: u64 },

    /// The transport disconnected while a request was outstanding
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A payload was too short or malformed for the node decoding it
    #[error("Decode error: expected {expected} bytes, got {actual}")]
    DecodeError { expected: usize, actual: usize },

    /// A log record referenced an id with no registered consumer
    #[error("Unknown log entry id {0}")]
    UnknownLogEntry(u8),

    /// A log consumer exists but nothing subscribed to its data
    #[error("Unhandled log data for id {0}")]
    UnhandledLogData(u8),

    /// The device replied with bytes that do not match the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The command sink refused a write
    #[error("Transport error: {0}")]
    Transport(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a builder precondition failure
    pub fn illegal(reason: impl Into<String>) -> Self {
        Error::IllegalRouteOperation(reason.into())
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error (or its root) is a device timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::DeviceTimeout { .. })
    }
}

/// Result type alias for sensorgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::illegal("cannot apply math to a null-length signal");
        assert_eq!(
            err.to_string(),
            "Illegal route operation: cannot apply math to a null-length signal"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::DeviceTimeout {
            request: "processor create".to_string(),
            timeout_ms: 250,
        };
        let with_ctx = err.with_context("Failed to realize route");
        assert!(with_ctx.to_string().contains("Failed to realize route"));
        assert!(with_ctx.is_timeout());
    }

    #[test]
    fn test_unidentifiable_signal_display() {
        let err = Error::UnidentifiableSignal {
            module: 0x2a,
            register: 0x01,
        };
        assert!(err.to_string().contains("0x2a"));
    }
}

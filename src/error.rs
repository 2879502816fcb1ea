// Error types for certsentry
//
// Three families of failure are kept apart:
// - `Error`: process-level faults (configuration, templates, mail, I/O) that
//   are reported once for the whole run.
// - `RetrievalError`: a certificate could not be obtained at all (execution
//   error). Recorded on the check, never aborts the run.
// - `VerificationError`: a certificate was obtained but fails a policy rule.
//
// Retrieval and verification errors are `Clone + PartialEq` because a single
// cached outcome is handed to every requester of the same target.

use crate::starttls::{NegotiationStep, StarttlsProtocol};
use chrono::{DateTime, Utc};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Process-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// One or more lines of the check configuration are invalid
    #[error("Invalid configuration:\n{}", errors.join("\n"))]
    Config { errors: Vec<String> },

    /// Generic I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// File could not be read
    #[error("File system error: {path}: {source}")]
    FileSystem {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Run settings file could not be parsed
    #[error("Invalid settings file: {0}")]
    Settings(#[from] toml::de::Error),

    /// Run settings could not be serialized
    #[error("Settings serialization error: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),

    /// Mail template could not be compiled
    #[error("Mail template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    /// Mail template could not be rendered
    #[error("Mail template render error: {0}")]
    Render(#[from] handlebars::RenderError),

    /// Mail could not be built or delivered
    #[error("Email error: {message}")]
    Mail { message: String },

    /// Background task failed
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type for certsentry operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a configuration error from a single message
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            errors: vec![message.into()],
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal {
            message: format!("Task join error: {}", err),
        }
    }
}

impl From<lettre::address::AddressError> for Error {
    fn from(err: lettre::address::AddressError) -> Self {
        Error::Mail {
            message: format!("address: {}", err),
        }
    }
}

impl From<lettre::error::Error> for Error {
    fn from(err: lettre::error::Error) -> Self {
        Error::Mail {
            message: err.to_string(),
        }
    }
}

impl From<lettre::transport::smtp::Error> for Error {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Error::Mail {
            message: format!("SMTP: {}", err),
        }
    }
}

/// Failure to obtain certificate data (execution error)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// TCP connection could not be established
    #[error("connection to {addr} failed: {details}")]
    Connect { addr: String, details: String },

    /// SOCKS5 proxy refused or failed the tunnel
    #[error("SOCKS5 proxy {proxy} failed: {details}")]
    Proxy { proxy: String, details: String },

    /// The retrieval did not finish within the per-check timeout
    #[error("timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Read/write failure on an established connection
    #[error("I/O error: {details}")]
    Io { details: String },

    /// STARTTLS negotiation deviated from the expected sequence
    #[error("{protocol} STARTTLS negotiation failed at {step}: {details}")]
    Negotiation {
        protocol: StarttlsProtocol,
        step: NegotiationStep,
        details: String,
    },

    /// A protocol line exceeded the per-line byte budget
    #[error("protocol line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// Peer closed the connection in the middle of a protocol exchange
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// TLS handshake failed
    #[error("TLS handshake failed: {details}")]
    Handshake { details: String },

    /// No (single, header-less) certificate could be found
    #[error("no certificate")]
    NoCertificate,

    /// External command failed or could not be started
    #[error("command `{command}` failed: {details}")]
    Command { command: String, details: String },

    /// The check target cannot be used for this protocol
    #[error("invalid target: {details}")]
    InvalidTarget { details: String },

    /// The retrieval task ended without producing a result
    #[error("retrieval aborted")]
    Aborted,
}

impl From<io::Error> for RetrievalError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => RetrievalError::ConnectionClosed,
            _ => RetrievalError::Io {
                details: err.to_string(),
            },
        }
    }
}

/// Policy failure on a certificate that was retrieved successfully
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Chain does not lead to a trusted root (or is otherwise invalid)
    #[error("certificate not trusted: {reason}")]
    Untrusted { reason: String },

    /// Certificate is not valid for the checked hostname
    #[error("certificate is not valid for {hostname}")]
    HostnameMismatch { hostname: String },

    /// Returned hash differs from the configured one
    #[error("Hash does not match")]
    HashMismatch,

    /// Certificate expires within the configured deadline
    #[error("Expiration warning")]
    ExpiryWarning { expires: DateTime<Utc> },
}

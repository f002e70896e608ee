//! Crate-wide error taxonomy (spec §7).
//!
//! Each subsystem raises its own narrow error type; [`Error`] is the
//! umbrella every public, fallible API ultimately returns.

use crate::si;
use thiserror::Error;

/// A fault's protocol-native shape: a code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Reserved code for "no procedure bound to this method name".
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Generic application-defined code used when user code doesn't supply one.
    pub const APPLICATION_ERROR: i32 = -32500;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol parse error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Serialization(#[from] si::SiError),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invocation fault: {0:?}")]
    Invocation(Fault),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("TLS certificate was not accepted")]
    SslCertificateNotAccepted,

    #[error("system error: {0}")]
    System(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl Error {
    /// Collapse this error into its protocol-native fault representation,
    /// per spec §7 ("on the server they are converted to a fault reply").
    pub fn to_fault(&self) -> Fault {
        match self {
            Error::MethodNotFound(name) => {
                Fault::new(Fault::METHOD_NOT_FOUND, format!("method not found: {name}"))
            }
            Error::Invocation(f) => f.clone(),
            Error::Serialization(e) => Fault::new(Fault::APPLICATION_ERROR, e.to_string()),
            other => Fault::new(Fault::APPLICATION_ERROR, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

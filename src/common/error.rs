//! Crate-wide error type and the error-code -> HTTP status mapping.

use std::io;
use thiserror::Error;

/// Library error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A policy callback failure, optionally carrying the status it asked to be reported with
    /// (spec §4.6: "Policy-callback throw with explicit status attached -> that status").
    #[error("Policy callback error: {message}")]
    Policy { message: String, status: Option<u16> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Error::Dns(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::Auth(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn address<S: Into<String>>(msg: S) -> Self {
        Error::Address(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    pub fn policy<S: Into<String>>(msg: S) -> Self {
        Error::Policy { message: msg.into(), status: None }
    }

    pub fn policy_with_status<S: Into<String>>(msg: S, status: u16) -> Self {
        Error::Policy { message: msg.into(), status: Some(status) }
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Maps an error to the HTTP status the dispatcher should synthesize when it occurs before
    /// any response bytes have been written to the client. See spec §4.6.
    pub fn status(&self) -> u16 {
        match self {
            Error::Dns(_) => 404,
            Error::Connection(_) => 502,
            Error::Timeout(_) => 504,
            Error::Tls(_) => 599,
            Error::Protocol(_) => 502,
            Error::Auth(_) => 407,
            Error::Config(_) | Error::Address(_) | Error::Unsupported(_) => 500,
            Error::Policy { status, .. } => status.unwrap_or(500),
            Error::Parse(_) => 400,
            Error::Io(_) | Error::Internal(_) => 500,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for filemesh

use thiserror::Error;

use crate::protocol::frame::FrameError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // === Wire Errors ===
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid client id: {0}")]
    InvalidClientId(String),

    // === Storage Errors ===
    #[error("{0}")]
    Store(String),

    #[cfg(feature = "sled-backend")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    // === Routing Errors ===
    #[error("No backends configured")]
    NoBackends,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An `ERROR` line from the other end
    #[error("{0}")]
    Remote(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that end a single connection without affecting anything else
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::Frame(_)
                | Error::Handshake(_)
                | Error::Timeout(_)
        )
    }
}

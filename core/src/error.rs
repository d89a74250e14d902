//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Lookup miss on an operation that cannot return `None` (e.g. connecting
    /// to a service that was never discovered).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("address resolution for '{0}' timed out")]
    ResolutionTimeout(String),

    #[error("connection to '{service}' failed: {reason}")]
    ConnectFailed { service: String, reason: String },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("connection attempt to '{0}' was cancelled")]
    Cancelled(String),

    #[error("note number {0} is outside 0..=127")]
    OutOfRange(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

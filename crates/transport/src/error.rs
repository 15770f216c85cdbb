//! Transport Error Types

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A transport error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote resource does not exist.
    #[display("resource not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The remote answered, but not with success.
    #[display("unexpected status {_1} from {_0}")]
    Status(#[error(not(source))] String, #[error(not(source))] u16),
    /// Connection, TLS or protocol failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// No configured transport handles this kind of URL.
    #[display("unsupported URL scheme: {_0}")]
    UnsupportedScheme(#[error(not(source))] String),
    /// The transport itself could not be configured.
    #[display("invalid transport configuration: {_0}")]
    Configuration(#[error(not(source))] String),
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Status(_, code) => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

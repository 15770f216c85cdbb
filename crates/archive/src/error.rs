//! Archive Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Data is corrupt or truncated. Fetching it again might help, reading it
    /// again won't.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// The file is neither an archive nor compressed; there is nothing to unpack.
    #[display("not an archive: {}", _0.display())]
    NotAnArchive(#[error(not(source))] PathBuf),
    /// An archive entry would be written outside of the destination directory.
    #[display("unsafe archive entry: {}", _0.display())]
    UnsafeEntry(#[error(not(source))] PathBuf),
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

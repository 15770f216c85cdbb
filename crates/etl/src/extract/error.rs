//! Error types for the [`extract`](super) module.
//!
//! These describe why a single cached file could not be brought up to date.
//! The extractor collects them and carries on with the next file.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A per-file extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for per-file extraction.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an extraction failure.
///
/// ### Operational Errors
/// - [`ErrorKind::Configuration`]
/// - [`ErrorKind::MissingExpectedFile`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Fetch`]
/// - [`ErrorKind::Write`]
/// - [`ErrorKind::Unpack`]
/// - [`ErrorKind::Store`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cached file's records do not describe something fetchable.
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// Probing or transferring the remote resource failed. The recorded
    /// fingerprint is untouched.
    #[display("failed to fetch {_0}")]
    Fetch(#[error(not(source))] String),
    /// The fetched bytes could not be written to disk.
    #[display("failed to write {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    #[display("failed to unpack {}", _0.display())]
    Unpack(#[error(not(source))] PathBuf),
    /// A declared expected file was not produced by the fetch.
    #[display("expected file is missing: {}", _0.display())]
    MissingExpectedFile(#[error(not(source))] PathBuf),
    #[display("resource store error")]
    Store,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Fetch(_) | ErrorKind::Write(_) | ErrorKind::Store)
    }
}

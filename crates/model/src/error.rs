//! Model Error Types
//!
//! Every error raised by this crate is a configuration error: the model was
//! asked to hold something that breaks one of its structural invariants.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A model error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// API names are the lookup key, they cannot be blank.
    #[display("API name must not be empty")]
    EmptyName,
    #[display("source base location must not be empty")]
    EmptyBaseUrl,
    #[display("source data directory must not be empty")]
    EmptyDataDir,
    /// The string could not be parsed (or joined) as a URL.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Cached file URLs are always relative to their source.
    #[display("URL must be relative to its source: {_0}")]
    AbsoluteUrl(#[error(not(source))] String),
    /// Path is absolute, empty, or escapes the source directory.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Configuration is either valid or it isn't.
        false
    }
}

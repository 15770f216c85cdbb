//! ETL Error Types
//!
//! Per-file extraction failures have their own kinds in
//! [`extract::error`](crate::extract::error); they are collected rather than
//! propagated. Everything here aborts the operation that raised it.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An ETL error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ETL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Operational Errors
/// - [`ErrorKind::Configuration`]
/// - [`ErrorKind::Transform`]
/// - [`ErrorKind::Load`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Store`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An API, its records or a stage were set up inconsistently.
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// Reading or writing the resource store failed.
    #[display("resource store error")]
    Store,
    /// An input file could not be read or is malformed.
    #[display("failed to transform {}", _0.display())]
    Transform(#[error(not(source))] PathBuf),
    /// A sink rejected a batch.
    #[display("failed to load into {_0}")]
    Load(#[error(not(source))] String),
    /// The record path does not lead anywhere in a JSON document.
    #[display("no records at {_0:?}")]
    MissingRecords(#[error(not(source))] String),
    /// A row does not have one cell per column.
    #[display("row {row} has {found} cells, expected {expected}")]
    RowWidth { row: usize, found: usize, expected: usize },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Store)
    }
}

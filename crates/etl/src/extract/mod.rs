//! Bringing the cached files of an API up to date.
//!
//! Files are processed one at a time, in declaration order. A file that
//! fails does not stop the pass: its error is recorded in the
//! [`Extraction`] and the next file is processed.

mod download;
pub mod error;
mod extractor;
mod status;

pub use crate::extract::extractor::DefaultExtractor;
pub use crate::extract::status::{FileStatus, status};
use crate::error::Result;
use crate::freshness::Decision;
use async_trait::async_trait;
use ketl_model::{CachedFileId, ExpectedFile};

/// The extraction stage of a [`Pipeline`](crate::Pipeline).
#[async_trait]
pub trait Extract: Send + Sync {
    /// Used for logging only.
    fn name(&self) -> &str;

    /// Fetch whatever is stale and report the expected files.
    ///
    /// Only failures that prevent the pass as a whole (an unknown API, an
    /// unreachable store) are returned as `Err`.
    async fn extract(&self) -> Result<Extraction>;
}

/// Result of one extraction pass.
#[derive(Debug, Default)]
pub struct Extraction {
    pub api: String,
    /// Expected files of every cached file that was fetched or skipped, in
    /// declaration order.
    pub files: Vec<ExpectedFile>,
    /// What was decided for every cached file that did not fail.
    pub decisions: Vec<(CachedFileId, Decision)>,
    pub failures: Vec<Failure>,
}

impl Extraction {
    pub fn new(api: impl Into<String>) -> Self {
        Self { api: api.into(), ..Default::default() }
    }

    /// Number of cached files that were fetched.
    pub fn fetched(&self) -> usize {
        self.decisions.iter().filter(|(_, d)| d.needs_fetch()).count()
    }

    pub fn skipped(&self) -> usize {
        self.decisions.iter().filter(|(_, d)| !d.needs_fetch()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A cached file that could not be brought up to date.
#[derive(Debug)]
pub struct Failure {
    pub cached_file_id: CachedFileId,
    /// As declared, relative to the source.
    pub url: String,
    pub error: error::Error,
}

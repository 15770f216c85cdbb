//! Turning expected files into tabular batches.
//!
//! Transformers are lazy: nothing is read until the returned stream is
//! polled, and each file is read in chunks. File reads are blocking, so they
//! run on tokio's blocking pool one chunk at a time.

mod delimited;
mod json;

pub use crate::transform::delimited::{DelimitedOptions, DelimitedTransformer};
pub use crate::transform::json::{JsonOptions, JsonTransformer};
use crate::Batch;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::Stream;
use ketl_model::ExpectedFile;
use std::path::Path;
use std::pin::Pin;

/// Rows per batch unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// A finite, single-pass stream of batches. The first error ends it.
pub type BatchStream<'a> = Pin<Box<dyn Stream<Item = Result<Batch>> + Send + 'a>>;

/// The transformation stage of a [`Pipeline`](crate::Pipeline).
pub trait Transform: Send + Sync {
    /// Used for logging only.
    fn name(&self) -> &str;

    fn transform<'a>(&'a self, files: &'a [ExpectedFile]) -> BatchStream<'a>;
}

/// Run blocking file work for `path` off the async runtime.
async fn blocking<T, F>(path: &Path, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.or_raise(|| ErrorKind::Transform(path.to_path_buf()))?
}

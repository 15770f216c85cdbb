//! Committing batches to a sink.
//!
//! A loader only ever sees batches; it knows nothing about the transformer
//! that produced them.

mod database;
mod delimited;
mod hash;
mod parquet_file;

pub use crate::load::database::DatabaseLoader;
pub use crate::load::delimited::DelimitedFileLoader;
pub use crate::load::hash::HashLoader;
pub use crate::load::parquet_file::ParquetLoader;
use crate::Batch;
use crate::error::Result;
use async_trait::async_trait;

/// The loading stage of a [`Pipeline`](crate::Pipeline).
#[async_trait]
pub trait Load: Send {
    /// Where the batches go, for logging and errors.
    fn destination(&self) -> &str;

    async fn load(&mut self, batch: &Batch) -> Result<()>;

    /// Called once after the last batch.
    async fn finalize(&mut self) -> Result<()>;
}

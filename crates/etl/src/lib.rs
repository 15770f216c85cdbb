//! The three pipeline stages and the policy deciding when a remote file is
//! worth fetching again.
//!
//! - [`setup`] populates the resource tree of an API.
//! - [`extract`] walks an API's cached files, asks [`freshness`] whether each
//!   one must be fetched, downloads what is stale and reports the resulting
//!   expected files.
//! - [`transform`] turns expected files into a lazy stream of [`Batch`]es.
//! - [`load`] commits batches to a sink.
//! - [`Pipeline`] chains any number of each.

pub mod error;
pub mod extract;
pub mod freshness;
pub mod load;
mod pipeline;
pub mod setup;
mod table;
pub mod transform;

pub use crate::pipeline::{ExtractorId, Link, LoaderId, Pipeline, PipelineReport, TransformReport, TransformerId};
pub use crate::table::{Batch, Cell};

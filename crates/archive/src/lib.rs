//! Compression detection, transparent decompression and archive unpacking.
//!
//! Two concepts are kept apart:
//!
//! - a [`Compression`] wraps a single stream (`data.csv.gz` is one CSV file),
//! - an [`ArchiveFormat`] holds many files (`data.tar.gz`, `data.zip`).
//!
//! Transformers use [`Compression::wrap_reader`] to read compressed inputs
//! as if they were plain files. The extractor uses [`unpack`] to turn a
//! fetched archive (or a compressed single file) into files on disk.

mod construct;
pub mod error;
mod ops;
mod unpack;
mod util;

pub use crate::ops::BoxRead;
pub use crate::unpack::{ArchiveFormat, unpack};

/// A supported single-stream compression format.
///
/// XZ is only available with the `xz` feature (enabled by default).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
}

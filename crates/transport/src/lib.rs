//! Byte transports.
//!
//! A [`Transport`] answers two questions about an absolute URL: how big is the
//! resource right now (without downloading it), and what are its bytes. The
//! extractor only ever talks to transports through this trait, so tests swap
//! in [`MockTransport`] (behind the `mock` feature) while the CLI uses the
//! HTTP, FTP and local file implementations.

pub mod error;
mod file;
mod ftp;
mod http;
#[cfg(feature = "mock")]
mod mock;
mod set;

pub use crate::file::FileTransport;
pub use crate::ftp::FtpTransport;
pub use crate::http::{HttpOptions, HttpTransport};
#[cfg(feature = "mock")]
pub use crate::mock::MockTransport;
pub use crate::set::Transports;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// Stream of body chunks, in order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
pub type TransportHandle = Arc<dyn Transport + Send + Sync>;

/// Unified interface for fetching remote resources.
///
/// # Examples
///
/// ```
/// use futures::TryStreamExt;
/// use ketl_transport::{Transport, error::Result};
/// use url::Url;
///
/// async fn download(transport: &dyn Transport, url: &Url) -> Result<Vec<u8>> {
///     let mut body = Vec::new();
///     let mut stream = transport.fetch(url).await?;
///     while let Some(chunk) = stream.try_next().await? {
///         body.extend_from_slice(&chunk);
///     }
///     Ok(body)
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Used for logging only.
    fn name(&self) -> &str;

    /// Whether this transport knows how to reach `url` (usually decided by
    /// scheme alone).
    fn supports(&self, url: &Url) -> bool;

    /// Metadata-only lookup of the current size of the resource.
    ///
    /// `Ok(None)` means the resource exists but its size is not reported.
    async fn stat(&self, url: &Url) -> Result<Option<u64>>;

    /// Open the resource for reading.
    ///
    /// Dropping the stream releases the underlying connection or file handle.
    async fn fetch(&self, url: &Url) -> Result<ByteStream>;
}

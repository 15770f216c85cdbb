//! In-memory transport for testing.

use crate::error::{ErrorKind, Result};
use crate::{ByteStream, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use url::Url;

/// In-memory transport for testing.
///
/// Resources are keyed by their full URL (query string included). Every
/// scheme is supported. Calls are counted so tests can assert that a skipped
/// file was never downloaded. [`MockTransport::interrupt_after`] makes a
/// transfer break off mid-stream, after the body has started.
///
/// # Examples
///
/// ```
/// use ketl_transport::{MockTransport, Transport};
/// use url::Url;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = MockTransport::with_files([("https://example.org/data/file.csv", "a,b\n1,2\n")]);
/// let url = Url::parse("https://example.org/data/file.csv")?;
/// assert_eq!(transport.stat(&url).await?, Some(8));
/// assert_eq!(transport.fetches(&url), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    files: RwLock<HashMap<String, Bytes>>,
    report_sizes: bool,
    interruptions: RwLock<HashMap<String, usize>>,
    fetches: Mutex<HashMap<String, usize>>,
    stats: Mutex<HashMap<String, usize>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            files: RwLock::default(),
            report_sizes: true,
            interruptions: RwLock::default(),
            fetches: Mutex::default(),
            stats: Mutex::default(),
        }
    }
}

impl MockTransport {
    /// Create a mock transport pre-populated with resources.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>) -> Self {
        let files = files.into_iter().map(|(url, data)| (url.into(), data.into())).collect();
        Self { files: RwLock::new(files), ..Default::default() }
    }

    /// Behave like a server that never sends `Content-Length`.
    pub fn without_sizes(mut self) -> Self {
        self.report_sizes = false;
        self
    }

    /// Replace (or add) the content of a resource.
    pub fn set(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.files.write().unwrap_or_else(PoisonError::into_inner).insert(url.into(), data.into());
    }

    /// Fail every later fetch of `url` with a network error once `chunks`
    /// chunks have been delivered.
    pub fn interrupt_after(&self, url: impl Into<String>, chunks: usize) {
        self.interruptions.write().unwrap_or_else(PoisonError::into_inner).insert(url.into(), chunks);
    }

    /// Let fetches of `url` complete again.
    pub fn resume(&self, url: &str) {
        self.interruptions.write().unwrap_or_else(PoisonError::into_inner).remove(url);
    }

    /// Make a resource disappear.
    pub fn remove(&self, url: &str) {
        self.files.write().unwrap_or_else(PoisonError::into_inner).remove(url);
    }

    /// Number of times `url` has been fetched.
    pub fn fetches(&self, url: &Url) -> usize {
        Self::count(&self.fetches, url)
    }

    /// Number of times `url` has been asked for its size.
    pub fn stats(&self, url: &Url) -> usize {
        Self::count(&self.stats, url)
    }

    fn count(counter: &Mutex<HashMap<String, usize>>, url: &Url) -> usize {
        counter.lock().unwrap_or_else(PoisonError::into_inner).get(url.as_str()).copied().unwrap_or_default()
    }

    fn record(counter: &Mutex<HashMap<String, usize>>, url: &Url) {
        *counter.lock().unwrap_or_else(PoisonError::into_inner).entry(url.to_string()).or_default() += 1;
    }

    fn get(&self, url: &Url) -> Result<Bytes> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        match files.get(url.as_str()) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(url.to_string())),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports(&self, _url: &Url) -> bool {
        true
    }

    async fn stat(&self, url: &Url) -> Result<Option<u64>> {
        Self::record(&self.stats, url);
        let data = self.get(url)?;
        Ok(self.report_sizes.then_some(data.len() as u64))
    }

    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        Self::record(&self.fetches, url);
        let data = self.get(url)?;
        // Several chunks, so consumers can't get away with assuming one.
        let mut chunks: Vec<Result<Bytes>> = data.chunks(4).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        let interruption = self.interruptions.read().unwrap_or_else(PoisonError::into_inner).get(url.as_str()).copied();
        if let Some(after) = interruption {
            chunks.truncate(after);
            chunks.push(Err(ErrorKind::Network(format!("connection reset while reading {url}")).into()));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

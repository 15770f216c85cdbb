use crate::error::{ErrorKind, Result};
use crate::{ByteStream, FileTransport, FtpTransport, HttpOptions, HttpTransport, Transport, TransportHandle};
use async_trait::async_trait;
use ketl_model::Credentials;
use std::sync::Arc;
use url::Url;

/// An ordered set of transports; the first one supporting a URL handles it.
///
/// The set is itself a [`Transport`], so callers never need to know which
/// concrete transport served a request.
#[derive(Clone, Default)]
pub struct Transports {
    transports: Vec<TransportHandle>,
}

impl Transports {
    /// HTTP(S), FTP and local files.
    pub fn standard(options: &HttpOptions, credentials: Option<&Credentials>) -> Result<Self> {
        Ok(Self::default()
            .with(Arc::new(HttpTransport::new(options, credentials)?))
            .with(Arc::new(FtpTransport::new(options.timeout, credentials)))
            .with(Arc::new(FileTransport)))
    }

    pub fn with(mut self, transport: TransportHandle) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn for_url(&self, url: &Url) -> Result<&TransportHandle> {
        match self.transports.iter().find(|t| t.supports(url)) {
            Some(transport) => Ok(transport),
            None => exn::bail!(ErrorKind::UnsupportedScheme(url.scheme().to_string())),
        }
    }
}

#[async_trait]
impl Transport for Transports {
    fn name(&self) -> &str {
        "transports"
    }

    fn supports(&self, url: &Url) -> bool {
        self.transports.iter().any(|t| t.supports(url))
    }

    async fn stat(&self, url: &Url) -> Result<Option<u64>> {
        self.for_url(url)?.stat(url).await
    }

    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        self.for_url(url)?.fetch(url).await
    }
}

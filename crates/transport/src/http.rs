//! HTTP(S) transport.

use crate::error::{ErrorKind, Result};
use crate::{ByteStream, Transport};
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use ketl_model::{BasicAuth, Credentials};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Client settings shared by every API.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub user_agent: String,
}
impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            user_agent: concat!("ketl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches `http://` and `https://` URLs.
///
/// Cookie and token credentials become default headers of the client; basic
/// auth is added to each request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    basic: Option<BasicAuth>,
}

impl HttpTransport {
    pub fn new(options: &HttpOptions, credentials: Option<&Credentials>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in credentials.map(Credentials::headers).unwrap_or_default() {
            let invalid = || ErrorKind::Configuration(format!("invalid credential header {name}"));
            let name = HeaderName::try_from(name.as_str()).or_raise(invalid)?;
            let mut value = HeaderValue::try_from(value).or_raise(invalid)?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(&options.user_agent)
            .default_headers(headers)
            .build()
            .or_raise(|| ErrorKind::Configuration("HTTP client".to_string()))?;
        Ok(Self { client, basic: credentials.and_then(|c| c.basic.clone()) })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.basic {
            Some(basic) => request.basic_auth(&basic.username, basic.password.as_ref()),
            None => request,
        }
    }

    fn check(url: &Url, response: Response) -> Result<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND | StatusCode::GONE => exn::bail!(ErrorKind::NotFound(url.to_string())),
            status => exn::bail!(ErrorKind::Status(url.to_string(), status.as_u16())),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn supports(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn stat(&self, url: &Url) -> Result<Option<u64>> {
        let response = self
            .authorize(self.client.head(url.clone()))
            .send()
            .await
            .or_raise(|| ErrorKind::Network(url.to_string()))?;
        let response = Self::check(url, response)?;
        // Response::content_length() describes the (empty) body of a HEAD
        // response, not the resource.
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        debug!(?size, "remote size");
        Ok(size)
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .or_raise(|| ErrorKind::Network(url.to_string()))?;
        let response = Self::check(url, response)?;
        let url = url.to_string();
        let stream = response.bytes_stream().map_err(move |e| {
            let kind = ErrorKind::Network(url.clone());
            exn::Exn::from(e).raise(kind)
        });
        Ok(Box::pin(stream))
    }
}

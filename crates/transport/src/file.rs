//! Local `file://` transport, for mirrors on disk and network mounts.

use crate::error::{ErrorKind, Result};
use crate::{ByteStream, Transport};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct FileTransport;

impl FileTransport {
    fn local_path(url: &Url) -> Result<PathBuf> {
        url.to_file_path().map_err(|()| exn::Exn::from(ErrorKind::UnsupportedScheme(url.to_string())))
    }

    fn map_io_error(e: std::io::Error, url: &Url) -> ErrorKind {
        match e.kind() {
            IoErrorKind::NotFound => ErrorKind::NotFound(url.to_string()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    fn supports(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    async fn stat(&self, url: &Url) -> Result<Option<u64>> {
        let path = Self::local_path(url)?;
        let metadata = fs::metadata(&path).await.map_err(|e| Self::map_io_error(e, url))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(url.to_string()));
        }
        Ok(Some(metadata.len()))
    }

    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        let path = Self::local_path(url)?;
        let file = fs::File::open(&path).await.map_err(|e| Self::map_io_error(e, url))?;
        let stream = ReaderStream::new(file).map_err(|e| exn::Exn::from(ErrorKind::Io(e)));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let transport = FileTransport;
        assert!(transport.supports(&url));
        assert_eq!(transport.stat(&url).await.unwrap(), Some(8));
        let chunks: Vec<_> = transport.fetch(&url).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.csv")).unwrap();
        let err = FileTransport.stat(&url).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
        assert!(FileTransport.fetch(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_directories_are_not_resources() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        assert!(FileTransport.stat(&url).await.is_err());
    }
}

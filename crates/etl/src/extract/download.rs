use crate::extract::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use ketl_model::Fingerprint;
use ketl_transport::Transport;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

/// A `.part` sibling of a download destination, removed on drop unless it
/// was renamed over the destination.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    fn next_to(destination: &Path) -> Self {
        let mut name = destination.file_name().map(OsString::from).unwrap_or_default();
        name.push(".part");
        Self { path: destination.with_file_name(name), persisted: false }
    }

    async fn persist(mut self, destination: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, destination).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Stream `url` into `destination`, hashing the bytes as they pass.
///
/// Nothing is written to `destination` unless the whole transfer succeeds.
#[instrument(skip_all, fields(url = %url, path = %destination.display(), transport = transport.name()))]
pub(crate) async fn download(transport: &dyn Transport, url: &Url, destination: &Path) -> Result<Fingerprint> {
    let fetch_failed = || ErrorKind::Fetch(url.to_string());
    let write_failed = || ErrorKind::Write(destination.to_path_buf());

    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await.or_raise(write_failed)?;
    }
    let mut stream = transport.fetch(url).await.or_raise(fetch_failed)?;
    let partial = PartialFile::next_to(destination);
    let mut file = fs::File::create(&partial.path).await.or_raise(write_failed)?;

    let mut hasher = blake3::Hasher::new();
    let mut size = 0u64;
    while let Some(chunk) = stream.try_next().await.or_raise(fetch_failed)? {
        hasher.update(&chunk);
        size += chunk.len() as u64;
        file.write_all(&chunk).await.or_raise(write_failed)?;
    }
    file.sync_all().await.or_raise(write_failed)?;
    drop(file);
    drop(stream);

    partial.persist(destination).await.or_raise(write_failed)?;
    let hash = hasher.finalize().to_hex().to_string();
    debug!(size, %hash, "download complete");
    Ok(Fingerprint { hash, size, fetched_at: UtcDateTime::now() })
}

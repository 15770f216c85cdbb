use crate::error::{ErrorKind as EtlErrorKind, Result as EtlResult};
use crate::extract::download::download;
use crate::extract::error::{ErrorKind, Result};
use crate::extract::{Extract, Extraction, Failure};
use crate::freshness::{Decision, Freshness};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use ketl_model::{CachedFile, ExpectedFile, ExpectedMode, NewExpectedFile, Source};
use ketl_store::Repository;
use ketl_transport::TransportHandle;
use std::path::{Path, PathBuf};
use time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Extracts every cached file of one API through a single transport.
pub struct DefaultExtractor {
    repo: Repository,
    transport: TransportHandle,
    api: String,
    force: bool,
    default_max_age: Option<Duration>,
}

impl DefaultExtractor {
    pub fn new(repo: Repository, transport: TransportHandle, api: impl Into<String>) -> Self {
        Self { repo, transport, api: api.into(), force: false, default_max_age: None }
    }

    /// Re-fetch every file, whatever its recorded fingerprint says.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Max age of files that do not set their own.
    pub fn with_default_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.default_max_age = max_age;
        self
    }

    #[instrument(skip_all, fields(url = %file.url))]
    async fn extract_file(&self, source: &Source, file: &CachedFile) -> Result<(Decision, Vec<ExpectedFile>)> {
        let url = source
            .resolve_url(file)
            .or_raise(|| ErrorKind::Configuration(format!("cannot resolve URL {}", file.url)))?;
        let local = source
            .resolve_path(&file.path)
            .or_raise(|| ErrorKind::Configuration(format!("cannot resolve path {}", file.path.display())))?;
        let known = self.repo.expected_files_for(file.id).await.or_raise(|| ErrorKind::Store)?;
        if file.expected_mode == ExpectedMode::Explicit && known.is_empty() {
            exn::bail!(ErrorKind::Configuration(format!("{}: explicit mode without expected files", file.url)));
        }

        let freshness = Freshness::new(file, self.default_max_age)
            .force(self.force)
            .local_present(artifacts_present(&local, &known).await);
        let decision = match freshness.check() {
            Some(decision) => decision,
            None => {
                let size = self.transport.stat(&url).await.or_raise(|| ErrorKind::Fetch(url.to_string()))?;
                freshness.evaluate(size)
            },
        };
        debug!(%decision, "freshness evaluated");

        let files = match decision {
            Decision::Skip => self.reuse(file, &local, known).await?,
            Decision::Fetch(_) | Decision::ForceFetch => {
                info!(%url, %decision, "fetching");
                self.fetch(source, file, &url, &local, known).await?
            },
        };
        Ok((decision, files))
    }

    async fn reuse(&self, file: &CachedFile, local: &Path, known: Vec<ExpectedFile>) -> Result<Vec<ExpectedFile>> {
        match file.expected_mode {
            ExpectedMode::Identity => Ok(vec![self.identity(file, local).await?]),
            ExpectedMode::Explicit | ExpectedMode::Auto => Ok(known),
        }
    }

    /// Download, unpack and derive the expected files. The fingerprint is
    /// written only once all three succeeded; a failure after the download
    /// clears it, so the next run fetches again.
    async fn fetch(
        &self,
        source: &Source,
        file: &CachedFile,
        url: &Url,
        local: &Path,
        known: Vec<ExpectedFile>,
    ) -> Result<Vec<ExpectedFile>> {
        let fingerprint = download(self.transport.as_ref(), url, local).await?;
        let files = match self.derive(source, file, local, known).await {
            Ok(files) => files,
            Err(error) => {
                if file.fingerprint.is_some() {
                    self.repo.clear_fingerprint(file.id).await.or_raise(|| ErrorKind::Store)?;
                }
                return Err(error);
            },
        };
        self.repo.record_fetch(file.id, &fingerprint).await.or_raise(|| ErrorKind::Store)?;
        Ok(files)
    }

    async fn derive(
        &self,
        source: &Source,
        file: &CachedFile,
        local: &Path,
        known: Vec<ExpectedFile>,
    ) -> Result<Vec<ExpectedFile>> {
        let unpack_dir = match (&file.unpack_to, file.expected_mode) {
            (Some(dir), _) => Some(
                source
                    .resolve_path(dir)
                    .or_raise(|| ErrorKind::Configuration(format!("cannot resolve path {}", dir.display())))?,
            ),
            (None, ExpectedMode::Auto) => Some(local.parent().map(Path::to_path_buf).unwrap_or_default()),
            (None, _) => None,
        };
        let unpacked = match unpack_dir {
            Some(dir) => unpack(local, &dir).await?,
            None => Vec::new(),
        };

        match file.expected_mode {
            ExpectedMode::Identity => Ok(vec![self.identity(file, local).await?]),
            ExpectedMode::Explicit => {
                for expected in &known {
                    if !exists(&expected.path).await {
                        exn::bail!(ErrorKind::MissingExpectedFile(expected.path.clone()));
                    }
                }
                Ok(known)
            },
            ExpectedMode::Auto => {
                let files = self.repo.sync_expected_files(file.id, &unpacked).await.or_raise(|| ErrorKind::Store)?;
                debug!(count = files.len(), "expected files replaced");
                Ok(files)
            },
        }
    }

    async fn identity(&self, file: &CachedFile, local: &Path) -> Result<ExpectedFile> {
        let draft = NewExpectedFile::new(file.id, local)
            .or_raise(|| ErrorKind::Configuration(format!("invalid path {}", local.display())))?;
        let expected = self.repo.get_or_create::<ExpectedFile>(&draft).await.or_raise(|| ErrorKind::Store)?;
        Ok(expected.into_inner())
    }
}

#[async_trait]
impl Extract for DefaultExtractor {
    fn name(&self) -> &str {
        &self.api
    }

    #[instrument(skip(self), fields(api = %self.api, force = self.force))]
    async fn extract(&self) -> EtlResult<Extraction> {
        let api = self
            .repo
            .api_by_name(&self.api)
            .await
            .or_raise(|| EtlErrorKind::Store)?
            .ok_or_raise(|| EtlErrorKind::Configuration(format!("unknown API {}", self.api)))?;
        let files = self.repo.cached_files_for_api(api.id).await.or_raise(|| EtlErrorKind::Store)?;
        info!(files = files.len(), "extraction started");

        let mut extraction = Extraction::new(api.name);
        for (source, file) in &files {
            match self.extract_file(source, file).await {
                Ok((decision, expected)) => {
                    extraction.decisions.push((file.id, decision));
                    extraction.files.extend(expected);
                },
                Err(error) => {
                    warn!(url = %file.url, error = ?error, "extraction failed");
                    extraction.failures.push(Failure { cached_file_id: file.id, url: file.url.clone(), error });
                },
            }
        }
        info!(
            fetched = extraction.fetched(),
            skipped = extraction.skipped(),
            failed = extraction.failures.len(),
            "extraction complete"
        );
        Ok(extraction)
    }
}

/// Whether the artifacts of the last fetch are all still on disk.
pub(crate) async fn artifacts_present(local: &Path, known: &[ExpectedFile]) -> bool {
    if !exists(local).await {
        return false;
    }
    for expected in known {
        if !exists(&expected.path).await {
            return false;
        }
    }
    true
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[instrument(fields(archive = %archive.display(), dest = %dest.display()), skip_all)]
async fn unpack(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let unpack_failed = || ErrorKind::Unpack(archive.to_path_buf());
    let (archive_path, dest_path) = (archive.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || ketl_archive::unpack(&archive_path, &dest_path))
        .await
        .or_raise(unpack_failed)?
        .or_raise(unpack_failed)
}

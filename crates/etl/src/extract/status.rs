use crate::error::{ErrorKind, Result};
use crate::extract::extractor::artifacts_present;
use crate::freshness::{Decision, Freshness};
use exn::{OptionExt, ResultExt};
use ketl_model::{CachedFile, Source};
use ketl_store::Repository;
use std::path::PathBuf;
use time::Duration;
use url::Url;

/// What is known about a cached file without contacting the remote.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub source: Source,
    pub file: CachedFile,
    pub url: Url,
    pub local: PathBuf,
    pub local_present: bool,
    /// The decision an extraction would take, if it can be made without
    /// asking for the remote size. `None` means the remote size decides.
    pub pending: Option<Decision>,
}

/// Status of every cached file of `api`, in declaration order.
pub async fn status(repo: &Repository, api: &str, default_max_age: Option<Duration>) -> Result<Vec<FileStatus>> {
    let record = repo
        .api_by_name(api)
        .await
        .or_raise(|| ErrorKind::Store)?
        .ok_or_raise(|| ErrorKind::Configuration(format!("unknown API {api}")))?;
    let files = repo.cached_files_for_api(record.id).await.or_raise(|| ErrorKind::Store)?;
    let mut statuses = Vec::with_capacity(files.len());
    for (source, file) in files {
        let url = source
            .resolve_url(&file)
            .or_raise(|| ErrorKind::Configuration(format!("cannot resolve URL {}", file.url)))?;
        let local = source
            .resolve_path(&file.path)
            .or_raise(|| ErrorKind::Configuration(format!("cannot resolve path {}", file.path.display())))?;
        let known = repo.expected_files_for(file.id).await.or_raise(|| ErrorKind::Store)?;
        let local_present = artifacts_present(&local, &known).await;
        let pending = Freshness::new(&file, default_max_age).local_present(local_present).check();
        statuses.push(FileStatus { source, file, url, local, local_present, pending });
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DefaultExtractor, Extract};
    use crate::freshness::Reason;
    use crate::setup::register;
    use ketl_config::{ApiDefinition, FileDefinition, SourceDefinition};
    use ketl_model::ExpectedMode;
    use ketl_store::Database;
    use ketl_transport::MockTransport;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_status_follows_extraction() {
        let temp = tempfile::tempdir().unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let definition = ApiDefinition {
            name: "status".to_string(),
            credentials: None,
            sources: vec![SourceDefinition {
                base_url: "https://example.org/".to_string(),
                data_dir: temp.path().to_path_buf(),
                files: vec![FileDefinition {
                    url: "a.csv".to_string(),
                    path: None,
                    expected_mode: ExpectedMode::Identity,
                    unpack_to: None,
                    max_age_secs: None,
                    params: BTreeMap::new(),
                    expected: vec![],
                }],
            }],
        };
        register(&repo, &definition).await.unwrap();

        let before = status(&repo, "status", None).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].url.as_str(), "https://example.org/a.csv");
        assert!(!before[0].local_present);
        assert_eq!(before[0].pending, Some(Decision::Fetch(Reason::NeverFetched)));

        let transport = Arc::new(MockTransport::with_files([("https://example.org/a.csv", "x\n")]));
        DefaultExtractor::new(repo.clone(), transport, "status").extract().await.unwrap();

        let after = status(&repo, "status", None).await.unwrap();
        assert!(after[0].local_present);
        assert_eq!(after[0].pending, None);
        let expired = status(&repo, "status", Some(Duration::seconds(-1))).await.unwrap();
        assert_eq!(expired[0].pending, Some(Decision::Fetch(Reason::Expired)));

        assert!(status(&repo, "unknown", None).await.is_err());
    }
}

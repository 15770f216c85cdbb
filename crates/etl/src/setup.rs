//! Populating the resource tree of an API.
//!
//! Every record is created through get-or-create on its natural key, so
//! running a setup twice leaves the store exactly as running it once. When a
//! record already exists, its other attributes (credentials, params, expected
//! mode, unpack directory, max age) are brought in line with the declaration.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use ketl_config::ApiDefinition;
use ketl_model::{
    Api, CachedFile, Credentials, ExpectedFile, NewApi, NewCachedFile, NewExpectedFile, NewSource, Source,
};
use ketl_store::{GetOrCreate, Repository};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// A user-supplied procedure declaring the sources and files of one API.
#[async_trait]
pub trait Setup: Send + Sync {
    /// Unique name of the API.
    fn name(&self) -> &str;

    fn credentials(&self) -> Option<Credentials> {
        None
    }

    async fn setup(&self, ctx: &SetupContext<'_>) -> Result<()>;
}

/// Handed to [`Setup::setup`]; creates records under one API.
pub struct SetupContext<'a> {
    repo: &'a Repository,
    api: Api,
}

impl SetupContext<'_> {
    pub fn api(&self) -> &Api {
        &self.api
    }

    pub async fn source(&self, base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Result<Source> {
        let base_url = base_url.into();
        let draft = NewSource::new(self.api.id, base_url.as_str(), data_dir)
            .or_raise(|| ErrorKind::Configuration(format!("invalid source {base_url}")))?;
        let source = self.repo.get_or_create::<Source>(&draft).await.or_raise(|| ErrorKind::Store)?;
        Ok(source.into_inner())
    }

    pub async fn cached_file(&self, draft: NewCachedFile) -> Result<CachedFile> {
        let file = self.repo.get_or_create::<CachedFile>(&draft).await.or_raise(|| ErrorKind::Store)?;
        if file.was_created() {
            debug!(url = %draft.url, path = %draft.path.display(), "cached file created");
            return Ok(file.into_inner());
        }
        let file = file.into_inner();
        if file.params == draft.params
            && file.expected_mode == draft.expected_mode
            && file.unpack_to == draft.unpack_to
            && file.max_age == draft.max_age
        {
            return Ok(file);
        }
        let updated = self.repo.update_cached_file(file.id, &draft).await.or_raise(|| ErrorKind::Store)?;
        info!(url = %draft.url, refetch = updated.fingerprint.is_none(), "cached file declaration changed");
        Ok(updated)
    }

    /// Declare a file, relative to the source's data directory, that must
    /// exist once `file` has been fetched.
    pub async fn expected_file(&self, source: &Source, file: &CachedFile, path: impl AsRef<Path>) -> Result<ExpectedFile> {
        let path = path.as_ref();
        let invalid = || ErrorKind::Configuration(format!("invalid expected file {}", path.display()));
        if file.source_id != source.id {
            exn::bail!(ErrorKind::Configuration(format!("{} does not belong to {}", file.url, source.base_url)));
        }
        let resolved = source.resolve_path(path).or_raise(invalid)?;
        let draft = NewExpectedFile::new(file.id, resolved).or_raise(invalid)?;
        let expected = self.repo.get_or_create::<ExpectedFile>(&draft).await.or_raise(|| ErrorKind::Store)?;
        Ok(expected.into_inner())
    }
}

/// Get-or-create the API named by `setup`, then let it declare its records.
///
/// Configuration errors surface immediately and abort the setup; records
/// created before the error stay in place.
#[instrument(skip_all, fields(api = setup.name()))]
pub async fn register(repo: &Repository, setup: &dyn Setup) -> Result<Api> {
    let draft = NewApi::new(setup.name())
        .or_raise(|| ErrorKind::Configuration(format!("invalid API name {:?}", setup.name())))?
        .with_credentials(setup.credentials());
    let api = repo.get_or_create::<Api>(&draft).await.or_raise(|| ErrorKind::Store)?;
    let api = match api {
        GetOrCreate::Created(api) => {
            info!("API created");
            api
        },
        GetOrCreate::Found(api) => {
            let declared = draft.credentials.filter(|c| !c.is_empty());
            match api.credentials == declared {
                true => {
                    debug!("API already exists");
                    api
                },
                false => {
                    info!("API credentials changed");
                    repo.update_api_credentials(api.id, declared.as_ref()).await.or_raise(|| ErrorKind::Store)?
                },
            }
        },
    };
    let ctx = SetupContext { repo, api };
    setup.setup(&ctx).await?;
    Ok(ctx.api)
}

#[async_trait]
impl Setup for ApiDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }

    async fn setup(&self, ctx: &SetupContext<'_>) -> Result<()> {
        for source_def in &self.sources {
            let source = ctx.source(source_def.base_url.as_str(), source_def.data_dir.as_path()).await?;
            for file_def in &source_def.files {
                let invalid = || ErrorKind::Configuration(format!("invalid file {}", file_def.url));
                let mut draft = NewCachedFile::new(source.id, file_def.url.as_str()).or_raise(invalid)?;
                if let Some(path) = &file_def.path {
                    draft = draft.with_path(path).or_raise(invalid)?;
                }
                if let Some(dir) = &file_def.unpack_to {
                    draft = draft.with_unpack_to(dir).or_raise(invalid)?;
                }
                draft = file_def
                    .params
                    .iter()
                    .fold(draft, |draft, (key, value)| draft.with_param(key, value))
                    .with_expected_mode(file_def.expected_mode)
                    .with_max_age(file_def.max_age());
                let file = ctx.cached_file(draft).await?;
                for expected in &file_def.expected {
                    ctx.expected_file(&source, &file, expected).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_config::{FileDefinition, SourceDefinition};
    use ketl_model::{ExpectedMode, TokenHeader};
    use ketl_store::Database;
    use std::collections::BTreeMap;

    fn definition() -> ApiDefinition {
        ApiDefinition {
            name: "census".to_string(),
            credentials: Some(Credentials {
                token: Some(TokenHeader { header: "X-Key".to_string(), token: "secret".to_string() }),
                ..Default::default()
            }),
            sources: vec![SourceDefinition {
                base_url: "https://example.org/data/".to_string(),
                data_dir: PathBuf::from("downloads"),
                files: vec![
                    FileDefinition {
                        url: "population.csv".to_string(),
                        path: None,
                        expected_mode: ExpectedMode::Identity,
                        unpack_to: None,
                        max_age_secs: Some(3600),
                        params: BTreeMap::from([("format".to_string(), "csv".to_string())]),
                        expected: vec![],
                    },
                    FileDefinition {
                        url: "bundle.tar.gz".to_string(),
                        path: None,
                        expected_mode: ExpectedMode::Explicit,
                        unpack_to: Some(PathBuf::from("bundle")),
                        max_age_secs: None,
                        params: BTreeMap::new(),
                        expected: vec![PathBuf::from("bundle/a.csv"), PathBuf::from("bundle/b.csv")],
                    },
                ],
            }],
        }
    }

    #[tokio::test]
    async fn test_register_definition() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let api = register(&repo, &definition()).await.unwrap();
        assert_eq!(api.name, "census");
        assert!(api.credentials.is_some());

        let files = repo.cached_files_for_api(api.id).await.unwrap();
        assert_eq!(files.len(), 2);
        let (source, population) = &files[0];
        assert_eq!(source.data_dir, Path::new("downloads"));
        assert_eq!(population.max_age, Some(time::Duration::hours(1)));
        assert_eq!(population.params.get("format").map(String::as_str), Some("csv"));
        let (_, bundle) = &files[1];
        assert_eq!(bundle.unpack_to.as_deref(), Some(Path::new("bundle")));
        let expected = repo.expected_files_for(bundle.id).await.unwrap();
        let paths: Vec<_> = expected.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("downloads/bundle/a.csv"), PathBuf::from("downloads/bundle/b.csv")]);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let first = register(&repo, &definition()).await.unwrap();
        let second = register(&repo, &definition()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.apis().await.unwrap().len(), 1);
        assert_eq!(repo.sources_for_api(first.id).await.unwrap().len(), 1);
        let files = repo.cached_files_for_api(first.id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(repo.expected_files_for(files[1].1.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_configuration_errors_abort_setup() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let mut definition = definition();
        definition.sources[0].files[0].path = Some(PathBuf::from("../escape.csv"));
        let err = register(&repo, &definition).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Configuration(_)));

        let blank = ApiDefinition { name: " ".to_string(), credentials: None, sources: vec![] };
        let err = register(&repo, &blank).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Configuration(_)));
    }

    #[tokio::test]
    async fn test_register_applies_edited_declaration() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let mut definition = definition();
        definition.sources[0].files[0].max_age_secs = None;
        let api = register(&repo, &definition).await.unwrap();
        let (_, population) = repo.cached_files_for_api(api.id).await.unwrap().remove(0);
        let fingerprint = ketl_model::Fingerprint {
            hash: "00".repeat(32),
            size: 3,
            fetched_at: time::UtcDateTime::now(),
        };
        repo.record_fetch(population.id, &fingerprint).await.unwrap();

        // Only the max age changes: the fetch state survives.
        definition.sources[0].files[0].max_age_secs = Some(60);
        register(&repo, &definition).await.unwrap();
        let (_, population) = repo.cached_files_for_api(api.id).await.unwrap().remove(0);
        assert_eq!(population.max_age, Some(time::Duration::seconds(60)));
        assert!(population.fingerprint.is_some());

        // A new expected mode and credentials are applied too.
        definition.sources[0].files[0].expected_mode = ExpectedMode::Auto;
        definition.credentials = None;
        let edited = register(&repo, &definition).await.unwrap();
        assert_eq!(edited.id, api.id);
        assert!(edited.credentials.is_none());
        assert!(repo.api_by_name("census").await.unwrap().unwrap().credentials.is_none());
        let files = repo.cached_files_for_api(api.id).await.unwrap();
        assert_eq!(files.len(), 2);
        let (_, population) = &files[0];
        assert_eq!(population.expected_mode, ExpectedMode::Auto);
        assert_eq!(population.max_age, Some(time::Duration::seconds(60)));
        assert!(population.fingerprint.is_none());
    }

    struct Handwritten;

    #[async_trait]
    impl Setup for Handwritten {
        fn name(&self) -> &str {
            "handwritten"
        }

        async fn setup(&self, ctx: &SetupContext<'_>) -> Result<()> {
            let source = ctx.source("file:///srv/mirror", "mirror").await?;
            let draft = NewCachedFile::new(source.id, "listing/index.html").unwrap().with_path("listing.html").unwrap();
            let file = ctx.cached_file(draft).await?;
            let other = ctx.source("https://example.org", "elsewhere").await?;
            ctx.expected_file(&other, &file, "listing.html").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_expected_files_must_share_the_source() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let err = register(&repo, &Handwritten).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Configuration(_)));
        let api = repo.api_by_name("handwritten").await.unwrap().unwrap();
        assert!(api.credentials.is_none());
    }
}

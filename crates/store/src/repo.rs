//! Repository over the whole resource tree.
//!
//! Records are only ever created through [`Repository::get_or_create`].
//! After creation, a cached file's fingerprint is written by
//! [`Repository::record_fetch`] and an archive's expected files are replaced
//! by [`Repository::sync_expected_files`]. Attributes outside the natural key
//! follow the declaration through [`Repository::update_cached_file`] and
//! [`Repository::update_api_credentials`].

use crate::Database;
use crate::entity::{Entity, GetOrCreate};
use crate::error::{ErrorKind, Result};
use crate::rows::{
    ApiRow, CachedFileRow, ExpectedFileRow, SourceRow, credentials_to_text, max_age_to_secs, params_to_text,
    path_to_text,
};
use exn::{OptionExt, ResultExt};
use ketl_model::{
    Api, ApiId, CachedFile, CachedFileId, Credentials, ExpectedFile, Fingerprint, NewApi, NewCachedFile,
    NewExpectedFile, Source, SourceId,
};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Return the record matching the natural key of `draft`, creating it if
    /// it does not exist yet.
    ///
    /// Lookup and insert happen in the same transaction, and the insert
    /// tolerates a conflicting row, so two callers racing on the same key both
    /// end up with the one record.
    pub async fn get_or_create<E: Entity>(&self, draft: &E::Draft) -> Result<GetOrCreate<E>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        if let Some(existing) = E::find(&mut *tx, draft).await? {
            tx.commit().await.or_raise(|| ErrorKind::Database)?;
            return Ok(GetOrCreate::Found(existing));
        }
        let inserted = E::insert(&mut *tx, draft).await?;
        let record = E::find(&mut *tx, draft).await?.ok_or_raise(|| ErrorKind::NotFound(E::KIND.to_string()))?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        debug!(kind = E::KIND, inserted, "get-or-create");
        Ok(match inserted {
            true => GetOrCreate::Created(record),
            false => GetOrCreate::Found(record),
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub async fn api_by_name(&self, name: impl AsRef<str>) -> Result<Option<Api>> {
        let draft = NewApi { name: name.as_ref().to_string(), credentials: None };
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Api::find(&mut *conn, &draft).await
    }

    pub async fn api_by_id(&self, id: ApiId) -> Result<Api> {
        let row: Option<ApiRow> = sqlx::query_as(include_str!("../queries/get_api.sql"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.ok_or_raise(|| ErrorKind::NotFound(format!("api {id}")))?.try_into()
    }

    pub async fn cached_file(&self, id: CachedFileId) -> Result<CachedFile> {
        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/get_cached_file.sql"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.ok_or_raise(|| ErrorKind::NotFound(format!("cached file {id}")))?.try_into()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    pub async fn apis(&self) -> Result<Vec<Api>> {
        let rows: Vec<ApiRow> = sqlx::query_as(include_str!("../queries/list_apis.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Api::try_from).collect()
    }

    pub async fn sources_for_api(&self, api_id: ApiId) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(include_str!("../queries/list_sources_for_api.sql"))
            .bind(api_id.0)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Source::from).collect())
    }

    /// Every cached file of an API paired with its source, in declaration
    /// order (source first, then cached file).
    pub async fn cached_files_for_api(&self, api_id: ApiId) -> Result<Vec<(Source, CachedFile)>> {
        let sources: HashMap<SourceId, Source> =
            self.sources_for_api(api_id).await?.into_iter().map(|s| (s.id, s)).collect();
        let rows: Vec<CachedFileRow> = sqlx::query_as(include_str!("../queries/list_cached_files_for_api.sql"))
            .bind(api_id.0)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|row| {
                let file = CachedFile::try_from(row)?;
                let source = sources.get(&file.source_id).ok_or_raise(|| ErrorKind::InvalidData("orphan cached file"))?;
                Ok((source.clone(), file))
            })
            .collect()
    }

    pub async fn expected_files_for(&self, cached_file_id: CachedFileId) -> Result<Vec<ExpectedFile>> {
        let rows: Vec<ExpectedFileRow> = sqlx::query_as(include_str!("../queries/list_expected_files.sql"))
            .bind(cached_file_id.0)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(ExpectedFile::from).collect())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Overwrite the fingerprint of a cached file.
    ///
    /// Hash, size and fetch time are written by a single statement inside a
    /// transaction: readers see either the old fingerprint or the new one.
    #[instrument(skip(self, fingerprint), fields(hash = %fingerprint.hash, size = fingerprint.size))]
    pub async fn record_fetch(&self, id: CachedFileId, fingerprint: &Fingerprint) -> Result<()> {
        let size = i64::try_from(fingerprint.size).or_raise(|| ErrorKind::InvalidData("file size"))?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let result = sqlx::query(include_str!("../queries/record_fetch.sql"))
            .bind(&fingerprint.hash)
            .bind(size)
            .bind(fingerprint.fetched_at.unix_timestamp())
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(format!("cached file {id}")));
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Forget the fingerprint of a cached file, so the next extraction treats
    /// it as never fetched.
    pub async fn clear_fingerprint(&self, id: CachedFileId) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/clear_fingerprint.sql"))
            .bind(id.0)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(format!("cached file {id}")));
        }
        Ok(())
    }

    /// Bring the attributes of a cached file outside its natural key in line
    /// with `draft`.
    ///
    /// Params, expected mode and unpack directory decide what ends up on
    /// disk. When one of them changes, the fingerprint and the expected files
    /// are dropped in the same transaction so the next extraction fetches
    /// again. A new max age alone keeps both.
    #[instrument(skip(self, draft), fields(url = %draft.url))]
    pub async fn update_cached_file(&self, id: CachedFileId, draft: &NewCachedFile) -> Result<CachedFile> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/get_cached_file.sql"))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let current = CachedFile::try_from(row.ok_or_raise(|| ErrorKind::NotFound(format!("cached file {id}")))?)?;
        let reset = current.params != draft.params
            || current.expected_mode != draft.expected_mode
            || current.unpack_to != draft.unpack_to;

        let unpack_to = draft.unpack_to.as_ref().map(path_to_text).transpose()?;
        sqlx::query(include_str!("../queries/update_cached_file.sql"))
            .bind(params_to_text(&draft.params)?)
            .bind(draft.expected_mode.as_str())
            .bind(unpack_to)
            .bind(max_age_to_secs(draft.max_age))
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if reset {
            sqlx::query(include_str!("../queries/clear_fingerprint.sql"))
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/delete_expected_files.sql"))
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            debug!("fingerprint and expected files dropped");
        }

        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/get_cached_file.sql"))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let updated = CachedFile::try_from(row.ok_or_raise(|| ErrorKind::NotFound(format!("cached file {id}")))?)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(updated)
    }

    /// Replace the credentials of an API. Empty credentials are stored as
    /// none.
    pub async fn update_api_credentials(&self, id: ApiId, credentials: Option<&Credentials>) -> Result<Api> {
        let result = sqlx::query(include_str!("../queries/update_api_credentials.sql"))
            .bind(credentials_to_text(credentials)?)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(format!("api {id}")));
        }
        self.api_by_id(id).await
    }

    /// Make the expected files of a cached file exactly `paths`: missing ones
    /// are created, ones no longer present are deleted.
    ///
    /// Returns the resulting set, in `paths` order.
    pub async fn sync_expected_files(
        &self,
        cached_file_id: CachedFileId,
        paths: &[PathBuf],
    ) -> Result<Vec<ExpectedFile>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let existing: Vec<ExpectedFileRow> = sqlx::query_as(include_str!("../queries/list_expected_files.sql"))
            .bind(cached_file_id.0)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for stale in existing.into_iter().map(ExpectedFile::from).filter(|e| !paths.contains(&e.path)) {
            sqlx::query(include_str!("../queries/delete_expected_file.sql"))
                .bind(stale.id.0)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        let mut synced = Vec::with_capacity(paths.len());
        for path in paths {
            let draft = NewExpectedFile { cached_file_id, path: PathBuf::from(path_to_text(path)?) };
            ExpectedFile::insert(&mut *tx, &draft).await?;
            let file = ExpectedFile::find(&mut *tx, &draft)
                .await?
                .ok_or_raise(|| ErrorKind::NotFound(ExpectedFile::KIND.to_string()))?;
            synced.push(file);
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_model::{ExpectedMode, NewCachedFile, NewSource};
    use time::UtcDateTime;

    async fn setup() -> (Database, Repository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        (db, repo)
    }

    async fn seed(repo: &Repository) -> (Api, Source, CachedFile) {
        let api: Api = repo.get_or_create(&NewApi::new("census").unwrap()).await.unwrap().into_inner();
        let draft = NewSource::new(api.id, "https://example.org/data/", "downloads").unwrap();
        let source: Source = repo.get_or_create(&draft).await.unwrap().into_inner();
        let draft = NewCachedFile::new(source.id, "file.csv").unwrap();
        let file: CachedFile = repo.get_or_create(&draft).await.unwrap().into_inner();
        (api, source, file)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (_db, repo) = setup().await;
        let draft = NewApi::new("census").unwrap();
        let first = repo.get_or_create::<Api>(&draft).await.unwrap();
        let second = repo.get_or_create::<Api>(&draft).await.unwrap();
        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.into_inner(), second.into_inner());
        assert_eq!(repo.apis().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_every_entity() {
        let (_db, repo) = setup().await;
        let (api, source, file) = seed(&repo).await;
        let (api2, source2, file2) = seed(&repo).await;
        assert_eq!((api.id, source.id, file.id), (api2.id, source2.id, file2.id));
        let draft = NewExpectedFile::new(file.id, "downloads/file.csv").unwrap();
        let expected: GetOrCreate<ExpectedFile> = repo.get_or_create(&draft).await.unwrap();
        assert!(expected.was_created());
        let again: GetOrCreate<ExpectedFile> = repo.get_or_create(&draft).await.unwrap();
        assert_eq!(expected.into_inner(), again.into_inner());
        assert_eq!(repo.expected_files_for(file.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_file_attributes_round_trip() {
        let (_db, repo) = setup().await;
        let (_api, source, _file) = seed(&repo).await;
        let draft = NewCachedFile::new(source.id, "archive")
            .unwrap()
            .with_path("archive.zip")
            .unwrap()
            .with_param("format", "zip")
            .with_expected_mode(ExpectedMode::Auto)
            .with_unpack_to("unpacked")
            .unwrap()
            .with_max_age(Some(time::Duration::days(1)));
        let stored: CachedFile = repo.get_or_create(&draft).await.unwrap().into_inner();
        assert_eq!(stored.url, draft.url);
        assert_eq!(stored.path, draft.path);
        assert_eq!(stored.params, draft.params);
        assert_eq!(stored.expected_mode, ExpectedMode::Auto);
        assert_eq!(stored.unpack_to, draft.unpack_to);
        assert_eq!(stored.max_age, Some(time::Duration::days(1)));
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let (_db, repo) = setup().await;
        let (api, _, _) = seed(&repo).await;
        assert_eq!(repo.api_by_name("census").await.unwrap(), Some(api.clone()));
        assert_eq!(repo.api_by_name("missing").await.unwrap(), None);
        assert_eq!(repo.api_by_id(api.id).await.unwrap(), api);
        let err = repo.api_by_id(ApiId(999)).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cached_files_in_declaration_order() {
        let (_db, repo) = setup().await;
        let (api, first_source, _) = seed(&repo).await;
        let draft = NewSource::new(api.id, "https://mirror.example.org/", "mirror").unwrap();
        let second_source: Source = repo.get_or_create(&draft).await.unwrap().into_inner();
        for (source, url) in [(&second_source, "z.csv"), (&first_source, "b.csv"), (&second_source, "a.csv")] {
            let draft = NewCachedFile::new(source.id, url).unwrap();
            repo.get_or_create::<CachedFile>(&draft).await.unwrap();
        }
        let urls: Vec<_> = repo
            .cached_files_for_api(api.id)
            .await
            .unwrap()
            .into_iter()
            .map(|(source, file)| (source.data_dir, file.url))
            .collect();
        assert_eq!(
            urls,
            vec![
                (PathBuf::from("downloads"), "file.csv".to_string()),
                (PathBuf::from("downloads"), "b.csv".to_string()),
                (PathBuf::from("mirror"), "z.csv".to_string()),
                (PathBuf::from("mirror"), "a.csv".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_record_fetch() {
        let (_db, repo) = setup().await;
        let (_, _, file) = seed(&repo).await;
        assert!(file.fingerprint.is_none());
        let fingerprint = Fingerprint {
            hash: "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string(),
            size: 42,
            fetched_at: UtcDateTime::now().replace_nanosecond(0).unwrap(),
        };
        repo.record_fetch(file.id, &fingerprint).await.unwrap();
        assert_eq!(repo.cached_file(file.id).await.unwrap().fingerprint, Some(fingerprint.clone()));
        assert!(repo.record_fetch(CachedFileId(999), &fingerprint).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_fingerprint() {
        let (_db, repo) = setup().await;
        let (_, _, file) = seed(&repo).await;
        let fingerprint = Fingerprint { hash: "00".repeat(32), size: 7, fetched_at: UtcDateTime::now() };
        repo.record_fetch(file.id, &fingerprint).await.unwrap();
        repo.clear_fingerprint(file.id).await.unwrap();
        assert_eq!(repo.cached_file(file.id).await.unwrap().fingerprint, None);
        let err = repo.clear_fingerprint(CachedFileId(999)).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_cached_file_max_age_keeps_fingerprint() {
        let (_db, repo) = setup().await;
        let (_, source, file) = seed(&repo).await;
        let fingerprint = Fingerprint { hash: "00".repeat(32), size: 7, fetched_at: UtcDateTime::now() };
        repo.record_fetch(file.id, &fingerprint).await.unwrap();
        repo.sync_expected_files(file.id, &[PathBuf::from("downloads/file.csv")]).await.unwrap();

        let draft = NewCachedFile::new(source.id, "file.csv").unwrap().with_max_age(Some(time::Duration::minutes(5)));
        let updated = repo.update_cached_file(file.id, &draft).await.unwrap();
        assert_eq!(updated.max_age, Some(time::Duration::minutes(5)));
        assert!(updated.fingerprint.is_some());
        assert_eq!(repo.expected_files_for(file.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_cached_file_mode_resets_fetch_state() {
        let (_db, repo) = setup().await;
        let (_, source, file) = seed(&repo).await;
        let fingerprint = Fingerprint { hash: "00".repeat(32), size: 7, fetched_at: UtcDateTime::now() };
        repo.record_fetch(file.id, &fingerprint).await.unwrap();
        repo.sync_expected_files(file.id, &[PathBuf::from("downloads/file.csv")]).await.unwrap();

        let draft = NewCachedFile::new(source.id, "file.csv")
            .unwrap()
            .with_expected_mode(ExpectedMode::Auto)
            .with_unpack_to("unpacked")
            .unwrap()
            .with_param("year", "2024");
        let updated = repo.update_cached_file(file.id, &draft).await.unwrap();
        assert_eq!(updated.id, file.id);
        assert_eq!(updated.expected_mode, ExpectedMode::Auto);
        assert_eq!(updated.unpack_to, Some(PathBuf::from("unpacked")));
        assert_eq!(updated.params.get("year").map(String::as_str), Some("2024"));
        assert_eq!(updated.fingerprint, None);
        assert!(repo.expected_files_for(file.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_api_credentials() {
        let (_db, repo) = setup().await;
        let (api, _, _) = seed(&repo).await;
        let credentials = Credentials {
            token: Some(ketl_model::TokenHeader { header: "X-Key".to_string(), token: "secret".to_string() }),
            ..Default::default()
        };
        let updated = repo.update_api_credentials(api.id, Some(&credentials)).await.unwrap();
        assert_eq!(updated.credentials, Some(credentials));
        let cleared = repo.update_api_credentials(api.id, None).await.unwrap();
        assert_eq!(cleared.credentials, None);
        assert!(repo.update_api_credentials(ApiId(999), None).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_expected_files() {
        let (_db, repo) = setup().await;
        let (_, _, file) = seed(&repo).await;
        let first = vec![PathBuf::from("out/a.csv"), PathBuf::from("out/b.csv")];
        let synced = repo.sync_expected_files(file.id, &first).await.unwrap();
        assert_eq!(synced.len(), 2);
        let second = vec![PathBuf::from("out/b.csv"), PathBuf::from("out/c.csv")];
        let resynced = repo.sync_expected_files(file.id, &second).await.unwrap();
        let paths: Vec<_> = resynced.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, second);
        // The surviving record keeps its identifier.
        assert_eq!(resynced[0].id, synced[1].id);
        assert_eq!(repo.expected_files_for(file.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deleting_an_api_cascades() {
        let (db, repo) = setup().await;
        let (api, _, file) = seed(&repo).await;
        repo.sync_expected_files(file.id, &[PathBuf::from("downloads/file.csv")]).await.unwrap();
        sqlx::query("DELETE FROM apis WHERE id = ?").bind(api.id.0).execute(db.pool()).await.unwrap();
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expected_files").fetch_one(db.pool()).await.unwrap();
        assert_eq!(remaining, 0);
        assert!(repo.cached_file(file.id).await.is_err());
    }
}

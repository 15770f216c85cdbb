//! The generic half of get-or-create.
//!
//! Each persisted model type knows how to look itself up by the natural key
//! carried in its draft, and how to insert that draft without failing when a
//! record with the same key already exists. [`Repository::get_or_create`]
//! composes the two inside one transaction.
//!
//! [`Repository::get_or_create`]: crate::Repository::get_or_create

use crate::error::{ErrorKind, Result};
use crate::rows::{
    ApiRow, CachedFileRow, ExpectedFileRow, SourceRow, credentials_to_text, max_age_to_secs, params_to_text,
    path_to_text,
};
use exn::ResultExt;
use ketl_model::{Api, CachedFile, ExpectedFile, NewApi, NewCachedFile, NewExpectedFile, NewSource, Source};
use sqlx::SqliteConnection;
use std::future::Future;
use time::UtcDateTime;

mod private {
    pub trait Sealed {}
    impl Sealed for ketl_model::Api {}
    impl Sealed for ketl_model::Source {}
    impl Sealed for ketl_model::CachedFile {}
    impl Sealed for ketl_model::ExpectedFile {}
}

/// A model type persisted in the store, created from a draft.
///
/// This trait is sealed: the set of tables is fixed by the migrations.
pub trait Entity: private::Sealed + Sized + Send {
    /// Everything needed to create a record. Also the natural key.
    type Draft: Send + Sync;

    /// Human readable name, used in errors and logs.
    const KIND: &'static str;

    /// Look a record up by the natural key of `draft`.
    fn find(conn: &mut SqliteConnection, draft: &Self::Draft) -> impl Future<Output = Result<Option<Self>>> + Send;

    /// Insert `draft`, doing nothing if its natural key is already taken.
    ///
    /// Returns `true` if a row was inserted.
    fn insert(conn: &mut SqliteConnection, draft: &Self::Draft) -> impl Future<Output = Result<bool>> + Send;
}

/// Outcome of [`Repository::get_or_create`](crate::Repository::get_or_create).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrCreate<E> {
    Found(E),
    Created(E),
}
impl<E> GetOrCreate<E> {
    pub fn was_created(&self) -> bool {
        matches!(self, GetOrCreate::Created(_))
    }

    pub fn into_inner(self) -> E {
        match self {
            GetOrCreate::Found(e) | GetOrCreate::Created(e) => e,
        }
    }
}

impl Entity for Api {
    type Draft = NewApi;
    const KIND: &'static str = "api";

    async fn find(conn: &mut SqliteConnection, draft: &NewApi) -> Result<Option<Self>> {
        let row: Option<ApiRow> = sqlx::query_as(include_str!("../queries/find_api.sql"))
            .bind(&draft.name)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Api::try_from).transpose()
    }

    async fn insert(conn: &mut SqliteConnection, draft: &NewApi) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/insert_api.sql"))
            .bind(&draft.name)
            .bind(credentials_to_text(draft.credentials.as_ref())?)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

impl Entity for Source {
    type Draft = NewSource;
    const KIND: &'static str = "source";

    async fn find(conn: &mut SqliteConnection, draft: &NewSource) -> Result<Option<Self>> {
        let row: Option<SourceRow> = sqlx::query_as(include_str!("../queries/find_source.sql"))
            .bind(draft.api_id.0)
            .bind(&draft.base_url)
            .bind(path_to_text(&draft.data_dir)?)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(Source::from))
    }

    async fn insert(conn: &mut SqliteConnection, draft: &NewSource) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/insert_source.sql"))
            .bind(draft.api_id.0)
            .bind(&draft.base_url)
            .bind(path_to_text(&draft.data_dir)?)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

impl Entity for CachedFile {
    type Draft = NewCachedFile;
    const KIND: &'static str = "cached file";

    async fn find(conn: &mut SqliteConnection, draft: &NewCachedFile) -> Result<Option<Self>> {
        let row: Option<CachedFileRow> = sqlx::query_as(include_str!("../queries/find_cached_file.sql"))
            .bind(draft.source_id.0)
            .bind(&draft.url)
            .bind(path_to_text(&draft.path)?)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedFile::try_from).transpose()
    }

    async fn insert(conn: &mut SqliteConnection, draft: &NewCachedFile) -> Result<bool> {
        let unpack_to = draft.unpack_to.as_ref().map(path_to_text).transpose()?;
        let result = sqlx::query(include_str!("../queries/insert_cached_file.sql"))
            .bind(draft.source_id.0)
            .bind(&draft.url)
            .bind(path_to_text(&draft.path)?)
            .bind(params_to_text(&draft.params)?)
            .bind(draft.expected_mode.as_str())
            .bind(unpack_to)
            .bind(max_age_to_secs(draft.max_age))
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

impl Entity for ExpectedFile {
    type Draft = NewExpectedFile;
    const KIND: &'static str = "expected file";

    async fn find(conn: &mut SqliteConnection, draft: &NewExpectedFile) -> Result<Option<Self>> {
        let row: Option<ExpectedFileRow> = sqlx::query_as(include_str!("../queries/find_expected_file.sql"))
            .bind(draft.cached_file_id.0)
            .bind(path_to_text(&draft.path)?)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(ExpectedFile::from))
    }

    async fn insert(conn: &mut SqliteConnection, draft: &NewExpectedFile) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/insert_expected_file.sql"))
            .bind(draft.cached_file_id.0)
            .bind(path_to_text(&draft.path)?)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

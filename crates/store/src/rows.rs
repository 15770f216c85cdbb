//! Raw table rows and their conversion to model types.
//!
//! SQLite has no unsigned integers, no durations and no paths; everything is
//! stored as `INTEGER` or `TEXT` and checked on the way back out.

use crate::error::{Error, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use ketl_model::{Api, CachedFile, Credentials, ExpectedFile, ExpectedMode, Fingerprint, Source};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::{Duration, UtcDateTime};

pub(crate) fn path_to_text(path: impl AsRef<Path>) -> Result<String> {
    Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
}

pub(crate) fn credentials_to_text(credentials: Option<&Credentials>) -> Result<Option<String>> {
    credentials
        .filter(|c| !c.is_empty())
        .map(|c| serde_json::to_string(c).or_raise(|| ErrorKind::InvalidData("credentials")))
        .transpose()
}

pub(crate) fn params_to_text(params: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(params).or_raise(|| ErrorKind::InvalidData("params"))
}

pub(crate) fn max_age_to_secs(max_age: Option<Duration>) -> Option<i64> {
    max_age.map(|d| d.whole_seconds())
}

#[derive(sqlx::FromRow)]
pub(crate) struct ApiRow {
    id: i64,
    name: String,
    credentials: Option<String>,
    created_at: i64,
}
impl TryFrom<ApiRow> for Api {
    type Error = Error;
    fn try_from(row: ApiRow) -> Result<Self> {
        let credentials = row
            .credentials
            .map(|json| serde_json::from_str::<Credentials>(&json))
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("credentials"))?;
        Ok(Self {
            id: row.id.into(),
            name: row.name,
            credentials,
            created_at: UtcDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("creation date"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SourceRow {
    id: i64,
    api_id: i64,
    base_url: String,
    data_dir: String,
}
impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Self { id: row.id.into(), api_id: row.api_id.into(), base_url: row.base_url, data_dir: row.data_dir.into() }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CachedFileRow {
    id: i64,
    source_id: i64,
    url: String,
    path: String,
    params: String,
    expected_mode: String,
    unpack_to: Option<String>,
    max_age: Option<i64>,
    hash: Option<String>,
    size: Option<i64>,
    last_fetched_at: Option<i64>,
}
impl TryFrom<CachedFileRow> for CachedFile {
    type Error = Error;
    fn try_from(row: CachedFileRow) -> Result<Self> {
        let fingerprint = match (row.hash, row.size, row.last_fetched_at) {
            (Some(hash), Some(size), Some(fetched_at)) => Some(Fingerprint {
                hash,
                size: u64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size"))?,
                fetched_at: UtcDateTime::from_unix_timestamp(fetched_at)
                    .or_raise(|| ErrorKind::InvalidData("fetch date"))?,
            }),
            (None, None, None) => None,
            // The table constraint should make this impossible.
            _ => exn::bail!(ErrorKind::InvalidData("partial fingerprint")),
        };
        Ok(Self {
            id: row.id.into(),
            source_id: row.source_id.into(),
            url: row.url,
            path: PathBuf::from(row.path),
            params: serde_json::from_str(&row.params).or_raise(|| ErrorKind::InvalidData("params"))?,
            expected_mode: row
                .expected_mode
                .parse::<ExpectedMode>()
                .map_err(|_| ErrorKind::InvalidData("expected mode"))?,
            unpack_to: row.unpack_to.map(PathBuf::from),
            max_age: row.max_age.map(Duration::seconds),
            fingerprint,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ExpectedFileRow {
    id: i64,
    cached_file_id: i64,
    path: String,
}
impl From<ExpectedFileRow> for ExpectedFile {
    fn from(row: ExpectedFileRow) -> Self {
        Self { id: row.id.into(), cached_file_id: row.cached_file_id.into(), path: PathBuf::from(row.path) }
    }
}

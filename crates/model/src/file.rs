use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::source::ensure_relative;
use crate::{CachedFileId, ExpectedFileId, SourceId};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use time::{Duration, UtcDateTime};
use url::Url;

/// How the [`ExpectedFile`]s of a [`CachedFile`] come into existence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedMode {
    /// The cached file is its own (and only) expected file.
    #[default]
    #[serde(rename = "self")]
    Identity,
    /// Expected files are declared during setup. After a fetch they are only
    /// checked for existence.
    #[serde(alias = "success")]
    Explicit,
    /// The cached file is an archive; everything unpacked from it is expected.
    Auto,
}
impl ExpectedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedMode::Identity => "self",
            ExpectedMode::Explicit => "explicit",
            ExpectedMode::Auto => "auto",
        }
    }
}
impl Display for ExpectedMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for ExpectedMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "self" => Ok(ExpectedMode::Identity),
            "explicit" | "success" => Ok(ExpectedMode::Explicit),
            "auto" => Ok(ExpectedMode::Auto),
            other => Err(format!("unknown expected mode: {other}")),
        }
    }
}

/// What was recorded about a cached file the last time it was fetched.
///
/// The three values are only ever written together, after a transfer has
/// fully succeeded.
///
/// The hash is a change detector, not a content identifier: two different
/// contents producing the same hash are treated as unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// BLAKE3 hash (hex) of the fetched bytes.
    pub hash: String,
    /// Size in bytes of the fetched content.
    pub size: u64,
    pub fetched_at: UtcDateTime,
}

/// One retrievable remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub id: CachedFileId,
    pub source_id: SourceId,
    /// Relative to the source's base URL.
    pub url: String,
    /// Relative to the source's data directory.
    pub path: PathBuf,
    /// Query parameters appended to the resolved URL.
    pub params: BTreeMap<String, String>,
    pub expected_mode: ExpectedMode,
    /// Unpack the fetched archive into this directory (relative to the
    /// source's data directory).
    pub unpack_to: Option<PathBuf>,
    /// Re-fetch once the recorded fetch is older than this, regardless of size.
    pub max_age: Option<Duration>,
    /// `None` until the first successful fetch.
    pub fingerprint: Option<Fingerprint>,
}
impl CachedFile {
    pub fn is_fetched(&self) -> bool {
        self.fingerprint.is_some()
    }

    /// The file's own max age, falling back to a global default.
    pub fn max_age_or(&self, default: Option<Duration>) -> Option<Duration> {
        self.max_age.or(default)
    }
}

/// Draft of a [`CachedFile`]; `(source_id, url, path)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCachedFile {
    pub source_id: SourceId,
    pub url: String,
    pub path: PathBuf,
    pub params: BTreeMap<String, String>,
    pub expected_mode: ExpectedMode,
    pub unpack_to: Option<PathBuf>,
    pub max_age: Option<Duration>,
}
impl NewCachedFile {
    /// Create a draft for a URL relative to the source. The local path
    /// defaults to the last segment of the URL path.
    ///
    /// ```
    /// # use ketl_model::{NewCachedFile, SourceId};
    /// # use std::path::Path;
    /// let draft = NewCachedFile::new(SourceId(1), "releases/2024/data.csv.gz?raw=1").unwrap();
    /// assert_eq!(draft.path, Path::new("data.csv.gz"));
    /// ```
    pub fn new(source_id: SourceId, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        ensure_relative(&url)?;
        let path = default_path(&url)?;
        Ok(Self {
            source_id,
            url,
            path,
            params: BTreeMap::new(),
            expected_mode: ExpectedMode::default(),
            unpack_to: None,
            max_age: None,
        })
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.path = validate_path(path.into())?;
        Ok(self)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_expected_mode(mut self, mode: ExpectedMode) -> Self {
        self.expected_mode = mode;
        self
    }

    pub fn with_unpack_to(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        self.unpack_to = Some(validate_path(dir.into())?);
        Ok(self)
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }
}

fn default_path(url: &str) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidPath(PathBuf::from(url));
    // Any base will do, it's only needed to split the path into segments.
    let parsed = Url::parse("relative:///")
        .and_then(|base| base.join(url.trim_start_matches('/')))
        .or_raise(invalid)?;
    let segment = parsed.path_segments().and_then(|mut s| s.next_back()).unwrap_or_default();
    match segment.is_empty() {
        true => exn::bail!(invalid()),
        false => validate_path(segment),
    }
}

/// An artifact that must exist on disk once its cached file has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedFile {
    pub id: ExpectedFileId,
    pub cached_file_id: CachedFileId,
    /// Resolved local path (the source's data directory already joined).
    pub path: PathBuf,
}

/// Draft of an [`ExpectedFile`]; `(cached_file_id, path)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpectedFile {
    pub cached_file_id: CachedFileId,
    pub path: PathBuf,
}
impl NewExpectedFile {
    pub fn new(cached_file_id: CachedFileId, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        Ok(Self { cached_file_id, path })
    }
}

use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{ApiId, CachedFile, SourceId};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// An organizational node: where a group of files lives remotely, and where
/// they go locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: SourceId,
    pub api_id: ApiId,
    /// URL (or URI) prefix that cached file URLs are joined onto.
    pub base_url: String,
    /// Directory that cached file paths are joined onto.
    pub data_dir: PathBuf,
}

impl Source {
    /// Absolute fetch target of a cached file belonging to this source,
    /// including its query parameters.
    ///
    /// ```
    /// # use ketl_model::*;
    /// # use std::path::PathBuf;
    /// let source = Source {
    ///     id: SourceId(1),
    ///     api_id: ApiId(1),
    ///     base_url: "https://example.org/data/".to_string(),
    ///     data_dir: PathBuf::from("downloads"),
    /// };
    /// let draft = NewCachedFile::new(source.id, "file.csv").unwrap();
    /// assert_eq!(
    ///     source.resolve_draft_url(&draft).unwrap().as_str(),
    ///     "https://example.org/data/file.csv"
    /// );
    /// ```
    pub fn resolve_url(&self, file: &CachedFile) -> Result<Url> {
        join_url(&self.base_url, &file.url, &file.params)
    }

    /// Same as [`resolve_url`](Self::resolve_url), for a record that has not
    /// been persisted yet.
    pub fn resolve_draft_url(&self, draft: &crate::NewCachedFile) -> Result<Url> {
        join_url(&self.base_url, &draft.url, &draft.params)
    }

    /// Absolute (or working-directory relative, if the data directory is)
    /// local path of something stored under this source.
    pub fn resolve_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.data_dir.join(validate_path(relative)?))
    }
}

/// Draft of a [`Source`]; `(api_id, base_url, data_dir)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSource {
    pub api_id: ApiId,
    pub base_url: String,
    pub data_dir: PathBuf,
}
impl NewSource {
    pub fn new(api_id: ApiId, base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_url = base_url.into();
        let data_dir = data_dir.into();
        if base_url.trim().is_empty() {
            exn::bail!(ErrorKind::EmptyBaseUrl);
        }
        if data_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::EmptyDataDir);
        }
        base(&base_url)?;
        Ok(Self { api_id, base_url, data_dir })
    }
}

/// Parse a base location, making sure it ends in a slash so that joining
/// appends to the last segment instead of replacing it.
fn base(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).or_raise(|| ErrorKind::InvalidUrl(base_url.to_string()))?;
    if url.cannot_be_a_base() {
        exn::bail!(ErrorKind::InvalidUrl(base_url.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Reject anything that parses as a URL on its own.
pub(crate) fn ensure_relative(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    }
    match Url::parse(url) {
        Ok(_) => exn::bail!(ErrorKind::AbsoluteUrl(url.to_string())),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(()),
        Err(e) => Err(e).or_raise(|| ErrorKind::InvalidUrl(url.to_string())),
    }
}

fn join_url(base_url: &str, relative: &str, params: &BTreeMap<String, String>) -> Result<Url> {
    ensure_relative(relative)?;
    let mut url = base(base_url)?
        .join(relative.trim_start_matches('/'))
        .or_raise(|| ErrorKind::InvalidUrl(relative.to_string()))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewCachedFile;
    use rstest::rstest;

    fn source(base_url: &str, data_dir: &str) -> Source {
        let draft = NewSource::new(ApiId(1), base_url, data_dir).unwrap();
        Source { id: SourceId(1), api_id: draft.api_id, base_url: draft.base_url, data_dir: draft.data_dir }
    }

    #[rstest]
    #[case("https://example.org/data/", "file.csv", "https://example.org/data/file.csv")]
    #[case("https://example.org/data", "file.csv", "https://example.org/data/file.csv")]
    #[case("https://example.org", "/file.csv", "https://example.org/file.csv")]
    #[case("https://example.org/data/", "nested/dir/file.csv", "https://example.org/data/nested/dir/file.csv")]
    #[case("ftp://ftp.example.org/pub", "release.tar.gz", "ftp://ftp.example.org/pub/release.tar.gz")]
    #[case("file:///srv/mirror", "a.json", "file:///srv/mirror/a.json")]
    fn test_url_resolution(#[case] base_url: &str, #[case] relative: &str, #[case] expected: &str) {
        let source = source(base_url, "downloads");
        let draft = NewCachedFile::new(source.id, relative).unwrap();
        assert_eq!(source.resolve_draft_url(&draft).unwrap().as_str(), expected);
    }

    #[test]
    fn test_url_resolution_appends_params() {
        let source = source("https://example.org/api/", "downloads");
        let draft = NewCachedFile::new(source.id, "export")
            .unwrap()
            .with_path("export.json")
            .unwrap()
            .with_param("format", "json")
            .with_param("page", "2");
        assert_eq!(
            source.resolve_draft_url(&draft).unwrap().as_str(),
            "https://example.org/api/export?format=json&page=2"
        );
    }

    #[test]
    fn test_path_resolution() {
        let source = source("https://example.org/data/", "downloads");
        assert_eq!(source.resolve_path("file.csv").unwrap(), Path::new("downloads/file.csv"));
        assert!(source.resolve_path("../escape.csv").is_err());
    }

    #[rstest]
    #[case("", "downloads")]
    #[case("   ", "downloads")]
    #[case("https://example.org", "")]
    #[case("not a url", "downloads")]
    #[case("mailto:someone@example.org", "downloads")]
    fn test_invalid_sources(#[case] base_url: &str, #[case] data_dir: &str) {
        assert!(NewSource::new(ApiId(1), base_url, data_dir).is_err());
    }

    #[test]
    fn test_absolute_file_urls_are_rejected() {
        let err = ensure_relative("https://elsewhere.org/file.csv").unwrap_err();
        assert!(matches!(*err, ErrorKind::AbsoluteUrl(_)));
        assert!(ensure_relative("relative/file.csv").is_ok());
    }
}

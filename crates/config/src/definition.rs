//! Declarative API definitions.

use ketl_model::{Credentials, ExpectedMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::Duration;

/// An API declared in the configuration file.
///
/// ```toml
/// [[apis]]
/// name = "census"
///
/// [[apis.sources]]
/// base_url = "https://example.org/data/"
/// data_dir = "downloads/census"
///
/// [[apis.sources.files]]
/// url = "population.csv.gz"
/// max_age_secs = 86400
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub base_url: String,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub files: Vec<FileDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDefinition {
    /// Relative to the source's base URL.
    pub url: String,
    /// Relative to the source's data directory. Defaults to the last segment
    /// of the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub expected_mode: ExpectedMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack_to: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Files (relative to the source's data directory) that must exist after
    /// the fetch. Only meaningful for the `explicit` mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected: Vec<PathBuf>,
}

impl FileDefinition {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    /// Problems that make this definition unusable, if any.
    pub(crate) fn problem(&self) -> Option<String> {
        match (self.expected_mode, self.expected.is_empty()) {
            (ExpectedMode::Explicit, true) => Some(format!("{}: explicit mode without expected files", self.url)),
            (ExpectedMode::Identity | ExpectedMode::Auto, false) => {
                Some(format!("{}: expected files are only used by the explicit mode", self.url))
            },
            _ => None,
        }
    }
}

use crate::definition::ApiDefinition;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use time::Duration;
use tracing::debug;

const FILE_NAME: &str = "ketl.toml";
const ENV_PREFIX: &str = "KETL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the resource model.
    pub database: PathBuf,
    /// Re-fetch files older than this, unless they set their own max age.
    pub default_max_age_secs: Option<u64>,
    pub http: HttpSettings,
    pub log: LogSettings,
    pub apis: Vec<ApiDefinition>,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("ketl.db"),
            default_max_age_secs: None,
            http: HttpSettings::default(),
            log: LogSettings::default(),
            apis: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}
impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 300, user_agent: concat!("ketl/", env!("CARGO_PKG_VERSION")).to_string() }
    }
}
impl HttpSettings {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` takes precedence.
    pub filter: String,
    pub format: LogFormat,
}
impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_string(), format: LogFormat::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Settings {
    /// Load and validate settings from every layer.
    ///
    /// An explicit `path` must exist; the fallback locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };
        debug!(file = ?file, "loading configuration");
        let settings: Settings = Self::figment(file.as_deref()).extract().or_raise(|| ErrorKind::Load)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider, without validation.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "ketl").map(|dirs| dirs.config_dir().join(FILE_NAME)).filter(|path| path.is_file())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for api in &self.apis {
            if api.name.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid("API name must not be empty".to_string()));
            }
            if !names.insert(api.name.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate API name: {}", api.name)));
            }
            let problem = api.sources.iter().flat_map(|s| &s.files).find_map(|f| f.problem());
            if let Some(problem) = problem {
                exn::bail!(ErrorKind::Invalid(format!("{}: {problem}", api.name)));
            }
        }
        Ok(())
    }

    pub fn default_max_age(&self) -> Option<Duration> {
        self.default_max_age_secs.map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    pub fn api(&self, name: &str) -> Option<&ApiDefinition> {
        self.apis.iter().find(|api| api.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use ketl_model::ExpectedMode;

    const CONFIG: &str = r#"
        database = "state/ketl.db"
        default_max_age_secs = 3600

        [log]
        format = "json"

        [[apis]]
        name = "census"

        [apis.credentials.token]
        header = "X-Api-Key"
        token = "secret"

        [[apis.sources]]
        base_url = "https://example.org/data/"
        data_dir = "downloads"

        [[apis.sources.files]]
        url = "file.csv"

        [[apis.sources.files]]
        url = "bundle.zip"
        expected_mode = "success"
        expected = ["bundle/a.csv"]
        unpack_to = "bundle"
        params = { token = "abc" }
    "#;

    #[test]
    fn test_defaults() {
        let settings: Settings = Settings::figment(None).extract().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.http.timeout(), StdDuration::from_secs(300));
        assert_eq!(settings.default_max_age(), None);
    }

    #[test]
    fn test_file_layer() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", CONFIG)?;
            let settings = Settings::load(Some(Path::new("custom.toml"))).unwrap();
            assert_eq!(settings.database, Path::new("state/ketl.db"));
            assert_eq!(settings.default_max_age(), Some(Duration::hours(1)));
            assert_eq!(settings.log.format, LogFormat::Json);
            assert_eq!(settings.log.filter, "info");
            let api = settings.api("census").unwrap();
            assert!(api.credentials.as_ref().unwrap().token.is_some());
            let files = &api.sources[0].files;
            assert_eq!(files[0].expected_mode, ExpectedMode::Identity);
            assert_eq!(files[1].expected_mode, ExpectedMode::Explicit);
            assert_eq!(files[1].params.get("token").map(String::as_str), Some("abc"));
            Ok(())
        });
    }

    #[test]
    fn test_working_directory_file_is_discovered() {
        Jail::expect_with(|jail| {
            jail.create_file(FILE_NAME, "database = \"found.db\"")?;
            let settings = Settings::load(None).unwrap();
            assert_eq!(settings.database, Path::new("found.db"));
            Ok(())
        });
    }

    #[test]
    fn test_environment_wins() {
        Jail::expect_with(|jail| {
            jail.create_file(FILE_NAME, CONFIG)?;
            jail.set_env("KETL_DATABASE", "env.db");
            jail.set_env("KETL_HTTP__TIMEOUT_SECS", "30");
            let settings = Settings::load(None).unwrap();
            assert_eq!(settings.database, Path::new("env.db"));
            assert_eq!(settings.http.timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Settings::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_duplicate_api_names() {
        Jail::expect_with(|jail| {
            jail.create_file(FILE_NAME, "[[apis]]\nname = \"a\"\n\n[[apis]]\nname = \"a\"\n")?;
            let err = Settings::load(None).unwrap_err();
            assert!(matches!(*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_mode_needs_expected_files() {
        let toml = r#"
            [[apis]]
            name = "a"
            [[apis.sources]]
            base_url = "https://example.org/"
            data_dir = "d"
            [[apis.sources.files]]
            url = "archive.zip"
            expected_mode = "explicit"
        "#;
        Jail::expect_with(|jail| {
            jail.create_file(FILE_NAME, toml)?;
            let err = Settings::load(None).unwrap_err();
            assert!(matches!(*err, ErrorKind::Invalid(ref message) if message.contains("explicit")));
            Ok(())
        });
    }
}

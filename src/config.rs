// Configuration module: default metadata, upload limits and access tokens
// kept in a TOML file at a well-known location. Values given on the command
// line always win over the file; the file is only written by `configure`.

use crate::api::{default_upload_type, Environment};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_VAR: &str = "ZENODO_UPLOADER_CONFIG";

/// Full configuration file.
///
/// # General Layout
///
/// ```toml
/// [metadata]
/// author = "Doe, Jane"
/// affiliation = "CERN"
/// keywords = ["ocean"]
/// upload_type = "dataset"
///
/// [tokens]
/// production = "..."
/// sandbox = "..."
///
/// [limits]
/// max_file_size_gb = 50.0
/// total_size_limit_gb = 50.0
/// ```
///
/// Every section and key is optional.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for deposition metadata.
    pub metadata: MetadataDefaults,

    /// Personal access tokens per environment.
    pub tokens: Tokens,

    /// File size limits enforced before uploading.
    pub limits: Limits,
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration");
        data.parse()
    }

    /// Write configuration to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write_error = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_error)?;
        restrict_permissions(path).map_err(write_error)?;
        debug!(path = %path.display(), "saved configuration");

        Ok(())
    }

    /// Serialize as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::ser::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Token for `environment`. The flag value wins, then the environment
    /// variable, then the file.
    pub fn resolve_token(&self, environment: Environment, flag: Option<String>) -> Option<String> {
        self.resolve_token_with(environment, flag, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::resolve_token`] with the environment variable lookup
    /// supplied by the caller.
    pub fn resolve_token_with(
        &self,
        environment: Environment,
        flag: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        flag.filter(|token| !token.trim().is_empty())
            .or_else(|| lookup(token_var(environment)).filter(|token| !token.trim().is_empty()))
            .or_else(|| self.tokens.get(environment).map(str::to_string))
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

/// Metadata defaults applied when the command line leaves a field out.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataDefaults {
    /// Primary author, e.g. "Doe, Jane".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Institutional affiliation of the author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,

    pub keywords: Vec<String>,

    pub upload_type: String,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            author: None,
            affiliation: None,
            keywords: Vec::new(),
            upload_type: default_upload_type(),
        }
    }
}

/// Bearer tokens. Sandbox and production accounts are separate.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Tokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

impl Tokens {
    /// Configured token for `environment`, ignoring blank entries.
    pub fn get(&self, environment: Environment) -> Option<&str> {
        let token = match environment {
            Environment::Production => self.production.as_deref(),
            Environment::Sandbox => self.sandbox.as_deref(),
        };
        token.filter(|token| !token.trim().is_empty())
    }

    pub fn set(&mut self, environment: Environment, token: String) {
        match environment {
            Environment::Production => self.production = Some(token),
            Environment::Sandbox => self.sandbox = Some(token),
        }
    }
}

/// Size limits in gigabytes (1 GB = 1024^3 bytes).
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// Files larger than this are skipped.
    pub max_file_size_gb: f64,

    /// Uploads whose accepted files add up to more than this are refused.
    pub total_size_limit_gb: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size_gb: 50.0,
            total_size_limit_gb: 50.0,
        }
    }
}

/// Environment variable consulted for the token of `environment`.
pub fn token_var(environment: Environment) -> &'static str {
    match environment {
        Environment::Production => "ZENODO_TOKEN",
        Environment::Sandbox => "ZENODO_SANDBOX_TOKEN",
    }
}

/// Determine default absolute path to the configuration file.
///
/// Uses `$ZENODO_UPLOADER_CONFIG` when set, otherwise
/// `$XDG_CONFIG_HOME/zenodo-uploader/config.toml` (or the platform
/// equivalent). Does not check if the path exists.
///
/// # Errors
///
/// - Return [`ConfigError::NoConfigDir`] if the configuration directory cannot
///   be determined.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_VAR) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("zenodo-uploader").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

// The file holds access tokens.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to read configuration file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write configuration file '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot determine the user's configuration directory")]
    NoConfigDir,
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> Config {
        Config {
            metadata: MetadataDefaults {
                author: Some("Doe, Jane".into()),
                affiliation: Some("CERN".into()),
                keywords: vec!["ocean".into(), "climate".into()],
                upload_type: "software".into(),
            },
            tokens: Tokens {
                production: Some("prod-token".into()),
                sandbox: Some("sandbox-token".into()),
            },
            limits: Limits {
                max_file_size_gb: 2.5,
                total_size_limit_gb: 10.0,
            },
        }
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("config.toml");

        sample().save(&path)?;
        let loaded = Config::load(&path)?;

        assert_eq!(loaded, sample());

        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let loaded = Config::load(dir.path().join("absent.toml"))?;

        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.metadata.upload_type, "dataset");
        assert_eq!(loaded.limits.max_file_size_gb, 50.0);

        Ok(())
    }

    #[test]
    fn partial_file_fills_in_defaults() -> anyhow::Result<()> {
        let config: Config = indoc! {r#"
            [metadata]
            author = "Doe, Jane"

            [tokens]
            sandbox = "abc"
        "#}
        .parse()?;

        assert_eq!(config.metadata.author.as_deref(), Some("Doe, Jane"));
        assert_eq!(config.metadata.upload_type, "dataset");
        assert_eq!(config.tokens.get(Environment::Sandbox), Some("abc"));
        assert_eq!(config.tokens.get(Environment::Production), None);
        assert_eq!(config.limits, Limits::default());

        Ok(())
    }

    #[test]
    fn serialize_skips_unset_values() -> anyhow::Result<()> {
        let mut config = Config::default();
        config.tokens.set(Environment::Production, "prod".into());

        let data = config.to_toml()?;

        assert!(data.contains("[tokens]\nproduction = \"prod\"\n"));
        assert!(data.contains("upload_type = \"dataset\""));
        assert!(!data.contains("author"));
        assert!(!data.contains("sandbox"));

        Ok(())
    }

    #[test]
    fn blank_tokens_count_as_missing() {
        let tokens = Tokens {
            production: Some("   ".into()),
            sandbox: None,
        };

        assert_eq!(tokens.get(Environment::Production), None);
        assert_eq!(tokens.get(Environment::Sandbox), None);
    }

    #[test]
    fn flag_token_wins_over_file() {
        let config = sample();

        assert_eq!(
            config.resolve_token(Environment::Sandbox, Some("from-flag".into())),
            Some("from-flag".into())
        );
    }

    #[test]
    fn env_token_wins_over_file_but_not_over_flag() {
        let config = sample();
        let lookup = |name: &str| (name == "ZENODO_SANDBOX_TOKEN").then(|| "from-env".to_string());

        assert_eq!(
            config.resolve_token_with(Environment::Sandbox, None, lookup),
            Some("from-env".into())
        );
        assert_eq!(
            config.resolve_token_with(Environment::Sandbox, Some("from-flag".into()), lookup),
            Some("from-flag".into())
        );
        assert_eq!(
            config.resolve_token_with(Environment::Production, None, lookup),
            Some("prod-token".into())
        );
    }

    #[test]
    fn blank_env_token_falls_through_to_file() {
        let config = sample();

        assert_eq!(
            config.resolve_token_with(Environment::Sandbox, Some(" ".into()), |_| {
                Some("   ".to_string())
            }),
            Some("sandbox-token".into())
        );
    }

    #[test]
    fn sandbox_never_falls_back_to_production_token() {
        let mut config = Config::default();
        config.tokens.set(Environment::Production, "prod-only".into());
        let lookup = |name: &str| (name == "ZENODO_TOKEN").then(|| "prod-env".to_string());

        assert_eq!(config.resolve_token_with(Environment::Sandbox, None, lookup), None);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let result = "[metadata\nauthor = 1".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::EngineConfig;

/// How command results are printed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Indented tree or one key per line.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Terminal color theme.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Colors when stdout is a terminal.
    #[default]
    Auto,
    /// Palette for light backgrounds.
    Light,
    /// Palette for dark backgrounds.
    Dark,
    /// No colors.
    Plain,
}

/// Settings loaded from `cli.toml`. Missing files and sections fall back to
/// defaults.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl CliConfig {
    /// Reads `explicit`, or the default location when `None`.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        if let (Some(config_path), Some(0)) = (path.as_ref(), data.engine.sample_size) {
            return Err(ConfigError::InvalidValue {
                path: config_path.clone(),
                key: "engine.sample_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self { path, data })
    }

    /// File the settings were read from, when one was resolved.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `[database] default`.
    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    /// Engine settings with unset keys defaulted.
    pub fn engine(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            sample_size: self.data.engine.sample_size.unwrap_or(defaults.sample_size),
            random_seed: self.data.engine.random_seed.or(defaults.random_seed),
        }
    }

    /// `[output] format`.
    pub fn format(&self) -> OutputFormat {
        self.data.output.format.unwrap_or_default()
    }

    /// `[output] theme`.
    pub fn theme(&self) -> Theme {
        self.data.output.theme.unwrap_or_default()
    }

    /// `[repl] history`, else `~/.qdb_hist` when a home dir exists.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.data
            .repl
            .history
            .clone()
            .or_else(default_history_path)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    output: OutputSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    repl: ReplSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct EngineSection {
    sample_size: Option<usize>,
    random_seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct OutputSection {
    format: Option<OutputFormat>,
    theme: Option<Theme>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DatabaseSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ReplSection {
    history: Option<PathBuf>,
}

/// Failure to load `cli.toml`.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// File exists but could not be read.
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// File is not valid TOML for the expected layout.
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A key holds an unusable value.
    #[error("invalid `{key}` in CLI config {path}: {reason}")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        reason: String,
    },
}

/// `<config dir>/qdb/cli.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("qdb").join("cli.toml"))
}

/// `~/.qdb_hist`, when the platform has a home dir.
pub fn default_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".qdb_hist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_every_section() {
        let file = write_config(
            r#"
[engine]
sample_size = 25
random_seed = 9

[output]
format = "json"
theme = "plain"

[database]
default = "shop.json"

[repl]
history = "/tmp/qdb-history"
"#,
        );
        let config = CliConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.engine().sample_size, 25);
        assert_eq!(config.engine().random_seed, Some(9));
        assert_eq!(config.format(), OutputFormat::Json);
        assert_eq!(config.theme(), Theme::Plain);
        assert_eq!(config.default_db_path(), Some(&PathBuf::from("shop.json")));
        assert_eq!(config.history_path(), Some(PathBuf::from("/tmp/qdb-history")));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.engine(), EngineConfig::default());
        assert_eq!(config.format(), OutputFormat::Text);
        assert!(config.default_db_path().is_none());
        assert_eq!(config.history_path(), default_history_path());
    }

    #[test]
    fn rejects_bad_files() {
        let file = write_config("[engine\n");
        assert!(matches!(
            CliConfig::load(Some(file.path().to_path_buf())),
            Err(ConfigError::Parse { .. })
        ));

        let file = write_config("[engine]\nsample_size = 0\n");
        assert!(matches!(
            CliConfig::load(Some(file.path().to_path_buf())),
            Err(ConfigError::InvalidValue { key: "engine.sample_size", .. })
        ));
    }
}

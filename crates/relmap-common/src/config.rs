//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML. Every section defaults
//! sensibly so an empty file is valid and selects an in-memory database.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Storage engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. `None` selects a private in-memory database.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Enforce foreign-key referential integrity in the storage engine.
    #[serde(default)]
    pub foreign_keys: bool,

    /// Log every SQL statement at debug level.
    #[serde(default)]
    pub echo: bool,
}

fn default_pool_size() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
            foreign_keys: false,
            echo: false,
        }
    }
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file, failing if it cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.database.pool_size == 0 {
            warnings.push("database.pool_size is 0; at least one connection is required".into());
        }

        if let Some(ref path) = self.database.path {
            if path.as_os_str().is_empty() {
                warnings.push("database.path is empty; omit it to use an in-memory database".into());
            } else if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    warnings.push(format!(
                        "database.path parent directory {} does not exist",
                        parent.display()
                    ));
                }
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert!(config.database.path.is_none());
        assert_eq!(config.database.pool_size, 4);
        assert!(!config.database.foreign_keys);
        assert!(!config.database.echo);
    }

    #[test]
    fn parse_database_section() {
        let config = Config::from_toml(
            r#"
            [database]
            path = "relmap.db"
            pool_size = 2
            foreign_keys = true
            echo = true
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, Some(PathBuf::from("relmap.db")));
        assert_eq!(config.database.pool_size, 2);
        assert!(config.database.foreign_keys);
        assert!(config.database.echo);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Config::from_toml("[database\npath = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_or_default_without_path() {
        let config = Config::load_or_default(None).unwrap();
        assert!(config.database.path.is_none());
    }

    #[test]
    fn load_or_default_missing_file() {
        let config = Config::load_or_default(Some(Path::new("/nonexistent/relmap.toml"))).unwrap();
        assert_eq!(config.database.pool_size, 4);
    }

    #[test]
    fn validate_warnings() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());

        config.database.pool_size = 0;
        config.database.path = Some(PathBuf::from("/nonexistent-dir/relmap.db"));
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("pool_size"));
        assert!(warnings[1].contains("does not exist"));
    }
}

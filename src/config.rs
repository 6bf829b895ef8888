//! Compiler configuration, usually read from `blueprint.toml`.
//!
//! ```toml
//! [compile]
//! strict_paths = true
//!
//! [sql]
//! users_table = "users"
//! user_setting = "app.user_id"
//!
//! [sdk]
//! api_prefix = "/api"
//! ```

use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "blueprint.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub compile: CompileOptions,
    pub sql: SqlOptions,
    pub sdk: SdkOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Report condition paths whose first segment is not an entity instead
    /// of skipping them.
    pub strict_paths: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SqlOptions {
    /// Table holding the runtime caller's row.
    pub users_table: String,
    /// Postgres setting carrying the caller id for RLS predicates.
    pub user_setting: String,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            users_table: "users".to_string(),
            user_setting: "app.user_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkOptions {
    pub api_prefix: String,
}

impl Default for SdkOptions {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&input)
    }

    /// SQL expression yielding the current caller id.
    pub fn current_user_sql(&self) -> String {
        format!("current_setting('{}')::uuid", self.sql.user_setting)
    }
}

//! TOML-based configuration for Metrica.
//!
//! Supports a config file (metrica.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [compiler]
//! default_dialect = "postgres"
//! max_combine_depth = 8
//!
//! [cache]
//! enabled = true
//! ttl = "5m"
//! max_entries = 10000
//!
//! [execution]
//! timeout = "30s"
//! max_rows = 100000
//! max_retries = 2
//! retry_backoff = "100ms"
//!
//! [data_sources.warehouse]
//! dialect = "snowflake"
//! connection_string = "${WAREHOUSE_URL}"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolver::DEFAULT_MAX_COMBINE_DEPTH;
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub compiler: CompilerSettings,
    pub cache: CacheSettings,
    pub execution: ExecutionSettings,

    /// Named data sources, keyed by the `data_model.data_source` of metrics.
    pub data_sources: HashMap<String, DataSourceSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Dialect used when a data source does not name one.
    pub default_dialect: Dialect,

    /// How deeply `combine` references may nest.
    pub max_combine_depth: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            default_dialect: Dialect::Postgres,
            max_combine_depth: DEFAULT_MAX_COMBINE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Entry lifetime (e.g., "5m", "1h").
    pub ttl: String,

    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: "5m".to_string(),
            max_entries: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.ttl)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Wall-clock limit for one query, retries included.
    pub timeout: String,

    pub max_rows: usize,

    /// Extra attempts after a transient connector failure.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each attempt.
    pub retry_backoff: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
            max_rows: 100_000,
            max_retries: 2,
            retry_backoff: "100ms".to_string(),
        }
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.timeout)
    }

    pub fn retry_backoff(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.retry_backoff)
    }
}

/// Data source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSourceSettings {
    /// SQL dialect spoken by this source.
    pub dialect: Dialect,

    /// Connection string (supports ${ENV_VAR} expansion).
    #[serde(default)]
    pub connection_string: Option<String>,
}

impl DataSourceSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<Option<String>, ConfigError> {
        self.connection_string
            .as_deref()
            .map(expand_env_vars)
            .transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit path or the default locations.
    ///
    /// Searches in order:
    /// 1. `explicit`
    /// 2. Environment variable `METRICA_CONFIG`
    /// 3. `./metrica.toml`
    /// 4. `~/.config/metrica/config.toml`
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = env::var("METRICA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("metrica.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("metrica").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Check durations and limits up front so later lookups cannot fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.ttl()?;
        self.execution.timeout()?;
        self.execution.retry_backoff()?;
        if self.compiler.max_combine_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "compiler.max_combine_depth must be at least 1".to_string(),
            ));
        }
        if self.execution.max_rows == 0 {
            return Err(ConfigError::InvalidConfig(
                "execution.max_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a data source by name.
    pub fn data_source(&self, name: &str) -> Result<&DataSourceSettings, ConfigError> {
        self.data_sources
            .get(name)
            .ok_or_else(|| ConfigError::DataSourceNotFound(name.to_string()))
    }

    /// Dialect for a data source, falling back to `compiler.default_dialect`.
    pub fn dialect_for(&self, data_source: &str) -> Dialect {
        self.data_sources
            .get(data_source)
            .map(|ds| ds.dialect)
            .unwrap_or(self.compiler.default_dialect)
    }
}

/// Parse a duration such as `"250ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(ConfigError::InvalidDuration(s.to_string())),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

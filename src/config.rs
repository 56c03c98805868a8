//! Application configuration.
//!
//! Stored as TOML at `$FINQ_CONFIG`, else `$XDG_CONFIG_HOME/finq/config.toml`,
//! else the platform config directory. A missing file means defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! value_params = ["start_date", "end_date", "prev_start_date", "prev_end_date"]
//! template_files = ["/etc/finq/warehouse_queries.toml"]
//!
//! [tables]
//! query_history_table = "ANALYTICS.PUBLIC.QUERY_HISTORY_COPY"
//!
//! [clauses.role_filter]
//! param = "role_name"
//! column = "role_name"
//!
//! [cache]
//! ttl_secs = 3600
//! capacity_per_shard = 256
//!
//! [priority]
//! high_percentile = 0.90
//! medium_percentile = 0.75
//!
//! [sqlite]
//! busy_timeout_ms = 5000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::DEFAULT_CAPACITY_PER_SHARD;
use crate::derive::PriorityThresholds;
use crate::registry::TemplateRegistry;
use crate::resolve::{ClauseSpec, ResolverConfig, default_value_params};

/// Errors that can occur when loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity_per_shard: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity_per_shard: DEFAULT_CAPACITY_PER_SHARD,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Structural overrides, merged over the built-in table names.
    pub tables: BTreeMap<String, String>,
    /// Optional clauses, merged over the built-in `user_filter`.
    pub clauses: BTreeMap<String, ClauseSpec>,
    /// Literal placeholders that must always be supplied.
    pub value_params: Vec<String>,
    /// Extra template files, registered after the built-in namespaces.
    pub template_files: Vec<PathBuf>,
    pub cache: CacheConfig,
    pub priority: PriorityThresholds,
    pub sqlite: SqliteConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            clauses: BTreeMap::new(),
            value_params: default_value_params().into_iter().collect(),
            template_files: Vec::new(),
            cache: CacheConfig::default(),
            priority: PriorityThresholds::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            debug!(path = %path.display(), "Loaded config");
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - `$FINQ_CONFIG` if set
    /// - `$XDG_CONFIG_HOME/finq/config.toml`
    /// - platform config dir (e.g. `~/.config/finq/config.toml` on Linux)
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(explicit) = dotenvy::var("FINQ_CONFIG") {
            return Ok(PathBuf::from(explicit));
        }
        if let Ok(xdg_config) = dotenvy::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config).join("finq").join("config.toml"));
        }
        directories::ProjectDirs::from("com", "finops", "finq")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// `FINQ_CACHE_TTL_SECS` and `FINQ_CACHE_SIZE` override the `[cache]`
    /// section; unparseable values are ignored.
    fn apply_env_overrides(&mut self) {
        if let Some(ttl) = dotenvy::var("FINQ_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.cache.ttl_secs = ttl;
        }
        if let Some(size) = dotenvy::var("FINQ_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.cache.capacity_per_shard = size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (placeholder, table) in &self.tables {
            if !is_sql_identifier(table) {
                return Err(ConfigError::Validation(format!(
                    "table '{placeholder}' has an invalid identifier: {table:?}"
                )));
            }
        }
        for (name, clause) in &self.clauses {
            if !is_sql_identifier(&clause.column) {
                return Err(ConfigError::Validation(format!(
                    "clause '{name}' has an invalid column: {:?}",
                    clause.column
                )));
            }
            if clause.param.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "clause '{name}' has an empty param"
                )));
            }
        }

        let PriorityThresholds {
            high_percentile: high,
            medium_percentile: medium,
        } = self.priority;
        for (label, p) in [("high_percentile", high), ("medium_percentile", medium)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Validation(format!(
                    "{label} must be within [0, 1], got {p}"
                )));
            }
        }
        if medium > high {
            return Err(ConfigError::Validation(format!(
                "medium_percentile ({medium}) exceeds high_percentile ({high})"
            )));
        }
        if self.cache.capacity_per_shard == 0 {
            return Err(ConfigError::Validation(
                "cache.capacity_per_shard must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolver inputs: built-in tables and clauses with this config's
    /// entries layered on top.
    pub fn resolver_config(&self) -> ResolverConfig {
        let mut resolver = ResolverConfig::default();
        resolver
            .tables
            .extend(self.tables.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolver
            .clauses
            .extend(self.clauses.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolver.value_params = self.value_params.iter().cloned().collect();
        resolver
    }

    /// Built-in namespaces plus every configured template file.
    pub fn build_registry(&self) -> crate::error::Result<TemplateRegistry> {
        let mut registry = TemplateRegistry::builtin();
        for path in &self.template_files {
            registry.load_file(path)?;
        }
        Ok(registry)
    }
}

/// Table and column names may be qualified (`DB.SCHEMA.VIEW`). Each part is a
/// bare word or a word wrapped in one pair of double quotes; whitespace,
/// punctuation and comment markers never pass.
fn is_sql_identifier(s: &str) -> bool {
    s.split('.').all(|part| {
        let word = part
            .strip_prefix('"')
            .and_then(|p| p.strip_suffix('"'))
            .unwrap_or(part);
        !word.is_empty()
            && word
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$'))
    })
}

//! TOML configuration for the `cohortd` admin tool.
//!
//! Every section is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cohort_config::CONFIG_CACHE_TTL;
use cohort_registry::WriteOptions;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where the registry lives.
    pub storage: StorageSection,
    /// Configuration cache tuning.
    pub cache: CacheSection,
    /// Registry write retry limits.
    pub registry: RegistrySection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding the Fjall database.
    pub data_dir: PathBuf,
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".cohort"))
            .unwrap_or_else(|| PathBuf::from(".cohort"));
        Self {
            data_dir,
            backend: "file".to_string(),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Seconds a loaded configuration is served before reloading.
    pub ttl_secs: Option<u64>,
}

/// `[registry]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Generated identities tried per insert.
    pub max_insert_attempts: Option<u32>,
    /// Compare-and-set attempts per update.
    pub max_update_attempts: Option<u32>,
    /// Seed for identity generation, for reproducible runs.
    pub id_seed: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn is_memory(&self) -> bool {
        self.storage.backend == "memory"
    }

    /// Effective configuration cache TTL (default 60s).
    pub fn cache_ttl(&self) -> Duration {
        self.cache
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(CONFIG_CACHE_TTL)
    }

    /// Effective write retry limits.
    pub fn write_options(&self) -> WriteOptions {
        let defaults = WriteOptions::default();
        WriteOptions {
            max_insert_attempts: self
                .registry
                .max_insert_attempts
                .unwrap_or(defaults.max_insert_attempts),
            max_update_attempts: self
                .registry
                .max_update_attempts
                .unwrap_or(defaults.max_update_attempts),
        }
    }
}

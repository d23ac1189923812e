//! Error types for configuration access.

use cohort_store::StoreError;
use cohort_types::Timestamp;

/// Errors returned by [`ConfigCache`](crate::ConfigCache) and
/// [`ConfigurationDao`](crate::ConfigurationDao).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Backing store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Stored configuration is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The setting is absent and no default was supplied.
    #[error("config key \"{key}\" has no values")]
    MissingConfig {
        /// Setting name.
        key: String,
    },

    /// The setting exists but has the wrong shape.
    #[error("config key \"{key}\" {reason}")]
    InvalidConfig {
        /// Setting name.
        key: String,
        /// What is wrong with the stored value.
        reason: String,
    },

    /// No configuration is stored under the key.
    #[error("no config for \"{key}\"")]
    NotFound {
        /// Configuration key.
        key: String,
    },

    /// No configuration was committed under the key before the instant.
    #[error("no config for \"{key}\" active at {at}")]
    NotFoundAt {
        /// Configuration key.
        key: String,
        /// The instant that was asked about.
        at: Timestamp,
    },
}

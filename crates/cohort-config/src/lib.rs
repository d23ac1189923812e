//! Runtime configuration: persisted JSON blobs with full history, served
//! through a single-slot TTL cache.
//!
//! - [`ConfigurationDao`]: current value and commit-time-indexed history of
//!   each configuration key, with point-in-time lookup
//! - [`ConfigCache`]: process-wide cache handle with a test override map;
//!   pass it explicitly to whatever needs settings

mod cache;
mod dao;
mod error;

pub use cache::{CacheState, ConfigCache};
pub use dao::{ConfigurationDao, ConfigurationRecord};
pub use error::ConfigError;

use std::time::Duration;

/// Key the main server configuration is stored under.
pub const CONFIG_SINGLETON_KEY: &str = "current_config";
/// Key the database configuration is stored under.
pub const DB_CONFIG_KEY: &str = "db_config";

/// How long a loaded configuration is served before it is reloaded.
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

/// Bucket that biobank sample manifests are read from.
pub const BIOBANK_SAMPLES_BUCKET_NAME: &str = "biobank_samples_bucket_name";
/// Test codes accepted on biobank orders and counted as baseline samples.
pub const BASELINE_SAMPLE_TEST_CODES: &str = "baseline_sample_test_codes";

/// Prefix prepended to biobank ids when they are shown to biobank staff.
pub const BIOBANK_ID_PREFIX: &str = "biobank_id_prefix";
/// Whether requests from non-production clients are accepted.
pub const ALLOW_NONPROD_REQUESTS: &str = "allow_nonprod_requests";

/// Settings that must be present in a deployable configuration.
pub const REQUIRED_CONFIG_KEYS: &[&str] = &[BIOBANK_SAMPLES_BUCKET_NAME];

//! Single-slot TTL cache in front of [`ConfigurationDao`].
//!
//! One slot is shared by every key: loading a different key replaces the
//! cached one. A slot younger than the TTL is served as is, even if the store
//! changed underneath; [`ConfigCache::invalidate`] forces the next read to
//! reload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cohort_store::Store;
use cohort_types::{Clock, Timestamp};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::dao::{ConfigurationDao, ConfigurationRecord};
use crate::{
    CONFIG_CACHE_TTL, CONFIG_SINGLETON_KEY, ConfigError, DB_CONFIG_KEY, REQUIRED_CONFIG_KEYS,
};

type Result<T> = std::result::Result<T, ConfigError>;

/// Freshness of the cached slot for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing cached for the key.
    Empty,
    /// Cached and younger than the TTL.
    Fresh,
    /// Cached but past the TTL; the next read reloads.
    Stale,
}

struct CachedConfig {
    key: String,
    value: Value,
    loaded_at: Timestamp,
}

/// Process-scoped configuration handle.
///
/// Holds the cached slot and the override map. Starts empty; create one per
/// process (or per test) and pass it to whatever needs settings.
pub struct ConfigCache {
    dao: ConfigurationDao,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: Mutex<Option<CachedConfig>>,
    /// Setting name → value, consulted before the stored configuration.
    overrides: RwLock<HashMap<String, Value>>,
}

impl ConfigCache {
    /// A cache with the default TTL of [`CONFIG_CACHE_TTL`].
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(store, clock, CONFIG_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<Store>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            dao: ConfigurationDao::new(store, Arc::clone(&clock)),
            clock,
            ttl,
            slot: Mutex::new(None),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Direct access to the uncached records.
    pub fn dao(&self) -> &ConfigurationDao {
        &self.dao
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn state(&self, key: &str) -> CacheState {
        let slot = self.slot.lock().expect("config cache lock poisoned");
        match slot.as_ref() {
            Some(cached) if cached.key == key => {
                if self.is_fresh(cached) {
                    CacheState::Fresh
                } else {
                    CacheState::Stale
                }
            }
            _ => CacheState::Empty,
        }
    }

    fn is_fresh(&self, cached: &CachedConfig) -> bool {
        self.clock.now().duration_since(cached.loaded_at) < self.ttl
    }

    /// The whole configuration blob stored under `key`.
    ///
    /// A missing [`CONFIG_SINGLETON_KEY`] is bootstrapped as `{}`; any other
    /// missing key is [`ConfigError::NotFound`].
    pub fn get(&self, key: &str) -> Result<Value> {
        // Held across the reload so concurrent readers load at most once.
        let mut slot = self.slot.lock().expect("config cache lock poisoned");
        if let Some(cached) = slot.as_ref()
            && cached.key == key
            && self.is_fresh(cached)
        {
            return Ok(cached.value.clone());
        }

        let value = self.load(key)?;
        debug!(key, "loaded configuration into cache");
        *slot = Some(CachedConfig {
            key: key.to_string(),
            value: value.clone(),
            loaded_at: self.clock.now(),
        });
        Ok(value)
    }

    fn load(&self, key: &str) -> Result<Value> {
        if let Some(record) = self.dao.load_if_present(key)? {
            return Ok(record.configuration);
        }
        if key != CONFIG_SINGLETON_KEY {
            return Err(ConfigError::NotFound {
                key: key.to_string(),
            });
        }
        info!(key, "no configuration stored, initializing empty configuration");
        self.dao.store_if_absent(key, json!({}))?;
        Ok(self.dao.load(key)?.configuration)
    }

    /// Drop the cached slot so the next [`get`](Self::get) reloads.
    pub fn invalidate(&self) {
        *self.slot.lock().expect("config cache lock poisoned") = None;
    }

    /// The database configuration blob, through the cache.
    pub fn db_config(&self) -> Result<Value> {
        self.get(DB_CONFIG_KEY)
    }

    // ----- Settings -----

    /// The raw value of one setting in the main configuration.
    ///
    /// Overrides win over stored values; `default` is used when neither has
    /// the setting.
    pub fn get_setting_json(&self, name: &str, default: Option<Value>) -> Result<Value> {
        if let Some(value) = self
            .overrides
            .read()
            .expect("config overrides lock poisoned")
            .get(name)
        {
            return Ok(value.clone());
        }
        let config = self.get(CONFIG_SINGLETON_KEY)?;
        match config.get(name) {
            Some(value) => Ok(value.clone()),
            None => default.ok_or_else(|| ConfigError::MissingConfig {
                key: name.to_string(),
            }),
        }
    }

    /// A list-valued setting.
    pub fn get_setting_list(
        &self,
        name: &str,
        default: Option<Vec<Value>>,
    ) -> Result<Vec<Value>> {
        match self.get_setting_json(name, default.map(Value::Array))? {
            Value::Array(values) => Ok(values),
            other => Err(ConfigError::InvalidConfig {
                key: name.to_string(),
                reason: format!("is not a list: {other}"),
            }),
        }
    }

    /// A single-valued setting, stored as a one-element list.
    pub fn get_setting(&self, name: &str, default: Option<Value>) -> Result<Value> {
        let mut values = self.get_setting_list(name, default.map(|d| vec![d]))?;
        if values.len() != 1 {
            return Err(ConfigError::InvalidConfig {
                key: name.to_string(),
                reason: format!("has {} values; expected 1", values.len()),
            });
        }
        Ok(values.remove(0))
    }

    /// A list setting whose elements must all be strings.
    pub fn get_setting_strings(
        &self,
        name: &str,
        default: Option<&[&str]>,
    ) -> Result<Vec<String>> {
        let default = default.map(|d| d.iter().map(|s| Value::from(*s)).collect());
        self.get_setting_list(name, default)?
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(ConfigError::InvalidConfig {
                    key: name.to_string(),
                    reason: format!("contains a non-string value: {other}"),
                }),
            })
            .collect()
    }

    /// Serve `value` for `name` regardless of what is stored.
    pub fn override_setting(&self, name: &str, value: Value) {
        self.overrides
            .write()
            .expect("config overrides lock poisoned")
            .insert(name.to_string(), value);
    }

    /// Remove every override.
    pub fn clear_overrides(&self) {
        self.overrides
            .write()
            .expect("config overrides lock poisoned")
            .clear();
    }

    // ----- Writes -----

    /// Replace the blob under `key` and invalidate the cache.
    pub fn store_config(&self, key: &str, value: Value) -> Result<ConfigurationRecord> {
        let record = self.dao.store(key, value)?;
        self.invalidate();
        Ok(record)
    }

    /// Set one setting in the main configuration, keeping the others.
    ///
    /// The merge reads the stored blob, not the cached one, so settings
    /// written behind the cache survive.
    pub fn insert_config(&self, name: &str, values: Vec<Value>) -> Result<ConfigurationRecord> {
        let record = self
            .dao
            .update_setting(CONFIG_SINGLETON_KEY, name, Value::Array(values))?;
        self.invalidate();
        Ok(record)
    }

    /// The blob that was active under `key` at `at`. Bypasses the cache.
    pub fn get_config_active_at(&self, key: &str, at: Timestamp) -> Result<Value> {
        Ok(self.dao.active_at(key, at)?.configuration)
    }

    /// Required settings that are missing from the main configuration.
    pub fn check_required(&self) -> Result<Vec<&'static str>> {
        let config = self.get(CONFIG_SINGLETON_KEY)?;
        let empty = Map::new();
        let settings = config.as_object().unwrap_or(&empty);
        Ok(REQUIRED_CONFIG_KEYS
            .iter()
            .copied()
            .filter(|k| !settings.contains_key(*k))
            .collect())
    }
}

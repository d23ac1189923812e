//! Persistence for configuration blobs and their history.

use std::sync::Arc;

use cohort_store::{Store, StoreError, Writer};
use cohort_types::{Clock, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::ConfigError;

type Result<T> = std::result::Result<T, ConfigError>;

/// Current configuration per key.
const CONFIG_TABLE: &str = "configuration";
/// `key ++ 0x00 ++ committed_at (8 bytes BE) ++ version (4 bytes BE)` → record.
const CONFIG_HISTORY_TABLE: &str = "configuration_history";

/// One committed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub key: String,
    pub configuration: Value,
    /// 1 for the first value stored under `key`.
    pub version: u32,
    pub committed_at: Timestamp,
}

/// Reads and writes configuration records.
///
/// Every [`store`](Self::store) replaces the current value and appends to the
/// key's history in the same write unit.
pub struct ConfigurationDao {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl ConfigurationDao {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The current record for `key`, if any.
    pub fn load_if_present(&self, key: &str) -> Result<Option<ConfigurationRecord>> {
        match self.store.get(CONFIG_TABLE, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The current record for `key`, or [`ConfigError::NotFound`].
    pub fn load(&self, key: &str) -> Result<ConfigurationRecord> {
        self.load_if_present(key)?.ok_or_else(|| ConfigError::NotFound {
            key: key.to_string(),
        })
    }

    /// Replace the value under `key` and record it in history.
    pub fn store(&self, key: &str, configuration: Value) -> Result<ConfigurationRecord> {
        let now = self.clock.now();
        self.store.write(|w| -> Result<ConfigurationRecord> {
            let version = current_in(w, key)?.map_or(1, |r| r.version + 1);
            stage(w, key, configuration, version, now)
        })
    }

    /// Set one top-level setting of the object stored under `key`, keeping
    /// every other setting.
    ///
    /// The current value is read and replaced in one write unit, so settings
    /// committed by other writers are never lost. A missing key starts from
    /// `{}`; a stored value that is not an object is
    /// [`ConfigError::InvalidConfig`].
    pub fn update_setting(
        &self,
        key: &str,
        name: &str,
        value: Value,
    ) -> Result<ConfigurationRecord> {
        let now = self.clock.now();
        self.store.write(|w| -> Result<ConfigurationRecord> {
            let current = current_in(w, key)?;
            let version = current.as_ref().map_or(1, |r| r.version + 1);
            let mut settings = match current.map(|r| r.configuration) {
                None => Map::new(),
                Some(Value::Object(map)) => map,
                Some(other) => {
                    return Err(ConfigError::InvalidConfig {
                        key: key.to_string(),
                        reason: format!("is not an object: {other}"),
                    });
                }
            };
            settings.insert(name.to_string(), value);
            stage(w, key, Value::Object(settings), version, now)
        })
    }

    /// Store `configuration` under `key` only if nothing is stored there yet.
    ///
    /// Returns `false` if a value already existed.
    pub fn store_if_absent(&self, key: &str, configuration: Value) -> Result<bool> {
        let now = self.clock.now();
        let result = self.store.write(|w| -> Result<()> {
            w.expect_absent(CONFIG_TABLE, key.as_bytes(), key)?;
            stage(w, key, configuration, 1, now).map(|_| ())
        });
        match result {
            Ok(()) => Ok(true),
            Err(ConfigError::Store(StoreError::AlreadyExists { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every value ever committed under `key`, oldest first.
    pub fn history(&self, key: &str) -> Result<Vec<ConfigurationRecord>> {
        self.store
            .prefix_raw(CONFIG_HISTORY_TABLE, &history_prefix(key))?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(ConfigError::from))
            .collect()
    }

    /// The value that was active at `at`: the latest one committed strictly
    /// before it.
    pub fn active_at(&self, key: &str, at: Timestamp) -> Result<ConfigurationRecord> {
        let lo = history_prefix(key);
        let mut hi = lo.clone();
        hi.extend_from_slice(&at.to_key());

        match self.store.last_before(CONFIG_HISTORY_TABLE, &lo, &hi)? {
            Some((_, bytes)) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(ConfigError::NotFoundAt {
                key: key.to_string(),
                at,
            }),
        }
    }
}

/// The committed or buffered record for `key` inside a write unit.
fn current_in(w: &Writer<'_>, key: &str) -> Result<Option<ConfigurationRecord>> {
    match w.get(CONFIG_TABLE, key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Write `configuration` as the current value of `key` and append it to
/// the key's history.
fn stage(
    w: &mut Writer<'_>,
    key: &str,
    configuration: Value,
    version: u32,
    now: Timestamp,
) -> Result<ConfigurationRecord> {
    let record = ConfigurationRecord {
        key: key.to_string(),
        configuration,
        version,
        committed_at: now,
    };
    let bytes = serde_json::to_vec(&record)?;
    w.put(CONFIG_HISTORY_TABLE, history_key(key, now, version), bytes.clone());
    w.put(CONFIG_TABLE, key.as_bytes(), bytes);
    debug!(key, version, committed_at = %now, "stored configuration");
    Ok(record)
}

fn history_prefix(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(key.len() + 1);
    prefix.extend_from_slice(key.as_bytes());
    prefix.push(0);
    prefix
}

fn history_key(key: &str, committed_at: Timestamp, version: u32) -> Vec<u8> {
    let mut k = history_prefix(key);
    k.extend_from_slice(&committed_at.to_key());
    k.extend_from_slice(&version.to_be_bytes());
    k
}

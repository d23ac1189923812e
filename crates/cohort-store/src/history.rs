//! Append-only history of versioned records.
//!
//! Every version of every versioned entity is kept as a full snapshot keyed by
//! `entity key ++ version (4 bytes BE)`. Snapshots rather than diffs make
//! reconstructing any past version a single lookup.

use std::marker::PhantomData;
use std::sync::Arc;

use cohort_types::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{Store, Writer};

type Result<T> = std::result::Result<T, StoreError>;

/// Immutable snapshot of an entity at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord<T> {
    pub snapshot: T,
    pub recorded_at: Timestamp,
}

/// Append-only ledger over one history table.
pub struct HistoryLedger {
    store: Arc<Store>,
    table: &'static str,
}

impl HistoryLedger {
    pub fn new(store: Arc<Store>, table: &'static str) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Append the snapshot for `version` within the caller's write unit.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if that version was already
    /// recorded; history is never overwritten.
    pub fn append<T: Serialize>(
        &self,
        w: &mut Writer<'_>,
        entity_key: &[u8],
        version: u32,
        record: &HistoryRecord<T>,
    ) -> Result<()> {
        let key = history_key(entity_key, version);
        w.expect_absent(self.table, &key, format!("{}@v{version}", hex_key(entity_key)))?;
        w.put_record(self.table, key, record)
    }

    /// The snapshot recorded for `version`, if any.
    pub fn get<T: DeserializeOwned>(
        &self,
        entity_key: &[u8],
        version: u32,
    ) -> Result<Option<HistoryRecord<T>>> {
        self.store
            .get_record(self.table, &history_key(entity_key, version))
    }

    /// Lazily iterate all snapshots of an entity in version order.
    pub fn list_versions<T: DeserializeOwned>(&self, entity_key: &[u8]) -> HistoryIter<T> {
        HistoryIter {
            store: Arc::clone(&self.store),
            table: self.table,
            entity_key: entity_key.to_vec(),
            next_version: 1,
            done: false,
            _marker: PhantomData,
        }
    }
}

/// Lazy, finite iterator over an entity's history, oldest first.
///
/// Each step is a point lookup for the next version; iteration ends at the
/// first version with no record. Clone it (or call [`restart`]) to replay.
///
/// [`restart`]: HistoryIter::restart
pub struct HistoryIter<T> {
    store: Arc<Store>,
    table: &'static str,
    entity_key: Vec<u8>,
    next_version: u32,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HistoryIter<T> {
    /// Rewind to version 1.
    pub fn restart(&mut self) {
        self.next_version = 1;
        self.done = false;
    }
}

impl<T> Clone for HistoryIter<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            table: self.table,
            entity_key: self.entity_key.clone(),
            next_version: self.next_version,
            done: self.done,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Iterator for HistoryIter<T> {
    type Item = Result<HistoryRecord<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let key = history_key(&self.entity_key, self.next_version);
        match self.store.get_record(self.table, &key) {
            Ok(Some(record)) => {
                self.next_version += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// `entity_key ++ version (4 bytes BE)`.
fn history_key(entity_key: &[u8], version: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(entity_key.len() + 4);
    key.extend_from_slice(entity_key);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

pub(crate) fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

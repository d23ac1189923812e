//! Generic optimistic-concurrency CRUD over versioned entities.

use std::marker::PhantomData;
use std::sync::Arc;

use cohort_types::{LogPosition, Timestamp, Versioned};
use tracing::debug;

use crate::error::StoreError;
use crate::history::{HistoryIter, HistoryLedger, HistoryRecord};
use crate::store::{FeedEntry, Store, Writer};

type Result<T> = std::result::Result<T, StoreError>;

/// Typed access to one [`Versioned`] table and its history.
///
/// Writes are staged into a caller's [`Writer`] so that the entity, its
/// history record, its feed entry and anything else the caller derives from
/// it (summaries, indexes) commit as one unit.
pub struct VersionedTable<T> {
    store: Arc<Store>,
    history: HistoryLedger,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Versioned> VersionedTable<T> {
    pub fn new(store: Arc<Store>) -> Self {
        let history = HistoryLedger::new(Arc::clone(&store), T::HISTORY_TABLE);
        Self {
            store,
            history,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current version of an entity.
    pub fn get(&self, id: &T::Id) -> Result<Option<T>> {
        self.store.get_record(T::TABLE, &T::encode_id(id))
    }

    /// Current version of an entity as seen inside a write unit.
    pub fn get_in(&self, w: &Writer<'_>, id: &T::Id) -> Result<Option<T>> {
        w.get_record(T::TABLE, &T::encode_id(id))
    }

    /// Snapshot of an entity at a specific version.
    pub fn get_version(&self, id: &T::Id, version: u32) -> Result<Option<HistoryRecord<T>>> {
        self.history.get(&T::encode_id(id), version)
    }

    /// All versions of an entity, oldest first.
    pub fn history(&self, id: &T::Id) -> HistoryIter<T> {
        self.history.list_versions(&T::encode_id(id))
    }

    /// Every current entity in the table, in key order.
    pub fn list(&self) -> Result<Vec<T>> {
        self.store.prefix_records(T::TABLE, &[])
    }

    /// Stage the first version of a new entity.
    ///
    /// Sets `version = 1` and both timestamps to `now`, allocates a
    /// LogPosition, and writes the entity, its first history record and its
    /// feed entry.
    pub fn stage_insert(
        &self,
        w: &mut Writer<'_>,
        entity: &mut T,
        now: Timestamp,
    ) -> Result<LogPosition> {
        let key = entity.key();
        w.expect_absent(T::TABLE, &key, entity.id())?;

        entity.set_version(1);
        entity.set_created_at(now);
        entity.set_last_modified(now);
        self.stage(w, entity, key, now)
    }

    /// Stage the next version of an existing entity.
    ///
    /// `expected_version` is the version the caller loaded; if the stored
    /// version has moved on, fails with [`StoreError::VersionConflict`] and
    /// the caller should reload and retry.
    pub fn stage_update(
        &self,
        w: &mut Writer<'_>,
        entity: &mut T,
        expected_version: u32,
        now: Timestamp,
    ) -> Result<LogPosition> {
        let key = entity.key();
        let current: T = w
            .get_record(T::TABLE, &key)?
            .ok_or_else(|| StoreError::NotFound {
                table: T::TABLE,
                key: entity.id().to_string(),
            })?;
        if current.version() != expected_version {
            return Err(StoreError::VersionConflict {
                table: T::TABLE,
                key: entity.id().to_string(),
                expected: expected_version,
                actual: current.version(),
            });
        }

        entity.set_version(expected_version + 1);
        entity.set_last_modified(now);
        self.stage(w, entity, key, now)
    }

    fn stage(
        &self,
        w: &mut Writer<'_>,
        entity: &mut T,
        key: Vec<u8>,
        now: Timestamp,
    ) -> Result<LogPosition> {
        let position = w.next_position();
        entity.set_log_position(position);

        let record = HistoryRecord {
            snapshot: entity.clone(),
            recorded_at: now,
        };
        self.history.append(w, &key, entity.version(), &record)?;
        w.append_feed(&FeedEntry {
            position,
            table: T::TABLE.to_string(),
            key: key.clone(),
            version: entity.version(),
        })?;
        w.put_record(T::TABLE, key, &*entity)?;

        debug!(
            table = T::TABLE,
            id = %entity.id(),
            version = entity.version(),
            %position,
            "staged versioned write"
        );
        Ok(position)
    }

    /// Current entities whose latest write is after `after`, ordered by that
    /// write's LogPosition.
    ///
    /// Older writes to the same entity are skipped, so each entity appears at
    /// most once, at its latest position.
    pub fn changed_since(&self, after: LogPosition, limit: usize) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut cursor = after;
        while out.len() < limit {
            let batch = self.store.changes_since(cursor, limit)?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.position;
            for entry in batch {
                if entry.table != T::TABLE {
                    continue;
                }
                let Some(entity) = self.store.get_record::<T>(T::TABLE, &entry.key)? else {
                    continue;
                };
                if entity.log_position() == entry.position {
                    out.push(entity);
                    if out.len() == limit {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }
}

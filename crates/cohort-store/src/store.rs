//! [`Store`] and its atomic unit of work, [`Writer`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use cohort_types::LogPosition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, Op};
use crate::error::StoreError;
use crate::{FEED_TABLE, META_TABLE};

type Result<T> = std::result::Result<T, StoreError>;

/// Key in [`META_TABLE`] holding the last committed [`LogPosition`].
const LAST_POSITION_KEY: &[u8] = b"last_log_position";

/// One committed write to a participating table, as seen by sync clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub position: LogPosition,
    pub table: String,
    /// Entity key within `table`.
    pub key: Vec<u8>,
    /// Entity version produced by the write.
    pub version: u32,
}

/// Record store backed by Fjall or memory.
///
/// Reads see only committed data. Writes are serialized through a single
/// commit lock, which also guards the LogPosition counter, so allocation
/// order equals commit order.
pub struct Store {
    backend: Backend,
    /// Last committed LogPosition.
    commit_lock: Mutex<LogPosition>,
}

impl Store {
    /// Open a persistent store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Backend::open(path)?)
    }

    /// Open a temporary Fjall store that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        Self::init(Backend::open_temporary()?)
    }

    /// Create a pure in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::in_memory(),
            commit_lock: Mutex::new(LogPosition::ZERO),
        }
    }

    fn init(backend: Backend) -> Result<Self> {
        let last = match backend.get(META_TABLE, LAST_POSITION_KEY)? {
            Some(bytes) => decode_position(&bytes)?,
            None => LogPosition::ZERO,
        };
        debug!(last_position = %last, "opened record store");
        Ok(Self {
            backend,
            commit_lock: Mutex::new(last),
        })
    }

    // ----- Reads -----

    /// Raw bytes stored under `key`.
    pub fn get(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(table, key)
    }

    /// Decode the record stored under `key`.
    pub fn get_record<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        match self.backend.get(table, key)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every record whose key starts with `prefix`, in key order.
    pub fn prefix_records<T: DeserializeOwned>(
        &self,
        table: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        self.backend
            .prefix(table, prefix)?
            .into_iter()
            .map(|(_, v)| postcard::from_bytes(&v).map_err(StoreError::from))
            .collect()
    }

    /// Raw entries whose key starts with `prefix`, in key order.
    pub fn prefix_raw(
        &self,
        table: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.prefix(table, prefix)
    }

    /// The entry with the greatest key in `[lo, hi)`.
    pub fn last_before(
        &self,
        table: &'static str,
        lo: &[u8],
        hi: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.backend.last_in_range(table, lo, hi)
    }

    /// The most recently committed LogPosition ([`LogPosition::ZERO`] if none).
    pub fn last_position(&self) -> LogPosition {
        *self.commit_lock.lock().expect("commit lock poisoned")
    }

    /// Up to `limit` feed entries with a position strictly after `after`,
    /// in position order.
    pub fn changes_since(&self, after: LogPosition, limit: usize) -> Result<Vec<FeedEntry>> {
        self.backend
            .scan_after(FEED_TABLE, &after.to_key(), limit)?
            .into_iter()
            .map(|(_, v)| postcard::from_bytes(&v).map_err(StoreError::from))
            .collect()
    }

    // ----- Writes -----

    /// Run `f` as one atomic unit of work.
    ///
    /// The commit lock is held for the whole closure, so write units are
    /// serialized across every table: nothing else commits between the
    /// closure's reads and its batch. Reads made before calling `write` are
    /// not covered and must be re-checked inside the closure.
    ///
    /// The closure sees committed state plus its own buffered writes. If it
    /// returns `Err`, nothing is written and any positions it allocated are
    /// released. If it returns `Ok`, all buffered writes and the advanced
    /// LogPosition counter are committed in a single batch.
    pub fn write<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Writer<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut committed = self.commit_lock.lock().expect("commit lock poisoned");
        let mut writer = Writer {
            store: self,
            ops: Vec::new(),
            pending: HashMap::new(),
            start: *committed,
            position: *committed,
        };

        let out = f(&mut writer)?;

        let Writer {
            mut ops,
            start,
            position,
            ..
        } = writer;
        if position != start {
            ops.push(Op::Put {
                table: META_TABLE,
                key: LAST_POSITION_KEY.to_vec(),
                value: position.to_key().to_vec(),
            });
        }
        if ops.is_empty() {
            return Ok(out);
        }

        let op_count = ops.len();
        self.backend.apply(ops)?;
        *committed = position;
        debug!(ops = op_count, last_position = %position, "committed write unit");
        Ok(out)
    }
}

/// Buffered view of the store inside [`Store::write`].
pub struct Writer<'a> {
    store: &'a Store,
    ops: Vec<Op>,
    /// Latest buffered value per key (`None` = deleted), for read-your-writes.
    pending: HashMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
    start: LogPosition,
    position: LogPosition,
}

impl Writer<'_> {
    /// Read a key, seeing this unit's own buffered writes first.
    pub fn get(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(buffered) = self.pending.get(&(table, key.to_vec())) {
            return Ok(buffered.clone());
        }
        self.store.backend.get(table, key)
    }

    pub fn get_record<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        match self.get(table, key)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fail with [`StoreError::AlreadyExists`] if `key` is present.
    pub fn expect_absent(
        &self,
        table: &'static str,
        key: &[u8],
        display_key: impl ToString,
    ) -> Result<()> {
        if self.get(table, key)?.is_some() {
            return Err(StoreError::AlreadyExists {
                table,
                key: display_key.to_string(),
            });
        }
        Ok(())
    }

    pub fn put(&mut self, table: &'static str, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        let key = key.into();
        self.pending.insert((table, key.clone()), Some(value.clone()));
        self.ops.push(Op::Put { table, key, value });
    }

    pub fn put_record<T: Serialize>(
        &mut self,
        table: &'static str,
        key: impl Into<Vec<u8>>,
        record: &T,
    ) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.put(table, key, value);
        Ok(())
    }

    pub fn delete(&mut self, table: &'static str, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.pending.insert((table, key.clone()), None);
        self.ops.push(Op::Delete { table, key });
    }

    /// Allocate the next LogPosition.
    ///
    /// Strictly greater than every position committed before this unit and
    /// every position allocated earlier in it.
    pub fn next_position(&mut self) -> LogPosition {
        self.position = self.position.next();
        self.position
    }

    /// Record a committed-on-success write in the change feed.
    pub fn append_feed(&mut self, entry: &FeedEntry) -> Result<()> {
        self.put_record(FEED_TABLE, entry.position.to_key(), entry)
    }
}

fn decode_position(bytes: &[u8]) -> Result<LogPosition> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt {
        table: META_TABLE,
        reason: format!("log position is {} bytes, expected 8", bytes.len()),
    })?;
    Ok(LogPosition::new(u64::from_be_bytes(arr)))
}

//! Storage backend for the record store (Fjall disk or pure in-memory).

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};

use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// A buffered mutation, applied as part of one atomic batch.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Put {
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: &'static str,
        key: Vec<u8>,
    },
}

/// table name → ordered key/value map.
type MemoryTables = HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>;

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
pub(crate) enum Backend {
    Fjall {
        db: Database,
        /// Keyspaces opened so far, one per table.
        keyspaces: RwLock<HashMap<&'static str, Keyspace>>,
        /// Directory of a temporary database. Declared after `db` so the
        /// database closes before the directory is removed.
        _tmp: Option<tempfile::TempDir>,
    },
    /// All tables behind one lock so a batch is applied in a single
    /// critical section and readers never see half of it.
    Memory(RwLock<MemoryTables>),
}

impl Backend {
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Ok(Self::from_db(db, None))
    }

    pub(crate) fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        // Keyspaces are created lazily, so the directory must outlive this call.
        Ok(Self::from_db(db, Some(tmp)))
    }

    pub(crate) fn in_memory() -> Self {
        Self::Memory(RwLock::new(HashMap::new()))
    }

    fn from_db(db: Database, tmp: Option<tempfile::TempDir>) -> Self {
        Self::Fjall {
            db,
            keyspaces: RwLock::new(HashMap::new()),
            _tmp: tmp,
        }
    }

    /// Open (or create) the keyspace backing `table`.
    fn keyspace(
        db: &Database,
        cache: &RwLock<HashMap<&'static str, Keyspace>>,
        table: &'static str,
    ) -> Result<Keyspace> {
        if let Some(ks) = cache.read().expect("keyspace lock poisoned").get(table) {
            return Ok(ks.clone());
        }
        let mut cache = cache.write().expect("keyspace lock poisoned");
        if let Some(ks) = cache.get(table) {
            return Ok(ks.clone());
        }
        let ks = db.keyspace(table, KeyspaceCreateOptions::default)?;
        cache.insert(table, ks.clone());
        Ok(ks)
    }

    pub(crate) fn get(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            Backend::Fjall { db, keyspaces, .. } => {
                let ks = Self::keyspace(db, keyspaces, table)?;
                Ok(ks.get(key)?.map(|v| v.to_vec()))
            }
            Backend::Memory(m) => Ok(m
                .read()
                .expect("memory lock poisoned")
                .get(table)
                .and_then(|t| t.get(key))
                .cloned()),
        }
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub(crate) fn prefix(
        &self,
        table: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Backend::Fjall { db, keyspaces, .. } => {
                let ks = Self::keyspace(db, keyspaces, table)?;
                let mut out = Vec::new();
                for guard in ks.prefix(prefix) {
                    let (k, v) = guard.into_inner()?;
                    out.push((k.to_vec(), v.to_vec()));
                }
                Ok(out)
            }
            Backend::Memory(m) => {
                let tables = m.read().expect("memory lock poisoned");
                let Some(t) = tables.get(table) else {
                    return Ok(Vec::new());
                };
                Ok(t.range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect())
            }
        }
    }

    /// Up to `limit` entries with key strictly greater than `after`.
    pub(crate) fn scan_after(
        &self,
        table: &'static str,
        after: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let bounds = (Bound::Excluded(after.to_vec()), Bound::Unbounded);
        match self {
            Backend::Fjall { db, keyspaces, .. } => {
                let ks = Self::keyspace(db, keyspaces, table)?;
                let mut out = Vec::new();
                for guard in ks.range(bounds).take(limit) {
                    let (k, v) = guard.into_inner()?;
                    out.push((k.to_vec(), v.to_vec()));
                }
                Ok(out)
            }
            Backend::Memory(m) => {
                let tables = m.read().expect("memory lock poisoned");
                let Some(t) = tables.get(table) else {
                    return Ok(Vec::new());
                };
                Ok(t.range(bounds)
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect())
            }
        }
    }

    /// The entry with the greatest key in `[lo, hi)`.
    pub(crate) fn last_in_range(
        &self,
        table: &'static str,
        lo: &[u8],
        hi: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if lo >= hi {
            return Ok(None);
        }
        match self {
            Backend::Fjall { db, keyspaces, .. } => {
                let ks = Self::keyspace(db, keyspaces, table)?;
                match ks.range(lo.to_vec()..hi.to_vec()).next_back() {
                    Some(guard) => {
                        let (k, v) = guard.into_inner()?;
                        Ok(Some((k.to_vec(), v.to_vec())))
                    }
                    None => Ok(None),
                }
            }
            Backend::Memory(m) => {
                let tables = m.read().expect("memory lock poisoned");
                Ok(tables.get(table).and_then(|t| {
                    t.range(lo.to_vec()..hi.to_vec())
                        .next_back()
                        .map(|(k, v)| (k.clone(), v.clone()))
                }))
            }
        }
    }

    /// Apply all ops atomically.
    pub(crate) fn apply(&self, ops: Vec<Op>) -> Result<()> {
        match self {
            Backend::Fjall { db, keyspaces, .. } => {
                let mut batch = db.batch();
                for op in ops {
                    match op {
                        Op::Put { table, key, value } => {
                            let ks = Self::keyspace(db, keyspaces, table)?;
                            batch.insert(&ks, key, value);
                        }
                        Op::Delete { table, key } => {
                            let ks = Self::keyspace(db, keyspaces, table)?;
                            batch.remove(&ks, key);
                        }
                    }
                }
                batch.commit()?;
                Ok(())
            }
            Backend::Memory(m) => {
                let mut tables = m.write().expect("memory lock poisoned");
                for op in ops {
                    match op {
                        Op::Put { table, key, value } => {
                            tables.entry(table).or_default().insert(key, value);
                        }
                        Op::Delete { table, key } => {
                            if let Some(t) = tables.get_mut(table) {
                                t.remove(&key);
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

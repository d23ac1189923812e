//! Error types for the record store.

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// The referenced record does not exist.
    #[error("{table} record {key} not found")]
    NotFound {
        /// Table that was searched.
        table: &'static str,
        /// Human-readable key.
        key: String,
    },

    /// A record with the same key is already present.
    #[error("{table} record {key} already exists")]
    AlreadyExists {
        /// Table written to.
        table: &'static str,
        /// Human-readable key.
        key: String,
    },

    /// The stored version moved on since the caller loaded the record.
    #[error("{table} record {key} is at version {actual}, expected {expected}")]
    VersionConflict {
        /// Table written to.
        table: &'static str,
        /// Human-readable key.
        key: String,
        /// Version the caller loaded.
        expected: u32,
        /// Version currently stored.
        actual: u32,
    },

    /// Stored bytes are not in the expected shape.
    #[error("corrupt record in {table}: {reason}")]
    Corrupt {
        /// Table the record was read from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

//! Error types for registry operations.

use cohort_config::ConfigError;
use cohort_store::StoreError;

/// Errors returned by the registry DAOs.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Backing store failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Configuration could not be read.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// An entity with the same identity already exists.
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    /// The request is malformed or refers to something that does not exist.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Every generated identity collided with an existing one.
    #[error("no free {entity} id after {attempts} attempts")]
    IdsExhausted { entity: &'static str, attempts: u32 },

    /// Concurrent writers kept moving the entity's version.
    #[error("{entity} {id} still conflicting after {attempts} attempts")]
    Conflict {
        entity: &'static str,
        id: String,
        attempts: u32,
    },
}

impl RegistryError {
    /// Whether the error is a lost compare-and-set race worth retrying.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, RegistryError::Store(StoreError::VersionConflict { .. }))
    }
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { table, key } => RegistryError::NotFound {
                entity: table,
                id: key,
            },
            StoreError::AlreadyExists { table, key } => RegistryError::AlreadyExists {
                entity: table,
                id: key,
            },
            other => RegistryError::Store(other),
        }
    }
}

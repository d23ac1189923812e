//! Directory of health provider organizations.

use std::sync::Arc;

use cohort_store::Store;
use cohort_types::{Hpo, HpoId, UNSET_HPO_ID};
use tracing::debug;

use crate::RegistryError;

type Result<T> = std::result::Result<T, RegistryError>;

/// HPO name → [`Hpo`].
pub const HPO_TABLE: &str = "hpo";
/// HPO id (4 bytes BE) → HPO name.
const HPO_ID_TABLE: &str = "hpo_id";

/// Resolves an organization name to its HPO.
pub trait HpoResolver: Send + Sync {
    fn hpo_by_name(&self, name: &str) -> Result<Option<Hpo>>;
}

/// Store-backed [`HpoResolver`].
pub struct HpoDirectory {
    store: Arc<Store>,
}

impl HpoDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register an HPO. Both its id and its name must be unused.
    pub fn insert(&self, hpo: &Hpo) -> Result<()> {
        if hpo.hpo_id == UNSET_HPO_ID {
            return Err(RegistryError::InvalidInput(format!(
                "HPO id {} is reserved for unassigned participants",
                UNSET_HPO_ID
            )));
        }
        if hpo.name.is_empty() {
            return Err(RegistryError::InvalidInput("HPO name is required".into()));
        }
        self.store.write(|w| -> Result<()> {
            w.expect_absent(HPO_TABLE, hpo.name.as_bytes(), &hpo.name)?;
            w.expect_absent(HPO_ID_TABLE, &hpo.hpo_id.to_key(), hpo.hpo_id)?;
            w.put_record(HPO_TABLE, hpo.name.as_bytes(), hpo)?;
            w.put(HPO_ID_TABLE, hpo.hpo_id.to_key(), hpo.name.as_bytes().to_vec());
            Ok(())
        })?;
        debug!(hpo_id = %hpo.hpo_id, name = %hpo.name, "registered HPO");
        Ok(())
    }

    pub fn get(&self, hpo_id: HpoId) -> Result<Option<Hpo>> {
        let Some(name) = self.store.get(HPO_ID_TABLE, &hpo_id.to_key())? else {
            return Ok(None);
        };
        Ok(self.store.get_record(HPO_TABLE, &name)?)
    }

    /// Every registered HPO, ordered by name.
    pub fn list(&self) -> Result<Vec<Hpo>> {
        Ok(self.store.prefix_records(HPO_TABLE, &[])?)
    }
}

impl HpoResolver for HpoDirectory {
    fn hpo_by_name(&self, name: &str) -> Result<Option<Hpo>> {
        Ok(self.store.get_record(HPO_TABLE, name.as_bytes())?)
    }
}

//! Participant registry built on the Cohort record store.
//!
//! - [`ParticipantDao`]: versioned participants with generated identities
//! - [`BiobankOrderDao`]: versioned sample orders, validated against the
//!   configured test codes
//! - [`SummaryProjector`] / [`SummaryDao`]: per-participant summaries,
//!   rewritten in the same unit as the change they reflect
//! - [`HpoDirectory`]: the health provider organizations participants are
//!   grouped by
//!
//! [`Registry`] wires them together over one [`Store`].

mod error;
mod hpo;
mod ids;
mod order;
mod participant;
mod summary;

pub use error::RegistryError;
pub use hpo::{HpoDirectory, HpoResolver};
pub use ids::{IdGenerator, MAX_GENERATED_ID, MIN_GENERATED_ID, RandomIdGenerator};
pub use order::{BiobankOrderDao, DEFAULT_BASELINE_TEST_CODES};
pub use participant::ParticipantDao;
pub use summary::{SummaryDao, SummaryProjector};

use std::sync::Arc;

use cohort_config::ConfigCache;
use cohort_store::Store;
use cohort_types::Clock;

/// Retry limits for registry writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Generated identities tried per insert before giving up.
    pub max_insert_attempts: u32,
    /// Compare-and-set attempts per update.
    pub max_update_attempts: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            max_insert_attempts: 20,
            max_update_attempts: 10,
        }
    }
}

/// All registry DAOs over one store.
pub struct Registry {
    store: Arc<Store>,
    config: Arc<ConfigCache>,
    hpos: Arc<HpoDirectory>,
    summaries: Arc<SummaryDao>,
    participants: ParticipantDao,
    orders: BiobankOrderDao,
}

impl Registry {
    pub fn new(
        store: Arc<Store>,
        config: Arc<ConfigCache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        options: WriteOptions,
    ) -> Self {
        let hpos = Arc::new(HpoDirectory::new(Arc::clone(&store)));
        let summaries = Arc::new(SummaryDao::new(Arc::clone(&store)));
        let projector = Arc::new(SummaryProjector::new(hpos.clone()));
        let participants = ParticipantDao::new(
            Arc::clone(&store),
            Arc::clone(&summaries),
            projector,
            Arc::clone(&ids),
            Arc::clone(&clock),
            options,
        );
        let orders = BiobankOrderDao::new(
            Arc::clone(&store),
            Arc::clone(&summaries),
            Arc::clone(&config),
            ids,
            clock,
            options,
        );
        Self {
            store,
            config,
            hpos,
            summaries,
            participants,
            orders,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Arc<ConfigCache> {
        &self.config
    }

    pub fn hpos(&self) -> &HpoDirectory {
        &self.hpos
    }

    pub fn summaries(&self) -> &SummaryDao {
        &self.summaries
    }

    pub fn participants(&self) -> &ParticipantDao {
        &self.participants
    }

    pub fn orders(&self) -> &BiobankOrderDao {
        &self.orders
    }
}

//! Shared test harness for Cohort integration tests.
//!
//! Provides [`TestRegistry`], a full registry over an in-memory or on-disk
//! store, driven by a [`ManualClock`] and a seeded id generator so runs are
//! reproducible.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cohort_config::ConfigCache;
use cohort_registry::{IdGenerator, RandomIdGenerator, Registry, WriteOptions};
use cohort_store::Store;
use cohort_types::{
    Clock, Hpo, HpoId, ManualClock, NewBiobankOrder, OrderIdentifier, OrderSample, ParticipantId,
    Timestamp,
};

/// Start of every test clock: 2023-11-14T22:13:20Z.
pub const EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Seed shared by every harness id generator.
const ID_SEED: u64 = 0x00c0_4047;

/// A registry plus handles on its store and clock.
pub struct TestRegistry {
    pub store: Arc<Store>,
    pub clock: Arc<ManualClock>,
    pub registry: Registry,
}

impl TestRegistry {
    /// Registry over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(Store::in_memory()), WriteOptions::default())
    }

    /// Registry over the Fjall database at `path`, created if missing.
    pub fn open(path: &Path) -> Self {
        let store = Store::open(path).expect("open store");
        Self::with_store(Arc::new(store), WriteOptions::default())
    }

    pub fn with_store(store: Arc<Store>, options: WriteOptions) -> Self {
        Self::build(store, Arc::new(RandomIdGenerator::seeded(ID_SEED)), options)
    }

    pub fn build(store: Arc<Store>, ids: Arc<dyn IdGenerator>, options: WriteOptions) -> Self {
        let clock = Arc::new(ManualClock::new(EPOCH));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let cache = Arc::new(ConfigCache::new(Arc::clone(&store), Arc::clone(&dyn_clock)));
        let registry = Registry::new(Arc::clone(&store), cache, dyn_clock, ids, options);
        Self {
            store,
            clock,
            registry,
        }
    }

    /// Register HPOs `(id, name)`.
    pub fn seed_hpos(&self, hpos: &[(u32, &str)]) {
        for (id, name) in hpos {
            self.registry
                .hpos()
                .insert(&Hpo {
                    hpo_id: HpoId::new(*id),
                    name: name.to_string(),
                })
                .expect("insert hpo");
        }
    }

    pub fn advance(&self, d: Duration) {
        self.clock.advance(d);
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

/// A provider link list whose primary entry points at organization `name`.
pub fn provider_link(name: &str) -> String {
    serde_json::json!([
        {"primary": false, "organization": {"reference": "Organization/OTHER"}},
        {"primary": true, "organization": {"reference": format!("Organization/{name}")}},
    ])
    .to_string()
}

/// A valid order request for `participant_id` carrying one identifier.
pub fn order_request(
    participant_id: ParticipantId,
    identifier: &str,
    tests: &[&str],
) -> NewBiobankOrder {
    NewBiobankOrder {
        order_id: None,
        subject: format!("Patient/{participant_id}"),
        created: EPOCH,
        identifiers: vec![OrderIdentifier {
            system: "https://orders.cohort.test".into(),
            value: identifier.into(),
        }],
        samples: tests
            .iter()
            .map(|test| OrderSample {
                test: test.to_string(),
                description: format!("{test} tube"),
            })
            .collect(),
    }
}

//! Identity generation for new participants and orders.

use std::sync::Mutex;

use cohort_types::{BiobankId, ParticipantId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Smallest generated participant or biobank id.
pub const MIN_GENERATED_ID: u32 = 100_000_000;
/// Largest generated participant or biobank id.
pub const MAX_GENERATED_ID: u32 = 999_999_999;

/// Source of fresh identities.
///
/// Generated ids are not checked for uniqueness here; callers retry on
/// collision.
pub trait IdGenerator: Send + Sync {
    fn participant_id(&self) -> ParticipantId;
    fn biobank_id(&self) -> BiobankId;
    fn order_id(&self) -> String;
}

/// Uniformly random 9-digit ids.
pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    /// Seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible sequence for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn next_id(&self) -> u32 {
        self.rng
            .lock()
            .expect("id rng lock poisoned")
            .random_range(MIN_GENERATED_ID..=MAX_GENERATED_ID)
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn participant_id(&self) -> ParticipantId {
        ParticipantId::new(self.next_id())
    }

    fn biobank_id(&self) -> BiobankId {
        BiobankId::new(self.next_id())
    }

    fn order_id(&self) -> String {
        let raw: u128 = self.rng.lock().expect("id rng lock poisoned").random();
        format!("{raw:032x}")
    }
}

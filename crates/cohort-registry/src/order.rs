//! Biobank order DAO.
//!
//! An order belongs to one participant. Placing or revising an order
//! refreshes that participant's summary in the same write unit.

use std::collections::HashSet;
use std::sync::Arc;

use cohort_config::{BASELINE_SAMPLE_TEST_CODES, ConfigCache};
use cohort_store::{HistoryIter, HistoryRecord, Store, Versioned, VersionedTable, Writer};
use cohort_types::{
    BiobankOrder, Clock, LogPosition, NewBiobankOrder, OrderIdentifier, OrderSample, Participant,
    ParticipantId, ParticipantSummary, Timestamp,
};
use tracing::{debug, warn};

use crate::{RegistryError, WriteOptions};
use crate::ids::IdGenerator;
use crate::summary::{SUMMARY_TABLE, SummaryDao, SummaryProjector};

type Result<T> = std::result::Result<T, RegistryError>;

/// `system ++ 0x00 ++ value` → order id.
const ORDER_IDENTIFIER_TABLE: &str = "biobank_order_identifier";
/// `participant_id (4 bytes BE) ++ order key` → empty.
const ORDER_BY_PARTICIPANT_TABLE: &str = "biobank_order_by_participant";

/// Test codes accepted when the configuration does not list any.
pub const DEFAULT_BASELINE_TEST_CODES: &[&str] = &[
    "1ED10", "2ED10", "1ED04", "1SST8", "1PST8", "1HEP4", "1UR10", "1SAL",
];

pub struct BiobankOrderDao {
    table: VersionedTable<BiobankOrder>,
    summaries: Arc<SummaryDao>,
    config: Arc<ConfigCache>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    options: WriteOptions,
}

impl BiobankOrderDao {
    pub fn new(
        store: Arc<Store>,
        summaries: Arc<SummaryDao>,
        config: Arc<ConfigCache>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        options: WriteOptions,
    ) -> Self {
        Self {
            table: VersionedTable::new(store),
            summaries,
            config,
            ids,
            clock,
            options,
        }
    }

    fn store(&self) -> &Arc<Store> {
        self.table.store()
    }

    /// Test codes currently accepted on orders.
    pub fn baseline_test_codes(&self) -> Result<Vec<String>> {
        Ok(self
            .config
            .get_setting_strings(BASELINE_SAMPLE_TEST_CODES, Some(DEFAULT_BASELINE_TEST_CODES))?)
    }

    /// Place an order for a participant.
    ///
    /// A missing `order_id` is generated, and regenerated on collision.
    pub fn insert(
        &self,
        participant_id: ParticipantId,
        new: NewBiobankOrder,
    ) -> Result<BiobankOrder> {
        let codes = self.baseline_test_codes()?;
        validate_fields(participant_id, &new.subject, new.created, &new.samples, &codes)?;
        validate_identifiers(&new.identifiers)?;

        if let Some(order_id) = &new.order_id {
            if order_id.is_empty() {
                return Err(RegistryError::InvalidInput("BiobankOrder.id is empty".into()));
            }
            return self.try_insert(order_id.clone(), participant_id, &new, &codes);
        }
        let attempts = self.options.max_insert_attempts;
        for attempt in 1..=attempts {
            let order_id = self.ids.order_id();
            match self.try_insert(order_id, participant_id, &new, &codes) {
                Err(RegistryError::AlreadyExists { entity, id })
                    if entity == BiobankOrder::TABLE =>
                {
                    debug!(attempt, %id, "generated order id collided, retrying");
                }
                other => return other,
            }
        }
        warn!(attempts, "could not generate a free order id");
        Err(RegistryError::IdsExhausted {
            entity: BiobankOrder::TABLE,
            attempts,
        })
    }

    fn try_insert(
        &self,
        order_id: String,
        participant_id: ParticipantId,
        new: &NewBiobankOrder,
        codes: &[String],
    ) -> Result<BiobankOrder> {
        let mut order = BiobankOrder {
            order_id,
            participant_id,
            subject: new.subject.clone(),
            created: new.created,
            identifiers: new.identifiers.clone(),
            samples: new.samples.clone(),
            version: 0,
            created_at: Timestamp::default(),
            last_modified: Timestamp::default(),
            log_position: LogPosition::ZERO,
        };
        let now = self.clock.now();

        self.store().write(|w| -> Result<()> {
            require_participant(w, participant_id)?;
            check_identifiers_free(w, &order)?;
            self.table.stage_insert(w, &mut order, now)?;
            for identifier in &order.identifiers {
                w.put(
                    ORDER_IDENTIFIER_TABLE,
                    identifier_key(identifier),
                    order.order_id.as_bytes().to_vec(),
                );
            }
            w.put(ORDER_BY_PARTICIPANT_TABLE, participant_order_key(&order), Vec::new());

            let prev = self.summary_in(w, participant_id)?;
            let summary = SummaryProjector::apply_order(&prev, &order, codes);
            self.summaries.stage(w, Some(&prev), &summary)
        })?;

        debug!(
            order_id = %order.order_id,
            %participant_id,
            samples = order.samples.len(),
            position = %order.log_position,
            "inserted biobank order"
        );
        Ok(order)
    }

    /// Revise an order's subject, time, identifiers and samples.
    ///
    /// The owning participant and creation time are kept from the stored
    /// order. The caller's `version` is ignored. Conflicts are retried as
    /// in [`ParticipantDao::update`](crate::ParticipantDao::update).
    pub fn update(&self, order: &BiobankOrder) -> Result<BiobankOrder> {
        let attempts = self.options.max_update_attempts;
        for attempt in 1..=attempts {
            match self.try_update(order) {
                Err(e) if e.is_version_conflict() => {
                    debug!(order_id = %order.order_id, attempt, "order changed, retrying");
                }
                other => return other,
            }
        }
        warn!(order_id = %order.order_id, attempts, "order update kept conflicting");
        Err(RegistryError::Conflict {
            entity: BiobankOrder::TABLE,
            id: order.order_id.clone(),
            attempts,
        })
    }

    fn try_update(&self, requested: &BiobankOrder) -> Result<BiobankOrder> {
        let existing = self.get_required(&requested.order_id)?;
        let mut next = requested.clone();
        next.participant_id = existing.participant_id;
        next.created_at = existing.created_at;

        let codes = self.baseline_test_codes()?;
        validate_fields(next.participant_id, &next.subject, next.created, &next.samples, &codes)?;
        validate_identifiers(&next.identifiers)?;
        let now = self.clock.now();

        self.store().write(|w| -> Result<()> {
            check_identifiers_free(w, &next)?;
            self.table.stage_update(w, &mut next, existing.version, now)?;
            for identifier in &existing.identifiers {
                if !next.identifiers.contains(identifier) {
                    w.delete(ORDER_IDENTIFIER_TABLE, identifier_key(identifier));
                }
            }
            for identifier in &next.identifiers {
                w.put(
                    ORDER_IDENTIFIER_TABLE,
                    identifier_key(identifier),
                    next.order_id.as_bytes().to_vec(),
                );
            }

            let prev = self.summary_in(w, next.participant_id)?;
            let summary = SummaryProjector::replace_order(&prev, &existing, &next, &codes);
            self.summaries.stage(w, Some(&prev), &summary)
        })?;

        debug!(
            order_id = %next.order_id,
            version = next.version,
            position = %next.log_position,
            "updated biobank order"
        );
        Ok(next)
    }

    fn summary_in(
        &self,
        w: &Writer<'_>,
        participant_id: ParticipantId,
    ) -> Result<ParticipantSummary> {
        self.summaries
            .get_in(w, participant_id)?
            .ok_or_else(|| RegistryError::NotFound {
                entity: SUMMARY_TABLE,
                id: participant_id.to_string(),
            })
    }

    pub fn get(&self, order_id: &str) -> Result<Option<BiobankOrder>> {
        Ok(self.table.get(order_id)?)
    }

    pub fn get_required(&self, order_id: &str) -> Result<BiobankOrder> {
        self.get(order_id)?.ok_or_else(|| RegistryError::NotFound {
            entity: BiobankOrder::TABLE,
            id: order_id.to_string(),
        })
    }

    /// The order currently holding `identifier`, if any.
    pub fn find_by_identifier(&self, identifier: &OrderIdentifier) -> Result<Option<BiobankOrder>> {
        match self.store().get(ORDER_IDENTIFIER_TABLE, &identifier_key(identifier))? {
            Some(order_id) => self.get(&String::from_utf8_lossy(&order_id)),
            None => Ok(None),
        }
    }

    /// Every order placed for a participant, ordered by order id.
    pub fn list_for_participant(&self, participant_id: ParticipantId) -> Result<Vec<BiobankOrder>> {
        let prefix = participant_id.to_key();
        let mut out = Vec::new();
        for (key, _) in self.store().prefix_raw(ORDER_BY_PARTICIPANT_TABLE, &prefix)? {
            let order_key = &key[prefix.len()..];
            if let Some(order) = self.store().get_record(BiobankOrder::TABLE, order_key)? {
                out.push(order);
            }
        }
        Ok(out)
    }

    pub fn get_version(
        &self,
        order_id: &str,
        version: u32,
    ) -> Result<Option<HistoryRecord<BiobankOrder>>> {
        Ok(self.table.get_version(order_id, version)?)
    }

    /// Every version of the order, oldest first.
    pub fn history(&self, order_id: &str) -> HistoryIter<BiobankOrder> {
        self.table.history(order_id)
    }
}

fn validate_fields(
    participant_id: ParticipantId,
    subject: &str,
    created: Timestamp,
    samples: &[OrderSample],
    codes: &[String],
) -> Result<()> {
    if subject.is_empty() {
        return Err(RegistryError::InvalidInput("Missing field: subject".into()));
    }
    if created == Timestamp::default() {
        return Err(RegistryError::InvalidInput("Missing field: created".into()));
    }
    if subject != format!("Patient/{participant_id}") {
        return Err(RegistryError::InvalidInput(format!("Subject {subject} invalid.")));
    }
    for sample in samples {
        if sample.test.is_empty() {
            return Err(RegistryError::InvalidInput(format!(
                "Missing field: sample.test in sample {sample:?}"
            )));
        }
        if sample.description.is_empty() {
            return Err(RegistryError::InvalidInput(format!(
                "Missing field: sample.description in sample {sample:?}"
            )));
        }
        if !codes.iter().any(|c| *c == sample.test) {
            return Err(RegistryError::InvalidInput(format!(
                "Invalid test value: {}",
                sample.test
            )));
        }
    }
    Ok(())
}

fn validate_identifiers(identifiers: &[OrderIdentifier]) -> Result<()> {
    if identifiers.is_empty() {
        return Err(RegistryError::InvalidInput(
            "At least one identifier is required".into(),
        ));
    }
    let mut seen = HashSet::with_capacity(identifiers.len());
    for identifier in identifiers {
        if !seen.insert(identifier) {
            return Err(RegistryError::InvalidInput(format!(
                "Identifier {identifier} is listed more than once"
            )));
        }
    }
    Ok(())
}

fn require_participant(w: &Writer<'_>, participant_id: ParticipantId) -> Result<()> {
    if w.get(Participant::TABLE, &Participant::encode_id(&participant_id))?.is_none() {
        return Err(RegistryError::InvalidInput(format!(
            "BiobankOrder.participantId {participant_id} is not found."
        )));
    }
    Ok(())
}

/// Fail if any of the order's identifiers is held by a different order.
fn check_identifiers_free(w: &Writer<'_>, order: &BiobankOrder) -> Result<()> {
    for identifier in &order.identifiers {
        if let Some(holder) = w.get(ORDER_IDENTIFIER_TABLE, &identifier_key(identifier))?
            && holder != order.order_id.as_bytes()
        {
            return Err(RegistryError::InvalidInput(format!(
                "Identifier {identifier} is already in use by another order"
            )));
        }
    }
    Ok(())
}

fn identifier_key(identifier: &OrderIdentifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(identifier.system.len() + identifier.value.len() + 1);
    key.extend_from_slice(identifier.system.as_bytes());
    key.push(0);
    key.extend_from_slice(identifier.value.as_bytes());
    key
}

fn participant_order_key(order: &BiobankOrder) -> Vec<u8> {
    let mut key = order.participant_id.to_key().to_vec();
    key.extend_from_slice(&order.key());
    key
}

//! Participant DAO.
//!
//! Inserts and updates write the participant, its history record, its feed
//! entry, the biobank id index and the participant's summary in one unit.
//! Updates are compare-and-set on the version loaded at the start of the
//! attempt; a lost race reloads and tries again.

use std::collections::HashSet;
use std::sync::Arc;

use cohort_store::{HistoryIter, HistoryRecord, Store, Versioned, VersionedTable};
use cohort_types::{
    BiobankId, Clock, HpoId, LogPosition, NewParticipant, Participant, ParticipantId, Timestamp,
};
use tracing::{debug, warn};

use crate::{RegistryError, WriteOptions};
use crate::ids::IdGenerator;
use crate::summary::{SUMMARY_TABLE, SummaryDao, SummaryProjector};

type Result<T> = std::result::Result<T, RegistryError>;

/// Biobank id (4 bytes BE) → participant id (4 bytes BE).
const BIOBANK_ID_TABLE: &str = "participant_biobank_id";

pub struct ParticipantDao {
    table: VersionedTable<Participant>,
    summaries: Arc<SummaryDao>,
    projector: Arc<SummaryProjector>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    options: WriteOptions,
}

impl ParticipantDao {
    pub fn new(
        store: Arc<Store>,
        summaries: Arc<SummaryDao>,
        projector: Arc<SummaryProjector>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        options: WriteOptions,
    ) -> Self {
        Self {
            table: VersionedTable::new(store),
            summaries,
            projector,
            ids,
            clock,
            options,
        }
    }

    fn store(&self) -> &Arc<Store> {
        self.table.store()
    }

    /// Register a new participant.
    ///
    /// Either both ids are supplied or neither is. Supplied ids that are
    /// already taken fail with [`RegistryError::AlreadyExists`]; generated
    /// ones are regenerated.
    pub fn insert(&self, new: NewParticipant) -> Result<Participant> {
        let hpo_id = self.projector.hpo_for(new.provider_link.as_deref())?;

        match (new.participant_id, new.biobank_id) {
            (Some(participant_id), Some(biobank_id)) => {
                self.try_insert(participant_id, biobank_id, &new, hpo_id)
            }
            (None, None) => {
                let attempts = self.options.max_insert_attempts;
                for attempt in 1..=attempts {
                    let participant_id = self.ids.participant_id();
                    let biobank_id = self.ids.biobank_id();
                    match self.try_insert(participant_id, biobank_id, &new, hpo_id) {
                        Err(RegistryError::AlreadyExists { entity, id }) => {
                            debug!(attempt, entity, %id, "generated id collided, retrying");
                        }
                        other => return other,
                    }
                }
                warn!(attempts, "could not generate a free participant id");
                Err(RegistryError::IdsExhausted {
                    entity: Participant::TABLE,
                    attempts,
                })
            }
            (Some(_), None) => Err(RegistryError::InvalidInput(
                "Participant.biobankId required when participantId is supplied.".into(),
            )),
            (None, Some(_)) => Err(RegistryError::InvalidInput(
                "Participant.biobankId must not be supplied without participantId.".into(),
            )),
        }
    }

    fn try_insert(
        &self,
        participant_id: ParticipantId,
        biobank_id: BiobankId,
        new: &NewParticipant,
        hpo_id: HpoId,
    ) -> Result<Participant> {
        let mut participant = Participant {
            participant_id,
            biobank_id,
            version: 0,
            sign_up_time: Timestamp::default(),
            last_modified: Timestamp::default(),
            provider_link: new.provider_link.clone(),
            hpo_id,
            log_position: LogPosition::ZERO,
        };
        let now = self.clock.now();

        self.store().write(|w| -> Result<()> {
            self.table.stage_insert(w, &mut participant, now)?;
            w.expect_absent(BIOBANK_ID_TABLE, &biobank_id.to_key(), biobank_id)?;
            w.put(BIOBANK_ID_TABLE, biobank_id.to_key(), participant_id.to_key().to_vec());
            let summary = SummaryProjector::project(&participant);
            self.summaries.stage(w, None, &summary)
        })?;

        debug!(
            %participant_id,
            %biobank_id,
            hpo_id = %participant.hpo_id,
            position = %participant.log_position,
            "inserted participant"
        );
        Ok(participant)
    }

    /// Replace a participant's mutable fields.
    ///
    /// Ids, sign-up time and HPO are taken from the stored participant; the
    /// HPO only moves when the provider link changes and resolves to a
    /// different HPO, in which case the summary is rebuilt with the new HPO.
    /// The caller's `version` is ignored.
    ///
    /// The stored participant is read before the write unit; the write then
    /// compares that version under the commit lock, which is held for the
    /// whole unit. A conflict means another write committed between the
    /// read and the lock, and the update is retried from a fresh read up to
    /// [`WriteOptions::max_update_attempts`] times.
    pub fn update(&self, participant: &Participant) -> Result<Participant> {
        let id = participant.participant_id;
        let attempts = self.options.max_update_attempts;
        for attempt in 1..=attempts {
            match self.try_update(participant) {
                Err(e) if e.is_version_conflict() => {
                    debug!(%id, attempt, "participant changed underneath update, retrying");
                }
                other => return other,
            }
        }
        warn!(%id, attempts, "participant update kept conflicting");
        Err(RegistryError::Conflict {
            entity: Participant::TABLE,
            id: id.to_string(),
            attempts,
        })
    }

    fn try_update(&self, requested: &Participant) -> Result<Participant> {
        let id = requested.participant_id;
        let existing = self.get_required(id)?;

        let mut next = requested.clone();
        next.biobank_id = existing.biobank_id;
        next.sign_up_time = existing.sign_up_time;
        next.hpo_id = existing.hpo_id;

        let mut moved_to = None;
        if next.provider_link != existing.provider_link {
            let hpo_id = self.projector.hpo_for(next.provider_link.as_deref())?;
            if hpo_id != existing.hpo_id {
                next.hpo_id = hpo_id;
                moved_to = Some(hpo_id);
            }
        }
        let now = self.clock.now();

        self.store().write(|w| -> Result<()> {
            self.table.stage_update(w, &mut next, existing.version, now)?;
            if let Some(hpo_id) = moved_to {
                let prev = self
                    .summaries
                    .get_in(w, id)?
                    .ok_or_else(|| RegistryError::NotFound {
                        entity: SUMMARY_TABLE,
                        id: id.to_string(),
                    })?;
                let summary = SummaryProjector::with_hpo(&prev, hpo_id);
                self.summaries.stage(w, Some(&prev), &summary)?;
            }
            Ok(())
        })?;

        debug!(
            %id,
            version = next.version,
            hpo_id = %next.hpo_id,
            position = %next.log_position,
            "updated participant"
        );
        Ok(next)
    }

    pub fn get(&self, id: ParticipantId) -> Result<Option<Participant>> {
        Ok(self.table.get(&id)?)
    }

    /// Like [`get`](Self::get) but a missing participant is an error.
    pub fn get_required(&self, id: ParticipantId) -> Result<Participant> {
        self.get(id)?.ok_or_else(|| RegistryError::NotFound {
            entity: Participant::TABLE,
            id: id.to_string(),
        })
    }

    pub fn get_by_biobank_id(&self, biobank_id: BiobankId) -> Result<Option<Participant>> {
        let Some(raw) = self.store().get(BIOBANK_ID_TABLE, &biobank_id.to_key())? else {
            return Ok(None);
        };
        let Ok(bytes) = <[u8; 4]>::try_from(raw.as_slice()) else {
            return Err(RegistryError::Store(cohort_store::StoreError::Corrupt {
                table: BIOBANK_ID_TABLE,
                reason: format!("participant id is {} bytes, expected 4", raw.len()),
            }));
        };
        self.get(ParticipantId::new(u32::from_be_bytes(bytes)))
    }

    /// The participant as it was at `version`.
    pub fn get_version(
        &self,
        id: ParticipantId,
        version: u32,
    ) -> Result<Option<HistoryRecord<Participant>>> {
        Ok(self.table.get_version(&id, version)?)
    }

    /// Every version of the participant, oldest first.
    pub fn history(&self, id: ParticipantId) -> HistoryIter<Participant> {
        self.table.history(&id)
    }

    /// Check that another record's participant reference points at an
    /// existing participant.
    ///
    /// `resource` names the referring record in the error message.
    pub fn validate_participant_reference(
        &self,
        resource: &str,
        participant_id: Option<ParticipantId>,
    ) -> Result<Participant> {
        let Some(id) = participant_id else {
            return Err(RegistryError::InvalidInput(format!(
                "{resource}.participantId required."
            )));
        };
        self.get(id)?.ok_or_else(|| {
            RegistryError::InvalidInput(format!("{resource}.participantId {id} is not found."))
        })
    }

    /// Biobank ids of every registered participant.
    pub fn valid_biobank_ids(&self) -> Result<HashSet<BiobankId>> {
        self.store()
            .prefix_raw(BIOBANK_ID_TABLE, &[])?
            .into_iter()
            .map(|(key, _)| {
                <[u8; 4]>::try_from(key.as_slice())
                    .map(|b| BiobankId::new(u32::from_be_bytes(b)))
                    .map_err(|_| {
                        RegistryError::Store(cohort_store::StoreError::Corrupt {
                            table: BIOBANK_ID_TABLE,
                            reason: format!("biobank id key is {} bytes, expected 4", key.len()),
                        })
                    })
            })
            .collect()
    }

    /// Participants whose latest write is after `after`, in write order.
    pub fn sync_after(&self, after: LogPosition, limit: usize) -> Result<Vec<Participant>> {
        Ok(self.table.changed_since(after, limit)?)
    }
}

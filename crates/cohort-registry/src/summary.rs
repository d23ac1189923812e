//! Participant summaries: derivation and storage.
//!
//! A summary is never edited on its own. The participant and order DAOs
//! compute the new summary with [`SummaryProjector`] and stage it with
//! [`SummaryDao::stage`] inside the same write unit as the change it
//! reflects.

use std::sync::Arc;

use cohort_store::{Store, Writer};
use cohort_types::{
    BiobankOrder, HpoId, Participant, ParticipantId, ParticipantSummary, UNSET_HPO_ID,
};
use serde_json::Value;

use crate::RegistryError;
use crate::hpo::HpoResolver;

type Result<T> = std::result::Result<T, RegistryError>;

/// Participant id (4 bytes BE) → [`ParticipantSummary`].
pub const SUMMARY_TABLE: &str = "participant_summary";
/// `hpo_id ++ participant_id` (both 4 bytes BE) → empty.
const SUMMARY_BY_HPO_TABLE: &str = "participant_summary_by_hpo";

/// Provider references name their organization after this prefix.
const ORGANIZATION_PREFIX: &str = "organization/";

/// Derives summaries from participants and their orders.
pub struct SummaryProjector {
    hpos: Arc<dyn HpoResolver>,
}

impl SummaryProjector {
    pub fn new(hpos: Arc<dyn HpoResolver>) -> Self {
        Self { hpos }
    }

    /// The HPO named by the primary entry of a provider link.
    ///
    /// A missing link, or one without a primary organization reference,
    /// resolves to [`UNSET_HPO_ID`]. A named organization that is not a known
    /// HPO is an error.
    pub fn hpo_for(&self, provider_link: Option<&str>) -> Result<HpoId> {
        let Some(name) = primary_organization(provider_link)? else {
            return Ok(UNSET_HPO_ID);
        };
        match self.hpos.hpo_by_name(&name)? {
            Some(hpo) => Ok(hpo.hpo_id),
            None => Err(RegistryError::InvalidInput(format!(
                "No HPO found with name {name}"
            ))),
        }
    }

    /// The summary of a participant with no orders.
    pub fn project(participant: &Participant) -> ParticipantSummary {
        ParticipantSummary {
            participant_id: participant.participant_id,
            biobank_id: participant.biobank_id,
            sign_up_time: participant.sign_up_time,
            hpo_id: participant.hpo_id,
            num_biobank_orders: 0,
            num_baseline_samples_ordered: 0,
        }
    }

    /// `prev` with only the HPO replaced.
    pub fn with_hpo(prev: &ParticipantSummary, hpo_id: HpoId) -> ParticipantSummary {
        ParticipantSummary {
            hpo_id,
            ..prev.clone()
        }
    }

    /// `prev` after a new order was placed.
    pub fn apply_order(
        prev: &ParticipantSummary,
        order: &BiobankOrder,
        baseline_codes: &[String],
    ) -> ParticipantSummary {
        ParticipantSummary {
            num_biobank_orders: prev.num_biobank_orders + 1,
            num_baseline_samples_ordered: prev.num_baseline_samples_ordered
                + baseline_samples(order, baseline_codes),
            ..prev.clone()
        }
    }

    /// `prev` after `old` was replaced by `new`.
    pub fn replace_order(
        prev: &ParticipantSummary,
        old: &BiobankOrder,
        new: &BiobankOrder,
        baseline_codes: &[String],
    ) -> ParticipantSummary {
        let without_old = prev
            .num_baseline_samples_ordered
            .saturating_sub(baseline_samples(old, baseline_codes));
        ParticipantSummary {
            num_baseline_samples_ordered: without_old + baseline_samples(new, baseline_codes),
            ..prev.clone()
        }
    }
}

fn baseline_samples(order: &BiobankOrder, baseline_codes: &[String]) -> u32 {
    order
        .samples
        .iter()
        .filter(|s| baseline_codes.iter().any(|c| *c == s.test))
        .count() as u32
}

/// Organization name from the primary provider link, if there is one.
fn primary_organization(provider_link: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = provider_link else {
        return Ok(None);
    };
    let links: Value = serde_json::from_str(raw)
        .map_err(|e| RegistryError::InvalidInput(format!("malformed providerLink: {e}")))?;
    let links = match links {
        Value::Array(links) => links,
        Value::Null => return Ok(None),
        _ => {
            return Err(RegistryError::InvalidInput(
                "providerLink must be a list".into(),
            ));
        }
    };

    let Some(primary) = links
        .iter()
        .find(|link| link.get("primary") == Some(&Value::Bool(true)))
    else {
        return Ok(None);
    };
    let Some(reference) = primary
        .get("organization")
        .and_then(|org| org.get("reference"))
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };

    let is_organization = reference
        .get(..ORGANIZATION_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(ORGANIZATION_PREFIX));
    if !is_organization {
        return Ok(None);
    }
    let name = &reference[ORGANIZATION_PREFIX.len()..];
    Ok((!name.is_empty()).then(|| name.to_string()))
}

/// Read access to stored summaries, plus the staging hook the DAOs use.
pub struct SummaryDao {
    store: Arc<Store>,
}

impl SummaryDao {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, participant_id: ParticipantId) -> Result<Option<ParticipantSummary>> {
        Ok(self.store.get_record(SUMMARY_TABLE, &participant_id.to_key())?)
    }

    pub fn get_in(
        &self,
        w: &Writer<'_>,
        participant_id: ParticipantId,
    ) -> Result<Option<ParticipantSummary>> {
        Ok(w.get_record(SUMMARY_TABLE, &participant_id.to_key())?)
    }

    /// Summaries of every participant in an HPO, ordered by participant id.
    pub fn list_by_hpo(&self, hpo_id: HpoId) -> Result<Vec<ParticipantSummary>> {
        let mut out = Vec::new();
        for (key, _) in self.store.prefix_raw(SUMMARY_BY_HPO_TABLE, &hpo_id.to_key())? {
            if let Some(summary) = self.store.get_record(SUMMARY_TABLE, &key[4..])? {
                out.push(summary);
            }
        }
        Ok(out)
    }

    /// Write `summary` in the caller's unit, keeping the HPO index in step.
    pub fn stage(
        &self,
        w: &mut Writer<'_>,
        prev: Option<&ParticipantSummary>,
        summary: &ParticipantSummary,
    ) -> Result<()> {
        if let Some(prev) = prev
            && prev.hpo_id != summary.hpo_id
        {
            w.delete(SUMMARY_BY_HPO_TABLE, hpo_index_key(prev.hpo_id, prev.participant_id));
        }
        w.put(
            SUMMARY_BY_HPO_TABLE,
            hpo_index_key(summary.hpo_id, summary.participant_id),
            Vec::new(),
        );
        w.put_record(SUMMARY_TABLE, summary.participant_id.to_key(), summary)?;
        Ok(())
    }
}

fn hpo_index_key(hpo_id: HpoId, participant_id: ParticipantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8);
    key.extend_from_slice(&hpo_id.to_key());
    key.extend_from_slice(&participant_id.to_key());
    key
}

//! Integration test: participant lifecycle.
//!
//! Insert with generated ids, re-link to other HPOs, and check versions,
//! history, summaries and the change feed along the way.

use std::time::Duration;

use cohort_integration_tests::{EPOCH, TestRegistry, provider_link};
use cohort_registry::RegistryError;
use cohort_types::{
    BiobankId, HpoId, LogPosition, NewParticipant, ParticipantId, Timestamp, UNSET_HPO_ID,
};

/// Generated insert, failed re-link to an unknown HPO, then a good re-link.
#[test]
fn test_relink_to_known_hpo_after_failed_relink() {
    let t = TestRegistry::in_memory();
    t.seed_hpos(&[(1, "PITT"), (2, "AZ_TUCSON")]);
    let participants = t.registry.participants();

    let p = participants.insert(NewParticipant::default()).unwrap();
    assert_eq!(p.version, 1);
    assert_eq!(p.hpo_id, UNSET_HPO_ID);
    assert_eq!(p.sign_up_time, EPOCH);

    let mut bad = p.clone();
    bad.provider_link = Some(provider_link("NOWHERE"));
    match participants.update(&bad) {
        Err(RegistryError::InvalidInput(msg)) => {
            assert_eq!(msg, "No HPO found with name NOWHERE");
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    assert_eq!(participants.get_required(p.participant_id).unwrap().version, 1);

    t.advance(Duration::from_secs(5));
    let mut good = p.clone();
    good.provider_link = Some(provider_link("PITT"));
    let updated = participants.update(&good).unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.hpo_id, HpoId::new(1));
    assert_eq!(updated.last_modified, EPOCH.saturating_add(Duration::from_secs(5)));
    assert_eq!(updated.sign_up_time, EPOCH);

    let summary = t.registry.summaries().get(p.participant_id).unwrap().unwrap();
    assert_eq!(summary.hpo_id, HpoId::new(1));

    let history: Vec<_> = participants
        .history(p.participant_id)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].snapshot.version, 1);
    assert_eq!(history[1].snapshot, updated);
}

/// N updates leave version N+1 and N+1 history records.
#[test]
fn test_version_and_history_track_update_count() {
    let t = TestRegistry::in_memory();
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    for n in 1..=12u32 {
        let updated = participants.update(&p).unwrap();
        assert_eq!(updated.version, n + 1);
    }

    let versions: Vec<u32> = participants
        .history(p.participant_id)
        .map(|r| r.unwrap().snapshot.version)
        .collect();
    assert_eq!(versions, (1..=13).collect::<Vec<_>>());

    let v7 = participants.get_version(p.participant_id, 7).unwrap().unwrap();
    assert_eq!(v7.snapshot.version, 7);
    assert!(participants.get_version(p.participant_id, 14).unwrap().is_none());
}

/// Changing the link to an HPO moves the participant between HPO listings.
#[test]
fn test_summary_hpo_index_follows_relinks() {
    let t = TestRegistry::in_memory();
    t.seed_hpos(&[(1, "PITT"), (2, "AZ_TUCSON")]);
    let participants = t.registry.participants();
    let summaries = t.registry.summaries();

    let a = participants
        .insert(NewParticipant {
            provider_link: Some(provider_link("PITT")),
            ..Default::default()
        })
        .unwrap();
    let b = participants.insert(NewParticipant::default()).unwrap();
    assert_eq!(summaries.list_by_hpo(HpoId::new(1)).unwrap().len(), 1);
    assert_eq!(summaries.list_by_hpo(UNSET_HPO_ID).unwrap().len(), 1);

    let mut moved = a.clone();
    moved.provider_link = Some(provider_link("AZ_TUCSON"));
    participants.update(&moved).unwrap();
    let mut linked = b.clone();
    linked.provider_link = Some(provider_link("AZ_TUCSON"));
    participants.update(&linked).unwrap();

    assert!(summaries.list_by_hpo(HpoId::new(1)).unwrap().is_empty());
    assert!(summaries.list_by_hpo(UNSET_HPO_ID).unwrap().is_empty());
    let in_tucson: Vec<ParticipantId> = summaries
        .list_by_hpo(HpoId::new(2))
        .unwrap()
        .into_iter()
        .map(|s| s.participant_id)
        .collect();
    assert_eq!(in_tucson.len(), 2);
    assert!(in_tucson.contains(&a.participant_id));
    assert!(in_tucson.contains(&b.participant_id));
}

/// Caller-supplied ids, duplicates and ids supplied in halves.
#[test]
fn test_supplied_ids() {
    let t = TestRegistry::in_memory();
    let participants = t.registry.participants();
    let new = NewParticipant {
        participant_id: Some(ParticipantId::new(100_000_001)),
        biobank_id: Some(BiobankId::new(200_000_001)),
        provider_link: None,
    };
    let p = participants.insert(new.clone()).unwrap();
    assert_eq!(p.participant_id, ParticipantId::new(100_000_001));
    assert_eq!(
        participants.get_by_biobank_id(BiobankId::new(200_000_001)).unwrap(),
        Some(p.clone())
    );

    assert!(matches!(
        participants.insert(new),
        Err(RegistryError::AlreadyExists { .. })
    ));
    // Same biobank id under another participant id.
    assert!(matches!(
        participants.insert(NewParticipant {
            participant_id: Some(ParticipantId::new(100_000_002)),
            biobank_id: Some(BiobankId::new(200_000_001)),
            provider_link: None,
        }),
        Err(RegistryError::AlreadyExists { .. })
    ));
    assert!(participants.get(ParticipantId::new(100_000_002)).unwrap().is_none());

    assert!(matches!(
        participants.insert(NewParticipant {
            participant_id: Some(ParticipantId::new(5)),
            ..Default::default()
        }),
        Err(RegistryError::InvalidInput(_))
    ));
    assert!(matches!(
        participants.insert(NewParticipant {
            biobank_id: Some(BiobankId::new(5)),
            ..Default::default()
        }),
        Err(RegistryError::InvalidInput(_))
    ));
}

/// Ids, sign-up time and HPO cannot be rewritten through `update`.
#[test]
fn test_update_ignores_immutable_fields() {
    let t = TestRegistry::in_memory();
    t.seed_hpos(&[(1, "PITT")]);
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    let mut tampered = p.clone();
    tampered.biobank_id = BiobankId::new(1);
    tampered.sign_up_time = Timestamp::from_millis(1);
    tampered.hpo_id = HpoId::new(1);
    tampered.version = 40;
    let updated = participants.update(&tampered).unwrap();

    assert_eq!(updated.biobank_id, p.biobank_id);
    assert_eq!(updated.sign_up_time, p.sign_up_time);
    assert_eq!(updated.hpo_id, UNSET_HPO_ID);
    assert_eq!(updated.version, 2);
    let stored_v2 = participants.get_version(p.participant_id, 2).unwrap().unwrap();
    assert_eq!(stored_v2.snapshot, updated);
}

#[test]
fn test_update_unknown_participant_is_not_found() {
    let t = TestRegistry::in_memory();
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    let mut ghost = p.clone();
    ghost.participant_id = ParticipantId::new(p.participant_id.get().wrapping_add(1));
    assert!(matches!(
        participants.update(&ghost),
        Err(RegistryError::NotFound { .. })
    ));
    assert!(participants.get(ghost.participant_id).unwrap().is_none());
    assert_eq!(participants.history(ghost.participant_id).count(), 0);
}

/// Log positions follow commit order even while the clock runs backwards.
#[test]
fn test_feed_orders_by_commit_not_clock() {
    let t = TestRegistry::in_memory();
    let participants = t.registry.participants();

    let a = participants.insert(NewParticipant::default()).unwrap();
    t.clock.set(EPOCH.saturating_sub(Duration::from_secs(3600)));
    let b = participants.insert(NewParticipant::default()).unwrap();
    t.clock.set(EPOCH.saturating_sub(Duration::from_secs(7200)));
    let a2 = participants.update(&a).unwrap();

    assert!(b.last_modified < a.last_modified);
    assert!(a.log_position < b.log_position);
    assert!(b.log_position < a2.log_position);

    let synced: Vec<_> = participants
        .sync_after(LogPosition::ZERO, 10)
        .unwrap()
        .into_iter()
        .map(|p| (p.participant_id, p.version))
        .collect();
    assert_eq!(synced, vec![(b.participant_id, 1), (a.participant_id, 2)]);

    let after_b = participants.sync_after(b.log_position, 10).unwrap();
    assert_eq!(after_b.len(), 1);
    assert_eq!(after_b[0].participant_id, a.participant_id);

    let positions: Vec<LogPosition> = t
        .store
        .changes_since(LogPosition::ZERO, 100)
        .unwrap()
        .into_iter()
        .map(|e| e.position)
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(t.store.last_position(), *positions.last().unwrap());
}

#[test]
fn test_participant_reference_validation() {
    let t = TestRegistry::in_memory();
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    participants
        .validate_participant_reference("QuestionnaireResponse", Some(p.participant_id))
        .unwrap();
    match participants.validate_participant_reference("QuestionnaireResponse", None) {
        Err(RegistryError::InvalidInput(msg)) => {
            assert_eq!(msg, "QuestionnaireResponse.participantId required.");
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    let missing = ParticipantId::new(1);
    match participants.validate_participant_reference("QuestionnaireResponse", Some(missing)) {
        Err(RegistryError::InvalidInput(msg)) => {
            assert_eq!(msg, "QuestionnaireResponse.participantId 1 is not found.");
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    let ids = participants.valid_biobank_ids().unwrap();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(&p.biobank_id));
}

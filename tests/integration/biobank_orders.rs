//! Integration test: biobank orders and the summaries they feed.

use std::time::Duration;

use cohort_integration_tests::{TestRegistry, order_request, provider_link};
use cohort_registry::RegistryError;
use cohort_types::{HpoId, LogPosition, NewParticipant, OrderSample, ParticipantId};

/// Orders count towards the summary without disturbing its HPO, and a
/// later re-link keeps the order counts.
#[test]
fn test_orders_and_relink_share_one_summary() {
    let t = TestRegistry::in_memory();
    t.seed_hpos(&[(1, "PITT"), (2, "AZ_TUCSON")]);
    let p = t
        .registry
        .participants()
        .insert(NewParticipant {
            provider_link: Some(provider_link("PITT")),
            ..Default::default()
        })
        .unwrap();
    let orders = t.registry.orders();

    orders
        .insert(p.participant_id, order_request(p.participant_id, "A-1", &["1ED10", "1SAL"]))
        .unwrap();
    orders
        .insert(p.participant_id, order_request(p.participant_id, "A-2", &["2ED10"]))
        .unwrap();

    let summary = t.registry.summaries().get(p.participant_id).unwrap().unwrap();
    assert_eq!(summary.num_biobank_orders, 2);
    assert_eq!(summary.num_baseline_samples_ordered, 3);
    assert_eq!(summary.hpo_id, HpoId::new(1));

    let mut moved = p.clone();
    moved.provider_link = Some(provider_link("AZ_TUCSON"));
    t.registry.participants().update(&moved).unwrap();

    let summary = t.registry.summaries().get(p.participant_id).unwrap().unwrap();
    assert_eq!(summary.hpo_id, HpoId::new(2));
    assert_eq!(summary.num_biobank_orders, 2);
    assert_eq!(summary.num_baseline_samples_ordered, 3);
}

#[test]
fn test_order_update_versions_and_reindexes() {
    let t = TestRegistry::in_memory();
    let p = t.registry.participants().insert(NewParticipant::default()).unwrap();
    let orders = t.registry.orders();

    let order = orders
        .insert(p.participant_id, order_request(p.participant_id, "B-1", &["1ED10"]))
        .unwrap();
    assert_eq!(order.version, 1);
    assert_eq!(order.order_id.len(), 32);

    t.advance(Duration::from_secs(30));
    let mut revised = order.clone();
    revised.identifiers[0].value = "B-1-rev".into();
    revised.samples.push(OrderSample {
        test: "1SST8".into(),
        description: "SST tube".into(),
    });
    revised.participant_id = ParticipantId::new(1);
    let revised = orders.update(&revised).unwrap();
    assert_eq!(revised.version, 2);
    assert_eq!(revised.participant_id, p.participant_id);
    assert_eq!(revised.created_at, order.created_at);
    assert!(revised.last_modified > order.last_modified);

    let old_identifier = &order.identifiers[0];
    assert!(orders.find_by_identifier(old_identifier).unwrap().is_none());
    assert_eq!(
        orders.find_by_identifier(&revised.identifiers[0]).unwrap(),
        Some(revised.clone())
    );

    let summary = t.registry.summaries().get(p.participant_id).unwrap().unwrap();
    assert_eq!(summary.num_biobank_orders, 1);
    assert_eq!(summary.num_baseline_samples_ordered, 2);

    let history: Vec<u32> = orders
        .history(&order.order_id)
        .map(|r| r.unwrap().snapshot.version)
        .collect();
    assert_eq!(history, vec![1, 2]);
    assert_eq!(orders.list_for_participant(p.participant_id).unwrap(), vec![revised]);
}

#[test]
fn test_order_validation() {
    let t = TestRegistry::in_memory();
    let p = t.registry.participants().insert(NewParticipant::default()).unwrap();
    let orders = t.registry.orders();
    let pid = p.participant_id;

    let invalid = |new, expected: &str| match orders.insert(pid, new) {
        Err(RegistryError::InvalidInput(msg)) => assert_eq!(msg, expected),
        other => panic!("expected InvalidInput({expected}), got {other:?}"),
    };

    let mut wrong_subject = order_request(pid, "C-1", &["1ED10"]);
    wrong_subject.subject = "Patient/1".into();
    invalid(wrong_subject, "Subject Patient/1 invalid.");

    invalid(order_request(pid, "C-1", &["NOPE"]), "Invalid test value: NOPE");

    let mut no_ids = order_request(pid, "C-1", &["1ED10"]);
    no_ids.identifiers.clear();
    invalid(no_ids, "At least one identifier is required");

    let stranger = ParticipantId::new(pid.get().wrapping_add(1));
    match orders.insert(stranger, order_request(stranger, "C-1", &["1ED10"])) {
        Err(RegistryError::InvalidInput(msg)) => {
            assert_eq!(msg, format!("BiobankOrder.participantId {stranger} is not found."));
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    orders.insert(pid, order_request(pid, "C-1", &["1ED10"])).unwrap();
    invalid(
        order_request(pid, "C-1", &["1ED10"]),
        "Identifier https://orders.cohort.test|C-1 is already in use by another order",
    );

    // Only the one accepted order reached the summary.
    let summary = t.registry.summaries().get(pid).unwrap().unwrap();
    assert_eq!(summary.num_biobank_orders, 1);
}

/// A caller-supplied order id that is taken is an error, not a retry.
#[test]
fn test_supplied_order_id_collision() {
    let t = TestRegistry::in_memory();
    let p = t.registry.participants().insert(NewParticipant::default()).unwrap();
    let orders = t.registry.orders();
    let pid = p.participant_id;

    let mut first = order_request(pid, "D-1", &["1ED10"]);
    first.order_id = Some("order-1".into());
    orders.insert(pid, first).unwrap();

    let mut second = order_request(pid, "D-2", &["1ED10"]);
    second.order_id = Some("order-1".into());
    assert!(matches!(
        orders.insert(pid, second),
        Err(RegistryError::AlreadyExists { .. })
    ));
    assert!(orders.get("order-1").unwrap().is_some());
}

/// Orders and participants share one change feed.
#[test]
fn test_orders_appear_in_change_feed() {
    let t = TestRegistry::in_memory();
    let p = t.registry.participants().insert(NewParticipant::default()).unwrap();
    let order = t
        .registry
        .orders()
        .insert(p.participant_id, order_request(p.participant_id, "E-1", &["1ED10"]))
        .unwrap();
    assert!(order.log_position > p.log_position);

    let tables: Vec<String> = t
        .store
        .changes_since(LogPosition::ZERO, 100)
        .unwrap()
        .into_iter()
        .map(|e| e.table)
        .collect();
    assert!(tables.iter().any(|table| table == "participant"));
    assert!(tables.iter().any(|table| table == "biobank_order"));
}

//! Integration test: state survives closing and reopening the database.

use std::time::Duration;

use cohort_config::CONFIG_SINGLETON_KEY;
use cohort_integration_tests::{EPOCH, TestRegistry, order_request, provider_link};
use cohort_types::{HpoId, NewParticipant};
use serde_json::json;

#[test]
fn test_reopen_keeps_records_history_and_positions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let (p, last_position) = {
        let t = TestRegistry::open(&path);
        t.seed_hpos(&[(1, "PITT")]);
        let participants = t.registry.participants();
        let p = participants.insert(NewParticipant::default()).unwrap();
        let mut linked = p.clone();
        linked.provider_link = Some(provider_link("PITT"));
        let p = participants.update(&linked).unwrap();
        t.registry
            .orders()
            .insert(p.participant_id, order_request(p.participant_id, "P-1", &["1ED10"]))
            .unwrap();
        t.registry
            .config()
            .store_config(CONFIG_SINGLETON_KEY, json!({"k": ["v"]}))
            .unwrap();
        (p, t.store.last_position())
    };

    let t = TestRegistry::open(&path);
    assert_eq!(t.store.last_position(), last_position);
    assert_eq!(
        t.registry.participants().get(p.participant_id).unwrap(),
        Some(p.clone())
    );
    assert_eq!(t.registry.participants().history(p.participant_id).count(), 2);

    let summary = t.registry.summaries().get(p.participant_id).unwrap().unwrap();
    assert_eq!(summary.hpo_id, HpoId::new(1));
    assert_eq!(summary.num_biobank_orders, 1);

    assert_eq!(t.registry.config().get_setting("k", None).unwrap(), json!("v"));
    let after = EPOCH.saturating_add(Duration::from_millis(1));
    assert_eq!(
        t.registry
            .config()
            .get_config_active_at(CONFIG_SINGLETON_KEY, after)
            .unwrap(),
        json!({"k": ["v"]})
    );

    // New writes continue after the persisted position.
    let next = t.registry.participants().update(&p).unwrap();
    assert!(next.log_position > last_position);
    assert_eq!(next.version, 3);
}

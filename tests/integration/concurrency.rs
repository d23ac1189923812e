//! Integration test: concurrent writers.
//!
//! Many threads insert and update through one registry; every update must
//! land exactly once and history must stay gapless.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use cohort_integration_tests::TestRegistry;
use cohort_registry::{RegistryError, WriteOptions};
use cohort_store::Store;
use cohort_types::{LogPosition, NewParticipant};

const THREADS: usize = 8;
const UPDATES_PER_THREAD: u32 = 25;

fn contended() -> TestRegistry {
    TestRegistry::with_store(
        Arc::new(Store::in_memory()),
        WriteOptions {
            max_insert_attempts: 20,
            max_update_attempts: 1_000,
        },
    )
}

#[test]
fn test_concurrent_updates_to_one_participant() {
    let t = contended();
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..UPDATES_PER_THREAD {
                    participants.update(&p).unwrap();
                }
            });
        }
    });

    let expected = 1 + THREADS as u32 * UPDATES_PER_THREAD;
    let current = participants.get_required(p.participant_id).unwrap();
    assert_eq!(current.version, expected);

    let history: Vec<_> = participants
        .history(p.participant_id)
        .map(|r| r.unwrap().snapshot)
        .collect();
    assert_eq!(history.len() as u32, expected);
    for (i, snapshot) in history.iter().enumerate() {
        assert_eq!(snapshot.version, i as u32 + 1);
    }
    assert!(history.windows(2).all(|w| w[0].log_position < w[1].log_position));
}

#[test]
fn test_concurrent_inserts_get_distinct_ids_and_positions() {
    let t = contended();
    let participants = t.registry.participants();

    let inserted: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..20)
                        .map(|_| participants.insert(NewParticipant::default()))
                        .collect::<Result<Vec<_>, RegistryError>>()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let ids: HashSet<_> = inserted.iter().map(|p| p.participant_id).collect();
    let biobank_ids: HashSet<_> = inserted.iter().map(|p| p.biobank_id).collect();
    let positions: HashSet<_> = inserted.iter().map(|p| p.log_position).collect();
    assert_eq!(ids.len(), inserted.len());
    assert_eq!(biobank_ids.len(), inserted.len());
    assert_eq!(positions.len(), inserted.len());
    assert_eq!(participants.valid_biobank_ids().unwrap(), biobank_ids);

    let synced = participants.sync_after(LogPosition::ZERO, 1_000).unwrap();
    assert_eq!(synced.len(), inserted.len());
    assert!(synced.windows(2).all(|w| w[0].log_position < w[1].log_position));
}

/// With a single attempt, a contended update reports a conflict instead of
/// overwriting the winner.
#[test]
fn test_update_without_retries_reports_conflict() {
    let t = TestRegistry::with_store(
        Arc::new(Store::in_memory()),
        WriteOptions {
            max_insert_attempts: 20,
            max_update_attempts: 1,
        },
    );
    let participants = t.registry.participants();
    let p = participants.insert(NewParticipant::default()).unwrap();

    let (ok, conflicts) = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    let mut ok = 0u32;
                    let mut conflicts = 0u32;
                    for _ in 0..UPDATES_PER_THREAD {
                        match participants.update(&p) {
                            Ok(_) => ok += 1,
                            Err(RegistryError::Conflict { attempts: 1, .. }) => conflicts += 1,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                    (ok, conflicts)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .fold((0, 0), |(a, b), (c, d)| (a + c, b + d))
    });

    assert_eq!(ok + conflicts, THREADS as u32 * UPDATES_PER_THREAD);
    let current = participants.get_required(p.participant_id).unwrap();
    assert_eq!(current.version, 1 + ok);
    assert_eq!(participants.history(p.participant_id).count() as u32, 1 + ok);
}

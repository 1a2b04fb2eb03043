//! Integration tests for update cycles: slots, repository fan-out and
//! store notifications working together.


use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use meeting_store::{
    ClearEvent, DataStore, Model, ModelRegistry, Record, StoreError, UpdateBatch,
};
use models::{Motion, MotionBlock, User};
use repositories::{Call, CallLog, RecordingRepository, SummaryRepository};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TryRecvError};

fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn recording_store(log: &CallLog) -> DataStore {
    let registry = ModelRegistry::new()
        .with_model::<Motion>()
        .with_model::<User>()
        .with_model::<MotionBlock>()
        .with_repository(RecordingRepository::new("motions/motion", log))
        .with_repository(RecordingRepository::new("users/user", log));
    DataStore::new(Arc::new(registry))
}

fn drain<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> usize {
    let mut count = 0;
    while receiver.try_recv().is_ok() {
        count += 1;
    }
    count
}

async fn wait_for_requests(store: &DataStore, expected: usize) {
    for _ in 0..200 {
        if store.update_manager().pending_requests().unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("expected {} pending slot requests", expected);
}

#[test]
fn derive_fills_in_collection_and_id() {
    assert_eq!(Motion::COLLECTION, "motions/motion");
    assert!(Motion::MEETING_SCOPED);
    assert_eq!(User::COLLECTION, "users/user");
    assert!(!User::MEETING_SCOPED);
    assert_eq!(MotionBlock::COLLECTION, "motion_block");

    let user = User {
        user_id: 12,
        username: "admin".into(),
    };
    assert_eq!(user.id(), 12);
}

#[tokio::test]
async fn commit_notifies_repositories_in_two_phases() {
    let log = new_log();
    let store = recording_store(&log);
    store
        .add_models(&[Motion::new(1, "Budget"), Motion::new(2, "Statute")])
        .unwrap();

    let slot = store.begin_update().await.unwrap();
    store.remove("motions/motion", &[1]).unwrap();
    store.add_models(&[Motion::new(3, "Agenda")]).unwrap();
    store
        .add_models(&[User {
            user_id: 5,
            username: "chair".into(),
        }])
        .unwrap();
    store.commit_update(&slot).unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            Call::Delete("motions/motion", vec![1]),
            Call::Changed("motions/motion", vec![3]),
            Call::Delete("users/user", vec![]),
            Call::Changed("users/user", vec![5]),
            Call::Commit("motions/motion", vec![1, 3]),
            Call::Commit("users/user", vec![5]),
        ]
    );
}

#[tokio::test]
async fn repositories_hear_nothing_outside_a_slot() {
    let log = new_log();
    let store = recording_store(&log);

    store.add_models(&[Motion::new(1, "Budget")]).unwrap();
    store.remove("motions/motion", &[1]).unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn batch_commits_with_a_single_modified_signal() {
    let log = new_log();
    let store = recording_store(&log);
    let mut modified = store.subscribe_modified().unwrap();

    let slot = store.begin_update().await.unwrap();
    for id in 1..=10 {
        store.add_models(&[Motion::new(id, "Draft")]).unwrap();
    }
    store.remove("motions/motion", &[4, 5]).unwrap();
    assert_eq!(modified.try_recv(), Err(TryRecvError::Empty));

    store.commit_update(&slot).unwrap();
    assert_eq!(drain(&mut modified), 1);
    assert_eq!(store.get_all("motions/motion").unwrap().len(), 8);
}

#[tokio::test]
async fn changed_then_deleted_id_is_reported_twice() {
    let log = new_log();
    let store = recording_store(&log);

    let slot = store.begin_update().await.unwrap();
    store.add_models(&[Motion::new(7, "Temporary")]).unwrap();
    store.remove("motions/motion", &[7]).unwrap();
    store.commit_update(&slot).unwrap();

    let calls = log.lock().unwrap().clone();
    assert!(calls.contains(&Call::Delete("motions/motion", vec![7])));
    assert!(calls.contains(&Call::Changed("motions/motion", vec![7])));
    assert!(calls.contains(&Call::Commit("motions/motion", vec![7, 7])));
}

#[tokio::test]
async fn dropped_slot_skips_repositories_and_signal() {
    let log = new_log();
    let store = recording_store(&log);
    let mut modified = store.subscribe_modified().unwrap();

    let slot = store.begin_update().await.unwrap();
    store.add_models(&[Motion::new(1, "Budget")]).unwrap();
    store.drop_update().unwrap();

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(modified.try_recv(), Err(TryRecvError::Empty));
    // The mutation itself is not rolled back.
    assert!(store.get("motions/motion", 1).unwrap().is_some());
    assert!(matches!(
        store.commit_update(&slot),
        Err(StoreError::InvalidSlot { active: None, .. })
    ));
}

#[tokio::test]
async fn stale_and_foreign_slots_are_rejected() {
    let log = new_log();
    let store = recording_store(&log);
    let other = recording_store(&new_log());

    let first = store.begin_update().await.unwrap();
    store.commit_update(&first).unwrap();
    assert_eq!(
        store.commit_update(&first),
        Err(StoreError::InvalidSlot {
            given: first.id(),
            active: None
        })
    );

    let active = store.begin_update().await.unwrap();
    let foreign = other.begin_update().await.unwrap();
    assert_eq!(
        store.commit_update(&foreign),
        Err(StoreError::InvalidSlot {
            given: foreign.id(),
            active: Some(active.id())
        })
    );
    assert_eq!(
        store.update_manager().current_slot().unwrap(),
        Some(active.clone())
    );
    store.commit_update(&active).unwrap();
}

#[tokio::test]
async fn mutations_from_repositories_notify_immediately() {
    let summary = Arc::new(SummaryRepository::default());
    let registry = ModelRegistry::new()
        .with_model::<Motion>()
        .with_repository(summary.clone());
    let store = DataStore::new(Arc::new(registry));
    summary.attach(&store);
    let mut modified = store.subscribe_modified().unwrap();

    let slot = store.begin_update().await.unwrap();
    store
        .add_models(&[Motion::new(1, "Budget"), Motion::new(2, "Statute")])
        .unwrap();
    store.commit_update(&slot).unwrap();

    // one for the summary written during phase 2, one for the commit
    assert_eq!(drain(&mut modified), 2);
    let written = store
        .get(SummaryRepository::SUMMARY_COLLECTION, 1)
        .unwrap()
        .unwrap();
    assert_eq!(written.data()["touched"], 2);
    assert!(!store.update_manager().is_active().unwrap());
}

#[tokio::test]
async fn queued_updaters_are_served_newest_first() {
    let store = recording_store(&new_log());
    let first = store.begin_update().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for name in ["older", "newer"] {
        let task_store = store.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let slot = task_store.begin_update().await.unwrap();
            order.lock().unwrap().push(name);
            task_store.commit_update(&slot).unwrap();
        }));
        wait_for_requests(&store, tasks.len()).await;
    }

    store.commit_update(&first).unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["newer", "older"]);
    assert!(!store.update_manager().is_active().unwrap());
}

#[tokio::test]
async fn apply_update_runs_one_cycle() {
    let log = new_log();
    let store = recording_store(&log);
    store
        .add_models(&[Motion::new(1, "Budget"), Motion::new(2, "Statute")])
        .unwrap();
    let mut modified = store.subscribe_modified().unwrap();

    let batch: UpdateBatch = serde_json::from_value(json!({
        "changed": {"motions/motion": [{"id": 2, "title": "Statute v2"}]},
        "deleted": {"motions/motion": [1]}
    }))
    .unwrap();
    store.apply_update(batch).await.unwrap();

    assert_eq!(drain(&mut modified), 1);
    assert_eq!(store.get_model::<Motion>(1).unwrap(), None);
    assert_eq!(
        store.get_model::<Motion>(2).unwrap().unwrap().title,
        "Statute v2"
    );
    assert!(log
        .lock()
        .unwrap()
        .contains(&Call::Commit("motions/motion", vec![1, 2])));
}

#[tokio::test]
async fn failed_batch_releases_slot() {
    let log = new_log();
    let store = recording_store(&log);
    store.add_models(&[Motion::new(1, "Budget")]).unwrap();

    let batch = UpdateBatch::new()
        .with_deleted("motions/motion", &[1])
        .with_changed("motions/motion", json!({"title": "no id"}));
    let err = store.apply_update(batch).await.unwrap_err();

    assert_eq!(
        err,
        StoreError::MissingId {
            collection: "motions/motion".into()
        }
    );
    assert!(!store.update_manager().is_active().unwrap());
    assert!(log.lock().unwrap().is_empty());
    // the missing id is found before anything is removed
    assert!(store.get("motions/motion", 1).unwrap().is_some());

    // the next updater is not blocked
    let slot = store.begin_update().await.unwrap();
    store.commit_update(&slot).unwrap();
}

#[tokio::test]
async fn unfit_merge_fails_after_deletions() {
    let log = new_log();
    let store = recording_store(&log);
    store
        .add_models(&[Motion::new(1, "Budget"), Motion::new(2, "Statute")])
        .unwrap();

    let batch = UpdateBatch::new()
        .with_deleted("motions/motion", &[1])
        .with_changed("motions/motion", json!({"id": 2, "title": 5}));
    let err = store.apply_update(batch).await.unwrap_err();

    assert!(matches!(err, StoreError::Serde(_)));
    assert!(!store.update_manager().is_active().unwrap());
    assert!(log.lock().unwrap().is_empty());
    assert!(store.get("motions/motion", 1).unwrap().is_none());
    assert_eq!(
        store.get_model::<Motion>(2).unwrap().unwrap().title,
        "Statute"
    );
}

#[tokio::test]
async fn set_inside_slot_reports_old_then_new() {
    let log = new_log();
    let store = recording_store(&log);
    store
        .add_models(&[Motion::new(1, "Budget"), Motion::new(2, "Statute")])
        .unwrap();
    store
        .add_models(&[User {
            user_id: 5,
            username: "chair".into(),
        }])
        .unwrap();
    let mut motions = store.subscribe_changed_model::<Motion>().unwrap();

    let slot = store.begin_update().await.unwrap();
    let watcher = {
        let store = store.clone();
        thread::spawn(move || {
            let record = motions.blocking_recv().unwrap();
            let deleted = store
                .update_manager()
                .inspect_current(|slot| slot.deleted_models().clone())
                .unwrap();
            (record.id(), deleted)
        })
    };
    store
        .set(vec![Record::from_model(&Motion::new(3, "Agenda")).unwrap()])
        .unwrap();

    let (seen, deleted_when_seen) = watcher.join().unwrap();
    assert_eq!(seen, 3);
    assert_eq!(
        deleted_when_seen,
        Some(BTreeMap::from([
            ("motions/motion".to_string(), vec![1, 2]),
            ("users/user".to_string(), vec![5]),
        ]))
    );

    store.commit_update(&slot).unwrap();
    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            Call::Delete("motions/motion", vec![1, 2]),
            Call::Changed("motions/motion", vec![3]),
            Call::Delete("users/user", vec![5]),
            Call::Changed("users/user", vec![]),
            Call::Commit("motions/motion", vec![1, 2, 3]),
            Call::Commit("users/user", vec![5]),
        ]
    );
    assert_eq!(store.get_all("users/user").unwrap().len(), 0);
}

#[tokio::test]
async fn clear_meeting_models_keeps_organization_collections() {
    let store = recording_store(&new_log());
    store.add_models(&[Motion::new(1, "Budget")]).unwrap();
    store
        .add_models(&[User {
            user_id: 1,
            username: "admin".into(),
        }])
        .unwrap();
    store
        .add([Record::new("unregistered/thing", 1, json!({"id": 1}))])
        .unwrap();
    let mut cleared = store.subscribe_cleared();

    let removed = store.clear_meeting_models().unwrap();

    assert_eq!(removed, vec!["motions/motion".to_string()]);
    assert_eq!(
        cleared.try_recv().unwrap(),
        ClearEvent::Collections(vec!["motions/motion".to_string()])
    );
    assert!(store.get_all_models::<Motion>().unwrap().is_empty());
    assert_eq!(store.get_all_models::<User>().unwrap().len(), 1);
    assert_eq!(store.get_all("unregistered/thing").unwrap().len(), 1);
}

#[tokio::test]
async fn changed_subscription_sees_every_record_in_a_slot() {
    let store = recording_store(&new_log());
    let mut motions = store.subscribe_changed_model::<Motion>().unwrap();

    let slot = store.begin_update().await.unwrap();
    store
        .add_models(&[Motion::new(1, "A"), Motion::new(2, "B")])
        .unwrap();

    let first: Motion = motions.try_recv().unwrap().to_model().unwrap();
    let second: Motion = motions.try_recv().unwrap().to_model().unwrap();
    assert_eq!((first.id, second.id), (1, 2));

    store.commit_update(&slot).unwrap();
    assert_eq!(motions.try_recv(), Err(TryRecvError::Empty));
}

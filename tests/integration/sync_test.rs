//! Sync orchestrator against a scripted remote

use crate::common::*;
use crate::{assert_clean, assert_err, assert_ok, assert_pending};
use gigsync::shared::action::{Action, ActionRecord};
use gigsync::shared::entity::{Place, Tagged};
use gigsync::shared::error::{StoreError, SyncError};
use gigsync::store::LocalDatabase;
use gigsync::sync::{
    MessageKind, Phase, PullResult, RemoteRecord, SyncService, SyncSettings, SyncStatus,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn service(db: &Arc<LocalDatabase>, remote: &Arc<ScriptedRemote>) -> SyncService {
    SyncService::new(Arc::clone(db), remote.clone(), fast_settings())
}

#[tokio::test]
async fn test_edited_add_is_cleared_by_accepting_cycle() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    let id = assert_ok!(db.trips().add(trip("Uber", 1)).await);
    let edited = assert_ok!(db.trips().edit(id, |t| t.pay = 12.5).await);
    assert_pending!(edited, Action::Add);

    remote.assign_row(id, 40);
    let sync = service(&db, &remote);
    let report = assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(report.pushed, 1);
    assert!(report.is_clean());

    let stored = db.trips().get(id).await.unwrap();
    assert_clean!(stored);
    assert_eq!(stored.row_id(), Some(40));
    assert_eq!(stored.pay, 12.5);
    assert_eq!(remote.pushed()[0].add.len(), 1);
}

#[tokio::test]
async fn test_partial_rejection_keeps_siblings_committed() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    for number in 1..=3 {
        assert_ok!(db.trips().add(trip("Uber", number)).await);
    }
    remote.reject(2, "row locked upstream");

    let sync = service(&db, &remote);
    let report = assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(report.total_items, 3);
    assert_eq!(report.pushed, 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].1.local_id, 2);

    assert_clean!(db.trips().get(1).await.unwrap());
    assert_pending!(db.trips().get(2).await.unwrap(), Action::Add);
    assert_clean!(db.trips().get(3).await.unwrap());

    let state = sync.publisher().current();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.items_synced, 2);
    assert_eq!(state.total_items, 3);
    assert_eq!(state.error.as_deref(), Some("row locked upstream"));
    assert!(sync
        .publisher()
        .messages()
        .iter()
        .any(|m| m.kind == MessageKind::Warning));

    // only the rejected record goes out again
    assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(remote.pushed()[1].len(), 1);
}

#[tokio::test]
async fn test_accepted_delete_is_removed() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    let id = add_synced(&db, Place::new("Cafe")).await;
    assert_eq!(assert_ok!(db.places().delete_item(id).await), Some(Action::Delete));

    let sync = service(&db, &remote);
    assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(remote.pushed()[0].delete.len(), 1);
    assert!(db.places().get(id).await.is_none());
}

#[tokio::test]
async fn test_subscribers_see_every_transition() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    assert_ok!(db.trips().add(trip("Uber", 1)).await);
    let sync = service(&db, &remote);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = sync
        .publisher()
        .subscribe(move |state| sink.lock().unwrap().push(state.status));
    assert_ok!(sync.force_sync().await.expect("no cycle running"));
    subscription.unsubscribe();
    assert_ok!(sync.force_sync().await.expect("no cycle running"));

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&SyncStatus::Idle));
    assert!(seen.contains(&SyncStatus::Syncing));
    assert_eq!(seen.last(), Some(&SyncStatus::Success));
    assert_eq!(seen.iter().filter(|s| **s == SyncStatus::Success).count(), 1);
    assert_eq!(sync.publisher().subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_cycle_lets_it_finish() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    assert_ok!(db.trips().add(trip("Uber", 1)).await);
    remote.hold_pulls();

    let sync = service(&db, &remote);
    sync.start_polling();
    remote.pull_entered().await;
    assert!(sync.is_syncing());
    assert_eq!(sync.phase(), Phase::Syncing);

    sync.stop_polling();
    assert!(!sync.is_polling_enabled());
    remote.release();
    sync.shutdown().await;

    let state = sync.publisher().current();
    assert_eq!(state.status, SyncStatus::Success);
    assert_eq!(state.next_sync_in, None);
    assert_eq!(sync.phase(), Phase::Idle);
    assert_clean!(db.trips().get(1).await.unwrap());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(remote.pull_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_schedules_once() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    let sync = service(&db, &remote);

    sync.start_polling();
    sync.start_polling();
    assert!(sync.is_polling_enabled());

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(remote.pull_calls(), 1);
    assert!(sync.publisher().current().next_sync_in.is_some());
    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_back_off_then_recover() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    remote.fail_next(2);
    let sync = service(&db, &remote);
    sync.start_polling();

    // first attempt at 10s fails, retry 5s later
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(remote.pull_calls(), 1);
    assert_eq!(sync.phase(), Phase::Backoff);
    assert_eq!(sync.publisher().current().status, SyncStatus::Error);

    // second failure at 15s, retry 10s later succeeds
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(remote.pull_calls(), 3);
    assert_eq!(sync.phase(), Phase::Scheduled);
    assert_eq!(sync.publisher().current().status, SyncStatus::Success);

    let metrics = sync.metrics().await;
    assert_eq!(metrics.failed_syncs, 2);
    assert_eq!(metrics.successful_syncs, 1);
    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_push_times_out_and_backs_off() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    let id = assert_ok!(db.trips().add(trip("Uber", 1)).await);
    remote.hang_pushes();
    let settings = SyncSettings {
        remote_timeout: Duration::from_secs(2),
        ..fast_settings()
    };
    let sync = SyncService::new(Arc::clone(&db), remote.clone(), settings);

    let outcome = sync.force_sync().await.expect("no cycle running");
    assert_err!(outcome, SyncError::Timeout(_));
    assert_pending!(db.trips().get(id).await.unwrap(), Action::Add);
    assert_eq!(sync.publisher().current().status, SyncStatus::Error);

    // polled attempt 10s after start, abandoned 2s later
    sync.start_polling();
    tokio::time::sleep(Duration::from_secs(13)).await;
    assert_eq!(remote.push_calls(), 2);
    assert_eq!(sync.phase(), Phase::Backoff);
    assert_pending!(db.trips().get(id).await.unwrap(), Action::Add);
    sync.shutdown().await;
}

#[tokio::test]
async fn test_unwritable_store_disables_polling_until_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let db = Arc::new(assert_ok!(LocalDatabase::open(&path).await));
    assert_ok!(db.trips().add(trip("Uber", 1)).await);

    let blocker = dir.path().join("store.json.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let remote = Arc::new(ScriptedRemote::new());
    let settings = SyncSettings {
        poll_interval: Duration::from_secs(3600),
        ..fast_settings()
    };
    let sync = SyncService::new(Arc::clone(&db), remote.clone(), settings);
    sync.start_polling();

    let outcome = sync.force_sync().await.expect("no cycle running");
    assert!(outcome.unwrap_err().is_fatal());
    assert!(!sync.is_polling_enabled());
    assert!(!db.is_available());
    assert_eq!(sync.publisher().current().status, SyncStatus::Error);
    assert_err!(
        db.trips().add(trip("Uber", 2)).await,
        StoreError::Unavailable(_)
    );

    std::fs::remove_dir(&blocker).unwrap();
    assert_ok!(sync.resume().await);
    assert!(db.is_available());
    assert!(sync.is_polling_enabled());
    assert!(path.exists());

    assert_ok!(sync.force_sync().await.expect("no cycle running"));
    sync.shutdown().await;
}

#[tokio::test]
async fn test_pull_keeps_dirty_local_and_applies_tombstones() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());

    let mut edited = trip("Uber", 1);
    edited.set_row_id(Some(10));
    let edited_id = add_synced(&db, edited).await;
    let mut gone = trip("Uber", 2);
    gone.set_row_id(Some(11));
    let gone_id = add_synced(&db, gone).await;
    assert_ok!(db.trips().edit(edited_id, |t| t.pay = 5.0).await);
    remote.reject(edited_id, "stale row");

    let mut upstream = trip("Uber", 1);
    upstream.pay = 99.0;
    remote.queue_pull(PullResult {
        records: vec![
            RemoteRecord {
                row_id: 10,
                deleted: false,
                record: upstream.wrap(),
            },
            RemoteRecord {
                row_id: 11,
                deleted: true,
                record: trip("Uber", 2).wrap(),
            },
            RemoteRecord {
                row_id: 12,
                deleted: false,
                record: shift("Uber", 1).wrap(),
            },
        ],
        cursor: Some("c-1".to_string()),
    });

    let sync = service(&db, &remote);
    let report = assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(report.skipped_dirty, 1);
    assert_eq!(report.pulled, 2);

    let kept = db.trips().get(edited_id).await.unwrap();
    assert_eq!(kept.pay, 5.0);
    assert_pending!(kept, Action::Update);
    assert!(db.trips().get(gone_id).await.is_none());

    let shifts = db.shifts().list().await;
    assert_eq!(shifts.len(), 1);
    assert_clean!(shifts[0]);
    assert_eq!(shifts[0].row_id(), Some(12));

    assert_eq!(db.get_cursor().await.as_deref(), Some("c-1"));
    assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(remote.cursors(), vec![None, Some("c-1".to_string())]);
}

#[tokio::test]
async fn test_reload_refused_while_dirty_then_replaces_tables() {
    let db = memory_db();
    let remote = Arc::new(ScriptedRemote::new());
    assert_ok!(db.places().add(Place::new("Cafe")).await);
    let sync = service(&db, &remote);

    assert_err!(sync.reload().await, SyncError::UnsavedChanges(1));
    assert_ok!(sync.force_sync().await.expect("no cycle running"));

    remote.queue_pull(PullResult {
        records: vec![RemoteRecord {
            row_id: 5,
            deleted: false,
            record: Place::new("Diner").wrap(),
        }],
        cursor: Some("c-9".to_string()),
    });
    let report = assert_ok!(sync.reload().await);
    assert_eq!(report.pulled, 1);

    let places = db.places().list().await;
    assert_eq!(places.len(), 1);
    assert_eq!(places[0].place, "Diner");
    assert_clean!(places[0]);
    assert_eq!(db.get_cursor().await.as_deref(), Some("c-9"));
}

//! Local store persistence through the public API

use crate::common::*;
use crate::{assert_clean, assert_err, assert_ok, assert_pending};
use chrono::{TimeZone, Utc};
use gigsync::shared::action::{Action, ActionRecord};
use gigsync::shared::entity::{EntityType, Place};
use gigsync::shared::error::StoreError;
use gigsync::store::LocalDatabase;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_pending_work_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");

    {
        let db = assert_ok!(LocalDatabase::open(&path).await);
        assert_ok!(db.trips().add(trip("Uber", 1)).await);
        let mut synced = Place::new("Cafe");
        synced.set_row_id(Some(7));
        let place_id = add_synced(&db, synced).await;
        add_synced(&db, Place::new("Diner")).await;
        assert_ok!(db.places().delete_item(place_id).await);
        db.set_cursor("c-3").await;
        db.set_last_sync_time(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
            .await;
        assert_ok!(db.flush().await);
    }

    let db = assert_ok!(LocalDatabase::open(&path).await);
    assert_pending!(db.trips().get(1).await.unwrap(), Action::Add);
    let deleted = db.places().get(1).await.unwrap();
    assert_pending!(deleted, Action::Delete);
    assert_eq!(deleted.row_id(), Some(7));
    assert_clean!(db.places().get(2).await.unwrap());

    assert_eq!(db.get_cursor().await.as_deref(), Some("c-3"));
    assert_eq!(
        db.get_last_sync_time().await,
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    );
    assert_eq!(db.dirty_count(EntityType::Place).await, 1);
    assert_eq!(db.total_dirty().await, 2);

    // ids keep counting from where the previous process stopped
    let id = assert_ok!(db.places().add(Place::new("Bar")).await);
    assert_eq!(id, 3);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert_err!(LocalDatabase::open(&path).await, StoreError::Serialization(_));
}

#[tokio::test]
async fn test_stats_count_rows_and_dirty_records() {
    let db = memory_db();
    assert_ok!(db.trips().add(trip("Uber", 1)).await);
    add_synced(&db, shift("Uber", 1)).await;
    add_synced(&db, Place::new("Cafe")).await;

    let stats = db.stats().await;
    assert_eq!(stats.total_rows(), 3);
    assert_eq!(stats.total_dirty(), 1);
    assert!(stats.available);
    assert_eq!(stats.tables.len(), EntityType::ALL.len());
}

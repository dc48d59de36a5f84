//! Duplicate scans and bulk fixes over a populated store

use crate::common::*;
use crate::{assert_clean, assert_err, assert_ok, assert_pending};
use gigsync::diagnostics::{CanonicalRule, DiagnosticsEngine, DuplicateFindings, Severity};
use gigsync::shared::action::{Action, ActionRecord};
use gigsync::shared::entity::{EntityType, Name, Place, Region, Service};
use gigsync::shared::error::{DiagnosticsError, StoreError};
use gigsync::store::LocalDatabase;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn engine(db: &Arc<LocalDatabase>) -> DiagnosticsEngine {
    DiagnosticsEngine::new(Arc::clone(db))
}

#[tokio::test]
async fn test_trips_sharing_a_shift_key_form_one_group() {
    let db = memory_db();
    assert_ok!(db.trips().add(trip("Uber", 1)).await);
    assert_ok!(db.trips().add(trip("uber", 1)).await);
    assert_ok!(db.trips().add(trip("Uber", 2)).await);

    let item = engine(&db).scan_for_duplicates(EntityType::Trip).await;
    assert_eq!(item.severity, Severity::Error);
    assert_eq!(item.count, 1);
    assert_eq!(item.item_type, EntityType::Trip);
    assert!(item.fixable);
    // the service spelling differs, so merging would lose data
    assert!(!item.bulk_fixable);

    match item.duplicates() {
        Some(DuplicateFindings::Trip(groups)) => {
            assert_eq!(groups[0].key, "2024-01-01|uber|1");
            assert_eq!(groups[0].ids(), vec![1, 2]);
        }
        other => panic!("expected trip groups, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pending_deletes_are_not_duplicates() {
    let db = memory_db();
    add_synced(&db, Region::new("North")).await;
    let doomed = add_synced(&db, Region::new("north")).await;
    assert_ok!(db.regions().delete_item(doomed).await);

    let item = engine(&db).scan_for_duplicates(EntityType::Region).await;
    assert_eq!(item.count, 0);
    assert_eq!(item.severity, Severity::Info);
}

#[tokio::test]
async fn test_place_fix_moves_trip_references_and_reflags() {
    let db = memory_db();
    let keep = add_synced(&db, Place::new("Starbucks")).await;
    let merged = add_synced(&db, Place::new("starbucks ")).await;
    let mut visit = trip("Uber", 1);
    visit.place = "starbucks ".to_string();
    let visit_id = add_synced(&db, visit).await;

    let engine = engine(&db);
    let item = engine.scan_for_duplicates(EntityType::Place).await;
    assert_eq!(item.severity, Severity::Warning);

    let report = assert_ok!(engine.apply_bulk_fix(&item.targets()[0]).await);
    assert_eq!(report.canonical_id, keep);
    assert_eq!(report.removed, vec![merged]);
    assert_eq!(report.reassigned, 1);

    let visit = db.trips().get(visit_id).await.unwrap();
    assert_eq!(visit.place, "Starbucks");
    assert_pending!(visit, Action::Update);
    assert_pending!(db.places().get(keep).await.unwrap(), Action::Update);
    assert_pending!(db.places().get(merged).await.unwrap(), Action::Delete);

    let rescan = engine.scan_for_duplicates(EntityType::Place).await;
    assert_eq!(rescan.count, 0);
}

#[tokio::test]
async fn test_conflicting_reassignment_leaves_every_table_untouched() {
    let db = memory_db();
    add_synced(&db, Service::new("Uber")).await;
    add_synced(&db, Service::new("uber")).await;
    // renaming the second trip's service would collide with the first
    add_synced(&db, trip("Uber", 1)).await;
    add_synced(&db, trip("uber", 1)).await;
    add_synced(&db, shift("uber", 1)).await;

    let trips_before = db.trips().list().await;
    let shifts_before = db.shifts().list().await;
    let services_before = db.services().list().await;

    let engine = engine(&db);
    let target = engine.scan_for_duplicates(EntityType::Service).await.targets()[0].clone();
    assert_err!(
        engine.apply_bulk_fix(&target).await,
        DiagnosticsError::Store(StoreError::Conflict { .. })
    );

    assert_eq!(db.trips().list().await, trips_before);
    assert_eq!(db.shifts().list().await, shifts_before);
    assert_eq!(db.services().list().await, services_before);
    for service in &services_before {
        assert_clean!(service);
    }
}

#[tokio::test]
async fn test_fix_all_isolates_failing_groups() {
    let db = memory_db();
    for name in ["Uber", "uber", "Lyft", "LYFT"] {
        add_synced(&db, Service::new(name)).await;
    }
    add_synced(&db, trip("Uber", 1)).await;
    add_synced(&db, trip("uber", 1)).await;
    add_synced(&db, trip("LYFT", 1)).await;

    let outcomes = engine(&db).fix_all(EntityType::Service).await;
    assert_eq!(outcomes.len(), 2);
    let (lyft_key, lyft) = &outcomes[0];
    let (uber_key, uber) = &outcomes[1];
    assert_eq!(lyft_key, "lyft");
    assert_eq!(uber_key, "uber");
    assert_eq!(lyft.as_ref().map(|r| r.reassigned), Ok(1));
    assert!(uber.is_err());

    let live: Vec<String> = db
        .services()
        .list()
        .await
        .into_iter()
        .filter(|s| s.action() != Action::Delete)
        .map(|s| s.service)
        .collect();
    assert_eq!(live, vec!["Uber", "uber", "Lyft"]);
}

#[tokio::test]
async fn test_most_complete_rule_keeps_richest_record() {
    let db = memory_db();
    add_synced(&db, Place::new("Cafe")).await;
    let mut rich = Place::new("cafe");
    rich.addresses = vec!["1 Main St".to_string()];
    let rich_id = add_synced(&db, rich).await;

    let engine = engine(&db).with_rule(CanonicalRule::MostComplete);
    let target = engine.scan_for_duplicates(EntityType::Place).await.targets()[0].clone();
    let report = assert_ok!(engine.apply_bulk_fix(&target).await);
    assert_eq!(report.canonical_id, rich_id);
}

#[tokio::test]
async fn test_deleted_member_makes_group_stale() {
    let db = memory_db();
    add_synced(&db, Name::new("Ann")).await;
    let second = add_synced(&db, Name::new("ann")).await;
    add_synced(&db, Name::new("ANN")).await;

    let engine = engine(&db);
    let target = engine.scan_for_duplicates(EntityType::Name).await.targets()[0].clone();
    assert_ok!(db.names().delete_item(second).await);

    assert_err!(
        engine.apply_bulk_fix(&target).await,
        DiagnosticsError::StaleGroup { .. }
    );
    let live = db
        .names()
        .list()
        .await
        .iter()
        .filter(|n| n.action() != Action::Delete)
        .count();
    assert_eq!(live, 2);
}

#[tokio::test]
async fn test_fix_is_refused_on_unavailable_store() {
    let db = memory_db();
    add_synced(&db, Place::new("Cafe")).await;
    add_synced(&db, Place::new("CAFE")).await;
    let engine = engine(&db);
    let target = engine.scan_for_duplicates(EntityType::Place).await.targets()[0].clone();

    db.mark_unavailable("disk removed");
    assert_err!(
        engine.apply_bulk_fix(&target).await,
        DiagnosticsError::Store(StoreError::Unavailable(_))
    );
    assert_eq!(db.places().count().await, 2);
}

//! Entity and store fixtures

#![allow(dead_code)]

use chrono::Utc;
use gigsync::shared::action::clear_action;
use gigsync::shared::entity::{Shift, Trip};
use gigsync::store::{LocalDatabase, StoredEntity};
use gigsync::sync::SyncSettings;
use std::sync::Arc;
use std::time::Duration;

pub const DATE: &str = "2024-01-01";

pub fn memory_db() -> Arc<LocalDatabase> {
    Arc::new(LocalDatabase::in_memory())
}

pub fn trip(service: &str, number: u32) -> Trip {
    Trip::new(DATE, service, number)
}

pub fn shift(service: &str, number: u32) -> Shift {
    Shift::new(DATE, service, number)
}

/// Insert a record and mark it as already synced
pub async fn add_synced<T: StoredEntity>(db: &LocalDatabase, mut record: T) -> u64 {
    clear_action(&mut record, Utc::now());
    db.table::<T>()
        .add(record)
        .await
        .expect("fixture insert should not conflict")
}

/// Short timings for scheduler tests under paused time
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        poll_interval: Duration::from_secs(10),
        countdown_tick: Duration::from_secs(1),
        remote_timeout: Duration::from_secs(600),
        backoff_base: Duration::from_secs(5),
        backoff_max: Duration::from_secs(300),
        message_capacity: 50,
    }
}

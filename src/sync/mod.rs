//! # Sync Orchestrator
//!
//! Periodically drains dirty records from the local store, pushes them to the
//! remote collaborator, pulls remote changes back, and publishes progress.
//!
//! ## Architecture
//!
//! The sync service coordinates:
//! - **Scheduler**: polling switch, phase and backoff (`scheduler.rs`)
//! - **Remote**: the [`RemoteClient`] collaborator (`remote.rs`, `http.rs`)
//! - **Publisher**: state broadcast and message log (`publisher.rs`)
//! - **Metrics**: cycle counters and timings (`metrics.rs`)
//!
//! ## Cycle
//!
//! 1. Gather dirty records across every table.
//! 2. Push them per entity type, partitioned by action.
//! 3. Clear accepted records (unless edited mid-flight); physically remove
//!    accepted deletes; leave rejected records dirty.
//! 4. Pull since the stored cursor. Clean local records take the remote
//!    version; dirty local records win.
//! 5. Persist the snapshot and re-arm.
//!
//! Transport failures abort the rest of the cycle and enter backoff. A store
//! that cannot be written disables polling until [`SyncService::resume`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gigsync::sync::{SyncService, SyncSettings};
//! use gigsync::sync::http::HttpRemote;
//! use gigsync::store::LocalDatabase;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let db = Arc::new(LocalDatabase::in_memory());
//! let remote = Arc::new(HttpRemote::new("https://sheets.example.com/api"));
//! let service = SyncService::new(db, remote, SyncSettings::default());
//!
//! service.start_polling();
//! let _subscription = service.publisher().subscribe(|state| {
//!     println!("{:?} {}%", state.status, state.progress);
//! });
//! service.force_sync().await;
//! service.stop_polling();
//! # }
//! ```

pub mod http;
pub mod metrics;
pub mod publisher;
pub mod remote;
pub mod scheduler;
pub mod sync_state;

pub use metrics::SyncMetrics;
pub use publisher::{Subscription, SyncPublisher};
pub use remote::{
    Accepted, CanonicalFields, OfflineRemote, PullResult, PushBatch, PushResult, Rejected,
    RemoteClient, RemoteRecord,
};
pub use scheduler::{Backoff, Clock, Phase, SyncScheduler, SystemClock};
pub use sync_state::{MessageKind, SyncMessage, SyncOperation, SyncState, SyncStatus};

use crate::shared::action::{clear_action, Action, ActionRecord};
use crate::shared::config::AppConfig;
use crate::shared::entity::{
    Address, EntityType, Name, Place, Region, Record, Service, Shift, Trip,
};
use crate::shared::error::{StoreError, SyncError};
use crate::store::{LocalDatabase, StoredEntity, TableData};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Orchestrator timing
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub countdown_tick: Duration,
    pub remote_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub message_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            countdown_tick: config.countdown_tick,
            remote_timeout: config.remote_timeout,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            message_capacity: config.message_capacity,
        }
    }
}

/// Outcome of one finished cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Dirty records gathered at cycle start
    pub total_items: usize,
    /// Records accepted and committed
    pub pushed: usize,
    /// Records refused or not acknowledged, with reasons
    pub rejected: Vec<(EntityType, Rejected)>,
    /// Remote records applied locally
    pub pulled: usize,
    /// Remote records ignored because the local copy was dirty
    pub skipped_dirty: usize,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

struct Inner {
    db: Arc<LocalDatabase>,
    remote: Arc<dyn RemoteClient>,
    settings: SyncSettings,
    scheduler: SyncScheduler,
    publisher: SyncPublisher,
    metrics: RwLock<SyncMetrics>,
    syncing: AtomicBool,
    clock: Arc<dyn Clock>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Main sync service coordinator
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("settings", &self.inner.settings)
            .field("phase", &self.inner.scheduler.phase())
            .field("polling", &self.inner.scheduler.is_enabled())
            .finish()
    }
}

/// Resets the syncing flag when a cycle ends, however it ends
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncService {
    /// Create a new sync service
    pub fn new(
        db: Arc<LocalDatabase>,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
    ) -> Self {
        Self::with_clock(db, remote, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Arc<LocalDatabase>,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = SyncScheduler::new(
            settings.poll_interval,
            Backoff::new(settings.backoff_base, settings.backoff_max),
        );
        let publisher = SyncPublisher::new(settings.message_capacity);
        Self {
            inner: Arc::new(Inner {
                db,
                remote,
                settings,
                scheduler,
                publisher,
                metrics: RwLock::new(SyncMetrics::new()),
                syncing: AtomicBool::new(false),
                clock,
                poll_task: Mutex::new(None),
            }),
        }
    }

    pub fn publisher(&self) -> &SyncPublisher {
        &self.inner.publisher
    }

    pub fn database(&self) -> &Arc<LocalDatabase> {
        &self.inner.db
    }

    pub fn phase(&self) -> Phase {
        self.inner.scheduler.phase()
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.inner.scheduler.is_enabled()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.inner.metrics.read().await.clone()
    }

    /// Arm periodic syncing. Calling it again while armed does nothing.
    pub fn start_polling(&self) {
        let Some(generation) = self.inner.scheduler.start() else {
            tracing::debug!("Polling already enabled");
            return;
        };
        tracing::info!(
            "Polling enabled every {:?} (generation {})",
            self.inner.settings.poll_interval,
            generation
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            Inner::poll_loop(inner, generation).await;
        });
        let mut slot = self
            .inner
            .poll_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // a stopped loop still finishing its cycle exits on its own
        *slot = Some(handle);
    }

    /// Disarm polling. A running cycle completes; nothing is scheduled after it.
    pub fn stop_polling(&self) {
        if self.inner.scheduler.stop() {
            tracing::info!("Polling disabled");
        }
        self.inner.publisher.set_countdown(None);
    }

    /// Run one user-triggered cycle now. `None` if a cycle is already running.
    pub async fn force_sync(&self) -> Option<Result<CycleReport, SyncError>> {
        self.inner.run_cycle(SyncOperation::Save).await
    }

    /// Replace every table with a full pull. Refused while local edits are pending.
    pub async fn reload(&self) -> Result<CycleReport, SyncError> {
        self.inner.run_reload().await
    }

    /// Bring a stopped engine back after the store failed
    pub async fn resume(&self) -> Result<(), SyncError> {
        self.inner.db.restore().await?;
        self.start_polling();
        Ok(())
    }

    /// Stop polling and wait for the loop to finish its current cycle
    pub async fn shutdown(&self) {
        self.stop_polling();
        let handle = self
            .inner
            .poll_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

impl Inner {
    async fn poll_loop(inner: Arc<Inner>, generation: u64) {
        loop {
            if !inner.scheduler.is_current(generation) {
                break;
            }
            let delay = inner.scheduler.next_delay();
            if !inner.countdown(delay, generation).await {
                break;
            }
            match inner.run_cycle(SyncOperation::AutoSave).await {
                None => tracing::debug!("Tick dropped: a cycle is already running"),
                Some(Err(e)) => tracing::debug!("Scheduled cycle failed: {}", e),
                Some(Ok(_)) => {}
            }
        }
        tracing::debug!("Poll loop (generation {}) exited", generation);
    }

    /// Publish the countdown tick by tick. `false` if polling was cancelled.
    async fn countdown(&self, delay: Duration, generation: u64) -> bool {
        let tick = self.settings.countdown_tick;
        let mut remaining = delay;
        loop {
            if !self.scheduler.is_current(generation) {
                return false;
            }
            self.publisher.set_countdown(Some(remaining));
            if remaining.is_zero() {
                return true;
            }
            let step = tick.min(remaining);
            tokio::select! {
                _ = tokio::time::sleep(step) => remaining -= step,
                _ = self.scheduler.cancelled() => {}
            }
        }
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        tokio::time::timeout(self.settings.remote_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout(self.settings.remote_timeout))?
    }

    fn begin(&self, operation: SyncOperation) -> Option<SyncingGuard<'_>> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.scheduler.set_phase(Phase::Syncing);
        self.publisher.start(operation, 0);
        tracing::info!("Sync cycle started ({})", operation);
        Some(SyncingGuard(&self.syncing))
    }

    async fn run_cycle(&self, operation: SyncOperation) -> Option<Result<CycleReport, SyncError>> {
        let _guard = self.begin(operation)?;
        self.metrics.write().await.record_sync_start();

        let mut report = CycleReport::default();
        let result = self.cycle(&mut report).await;
        Some(self.finish(result.map(|()| report)).await)
    }

    async fn run_reload(&self) -> Result<CycleReport, SyncError> {
        let dirty = self.db.total_dirty().await;
        if dirty > 0 {
            return Err(SyncError::UnsavedChanges(dirty));
        }
        let _guard = self.begin(SyncOperation::Load).ok_or(SyncError::AlreadySyncing)?;
        self.metrics.write().await.record_sync_start();
        let result = self.reload_all().await;
        self.finish(result).await
    }

    /// Publish the outcome, update backoff and metrics
    async fn finish(
        &self,
        result: Result<CycleReport, SyncError>,
    ) -> Result<CycleReport, SyncError> {
        match &result {
            Ok(report) => {
                self.scheduler.record_success();
                self.metrics.write().await.record_sync_success(
                    report.pushed,
                    report.rejected.len(),
                    report.pulled,
                );
                match report.rejected.last() {
                    None => self.publisher.complete(None),
                    Some((_, rejected)) => self.publisher.fail(rejected.reason.clone()),
                }
                tracing::info!(
                    "Sync cycle finished: {} pushed, {} rejected, {} pulled",
                    report.pushed,
                    report.rejected.len(),
                    report.pulled
                );
            }
            Err(e) if e.is_fatal() => {
                self.metrics.write().await.record_sync_failure();
                tracing::error!("Sync disabled, local store failed: {}", e);
                self.scheduler.stop();
                self.publisher.fail(e.to_string());
                self.publisher.set_countdown(None);
            }
            Err(e) if e.is_transport() => {
                self.metrics.write().await.record_sync_failure();
                let delay = self.scheduler.record_failure();
                tracing::warn!("Sync cycle failed, retrying in {:?}: {}", delay, e);
                self.publisher.fail(e.to_string());
            }
            Err(e) => {
                self.metrics.write().await.record_sync_failure();
                tracing::warn!("Sync cycle failed: {}", e);
                self.publisher.fail(e.to_string());
            }
        }
        self.scheduler.settle();
        result
    }

    async fn cycle(&self, report: &mut CycleReport) -> Result<(), SyncError> {
        self.db.ensure_available()?;

        report.total_items = self.db.total_dirty().await;
        self.publisher.set_total(report.total_items);
        tracing::debug!("{} dirty records to push", report.total_items);

        self.push_table::<Trip>(report).await?;
        self.push_table::<Shift>(report).await?;
        self.push_table::<Address>(report).await?;
        self.push_table::<Place>(report).await?;
        self.push_table::<Name>(report).await?;
        self.push_table::<Service>(report).await?;
        self.push_table::<Region>(report).await?;

        let cursor = self.db.get_cursor().await;
        let pulled = self.with_timeout(self.remote.pull(cursor)).await?;
        let mut by_type = group_by_type(pulled.records);

        self.apply_pulled::<Trip>(&mut by_type, report).await?;
        self.apply_pulled::<Shift>(&mut by_type, report).await?;
        self.apply_pulled::<Address>(&mut by_type, report).await?;
        self.apply_pulled::<Place>(&mut by_type, report).await?;
        self.apply_pulled::<Name>(&mut by_type, report).await?;
        self.apply_pulled::<Service>(&mut by_type, report).await?;
        self.apply_pulled::<Region>(&mut by_type, report).await?;

        if let Some(cursor) = pulled.cursor {
            self.db.set_cursor(&cursor).await;
        }
        self.db.set_last_sync_time(self.clock.now()).await;
        self.db.flush().await?;
        Ok(())
    }

    async fn push_table<T: StoredEntity>(&self, report: &mut CycleReport) -> Result<(), SyncError> {
        let table = self.db.table::<T>();
        let gathered = table.dirty().await;
        if gathered.is_empty() {
            return Ok(());
        }

        let mut batch = PushBatch::new(self.db.client_id(), T::ENTITY);
        for record in &gathered {
            batch.push(record.clone().wrap());
        }
        tracing::debug!(
            "Pushing {} {} records ({} add, {} update, {} delete)",
            batch.len(),
            T::ENTITY,
            batch.add.len(),
            batch.update.len(),
            batch.delete.len()
        );

        let result = self.with_timeout(self.remote.push(batch)).await?;
        self.db.ensure_available()?;

        let mut answered: HashSet<u64> = HashSet::new();
        let mut data = table.write().await;
        for accepted in &result.accepted {
            let Some(sent) = gathered.iter().find(|r| r.id() == accepted.local_id) else {
                tracing::warn!("{}: remote accepted unknown record {}", T::ENTITY, accepted.local_id);
                continue;
            };
            answered.insert(accepted.local_id);
            commit_accepted(&mut data, sent, accepted, self.clock.now());
            report.pushed += 1;
            self.publisher.progress(report.pushed, None);
        }
        drop(data);

        let mut rejections: Vec<Rejected> = result
            .rejected
            .into_iter()
            .filter(|r| answered.insert(r.local_id))
            .collect();
        for record in &gathered {
            if !answered.contains(&record.id()) {
                rejections.push(Rejected {
                    local_id: record.id(),
                    reason: "not acknowledged by remote".to_string(),
                });
            }
        }
        for rejected in rejections {
            tracing::warn!(
                "{} {} rejected: {}",
                T::ENTITY,
                rejected.local_id,
                rejected.reason
            );
            self.publisher.note_error(format!(
                "{} {}: {}",
                T::ENTITY,
                rejected.local_id,
                rejected.reason
            ));
            report.rejected.push((T::ENTITY, rejected));
        }
        Ok(())
    }

    async fn apply_pulled<T: StoredEntity>(
        &self,
        by_type: &mut HashMap<EntityType, Vec<RemoteRecord>>,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        let Some(records) = by_type.remove(&T::ENTITY) else {
            return Ok(());
        };
        self.db.ensure_available()?;
        let now = self.clock.now();
        let mut data = self.db.table::<T>().write().await;

        for remote in records {
            let Some(incoming) = T::unwrap_ref(&remote.record) else {
                continue;
            };
            let local = data
                .by_row_id(remote.row_id)
                .or_else(|| data.by_identity(&incoming.identity_key()))
                .cloned();

            match local {
                Some(local) if local.is_dirty() => {
                    tracing::debug!(
                        "{} {}: local edits win over remote row {}",
                        T::ENTITY,
                        local.id(),
                        remote.row_id
                    );
                    report.skipped_dirty += 1;
                }
                Some(local) if remote.deleted => {
                    data.remove(local.id());
                    report.pulled += 1;
                }
                Some(mut local) => {
                    if local.same_payload(incoming) && local.row_id() == Some(remote.row_id) {
                        continue;
                    }
                    local.overwrite_payload(incoming);
                    local.set_row_id(Some(remote.row_id));
                    clear_action(&mut local, now);
                    match data.replace(local) {
                        Ok(()) => report.pulled += 1,
                        Err(e) => tracing::warn!("Skipping remote row {}: {}", remote.row_id, e),
                    }
                }
                None if remote.deleted => {}
                None => {
                    let mut fresh = incoming.clone();
                    fresh.set_id(0);
                    fresh.set_row_id(Some(remote.row_id));
                    clear_action(&mut fresh, now);
                    match data.insert(fresh) {
                        Ok(_) => report.pulled += 1,
                        Err(e) => tracing::warn!("Skipping remote row {}: {}", remote.row_id, e),
                    }
                }
            }
        }
        Ok(())
    }

    async fn reload_all(&self) -> Result<CycleReport, SyncError> {
        self.db.ensure_available()?;
        let pulled = self.with_timeout(self.remote.pull(None)).await?;
        let mut by_type = group_by_type(pulled.records);
        let now = self.clock.now();

        let mut report = CycleReport {
            total_items: by_type.values().map(Vec::len).sum(),
            ..CycleReport::default()
        };
        self.publisher.set_total(report.total_items);

        let trips = fresh_rows::<Trip>(&mut by_type, now);
        let shifts = fresh_rows::<Shift>(&mut by_type, now);
        let addresses = fresh_rows::<Address>(&mut by_type, now);
        let places = fresh_rows::<Place>(&mut by_type, now);
        let names = fresh_rows::<Name>(&mut by_type, now);
        let services = fresh_rows::<Service>(&mut by_type, now);
        let regions = fresh_rows::<Region>(&mut by_type, now);
        report.pulled = trips.len()
            + shifts.len()
            + addresses.len()
            + places.len()
            + names.len()
            + services.len()
            + regions.len();

        // every writer held in lock order; nothing is swapped in unless all tables load
        let mut trip_data = self.db.trips().write().await;
        let mut shift_data = self.db.shifts().write().await;
        let mut address_data = self.db.addresses().write().await;
        let mut place_data = self.db.places().write().await;
        let mut name_data = self.db.names().write().await;
        let mut service_data = self.db.services().write().await;
        let mut region_data = self.db.regions().write().await;
        self.db.ensure_available()?;

        let staged = (
            staged_load(&trip_data, trips)?,
            staged_load(&shift_data, shifts)?,
            staged_load(&address_data, addresses)?,
            staged_load(&place_data, places)?,
            staged_load(&name_data, names)?,
            staged_load(&service_data, services)?,
            staged_load(&region_data, regions)?,
        );
        *trip_data = staged.0;
        *shift_data = staged.1;
        *address_data = staged.2;
        *place_data = staged.3;
        *name_data = staged.4;
        *service_data = staged.5;
        *region_data = staged.6;
        drop((
            trip_data,
            shift_data,
            address_data,
            place_data,
            name_data,
            service_data,
            region_data,
        ));

        self.publisher.progress(report.pulled, None);
        match pulled.cursor {
            Some(cursor) => self.db.set_cursor(&cursor).await,
            None => self.db.reset_cursor().await,
        }
        self.db.set_last_sync_time(now).await;
        self.db.flush().await?;
        Ok(report)
    }
}

/// Clear an accepted record unless it changed after it was gathered
fn commit_accepted<T: Record>(
    data: &mut TableData<T>,
    sent: &T,
    accepted: &Accepted,
    now: chrono::DateTime<chrono::Utc>,
) {
    let Some(current) = data.get(sent.id()).cloned() else {
        return;
    };
    let mut current = current;
    if let Some(row_id) = accepted.canonical.row_id {
        current.set_row_id(Some(row_id));
    }

    let edited_in_flight = current.action_time() != sent.action_time();
    if sent.action() == Action::Delete && current.action() == Action::Delete {
        data.remove(current.id());
        return;
    }
    if edited_in_flight {
        tracing::debug!(
            "{} {} edited during sync, staying dirty",
            T::ENTITY,
            current.id()
        );
        // a pending add was just created upstream; the next push is an update
        if current.action() == Action::Add {
            current.set_action_state(Action::Update, current.action_time(), false);
        }
    } else {
        clear_action(&mut current, now);
    }
    if let Err(e) = data.replace(current) {
        tracing::warn!("{} {}: commit failed: {}", T::ENTITY, sent.id(), e);
    }
}

fn group_by_type(records: Vec<RemoteRecord>) -> HashMap<EntityType, Vec<RemoteRecord>> {
    let mut by_type: HashMap<EntityType, Vec<RemoteRecord>> = HashMap::new();
    for record in records {
        by_type
            .entry(record.record.entity_type())
            .or_default()
            .push(record);
    }
    by_type
}

/// Clean local copies of the live remote rows of one type
fn fresh_rows<T: StoredEntity>(
    by_type: &mut HashMap<EntityType, Vec<RemoteRecord>>,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<T> {
    by_type
        .remove(&T::ENTITY)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| !r.deleted)
        .filter_map(|r| {
            let mut row = T::unwrap_ref(&r.record)?.clone();
            row.set_id(0);
            row.set_row_id(Some(r.row_id));
            clear_action(&mut row, now);
            Some(row)
        })
        .collect()
}

fn staged_load<T: Record>(current: &TableData<T>, rows: Vec<T>) -> Result<TableData<T>, StoreError> {
    let mut staged = current.clone();
    staged.load(rows)?;
    Ok(staged)
}

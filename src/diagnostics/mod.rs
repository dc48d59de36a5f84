//! # Diagnostics Module
//!
//! Data-quality scans over the local store and the fixes that repair them.
//!
//! ## Duplicates
//!
//! Records are grouped by a normalized key (see `normalize.rs`). Any group with
//! two or more live members is reported. A bulk fix keeps one canonical record,
//! points dependent trips and shifts at it and removes the rest:
//!
//! | Group type | Rewritten fields |
//! |---|---|
//! | Place | `trip.place` |
//! | Name | `trip.name` |
//! | Address | `trip.start_address`, `trip.end_address` |
//! | Service | `trip.service`, `shift.service` |
//! | Region | `trip.region`, `shift.region` |
//!
//! Every fix runs against staged copies of the affected tables while their
//! writers are held, and is swapped in only when every step succeeded.
//! Fixes do not flush; the next sync cycle or shutdown persists them.
//!
//! ## Other checks
//!
//! Orphaned trips, missing durations and empty shifts (see `checks.rs`).

pub mod checks;
pub mod normalize;
pub mod types;

pub use normalize::{normalize_shift_key, normalize_text, DedupKey};
pub use types::{
    CanonicalRule, CheckKind, DiagnosticItem, DuplicateFindings, DuplicateGroup, Findings,
    FixReport, FixTarget, Severity,
};

use crate::shared::action::{update_action, Action, ActionRecord};
use crate::shared::config::AppConfig;
use crate::shared::entity::{
    Address, EntityType, Name, Place, Record, Region, Service, Shift, Trip,
};
use crate::shared::error::{DiagnosticsError, StoreError};
use crate::store::{LocalDatabase, StoredEntity, TableData};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result type for bulk fixes
pub type Result<T> = std::result::Result<T, DiagnosticsError>;

/// Group live records by normalized key; singletons are dropped.
/// Groups come out sorted by key, members by id.
pub fn find_duplicate_groups<'a, T, I>(records: I) -> Vec<DuplicateGroup<T>>
where
    T: Record + DedupKey + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buckets: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for record in records {
        if record.action() == Action::Delete {
            continue;
        }
        buckets
            .entry(record.dedup_key())
            .or_default()
            .push(record.clone());
    }
    buckets
        .into_iter()
        .filter(|(_, items)| items.len() > 1)
        .map(|(key, mut items)| {
            items.sort_by_key(|i| i.id());
            DuplicateGroup { key, items }
        })
        .collect()
}

/// A reference entity whose text is copied into trips and shifts
trait Referenced: StoredEntity + DedupKey {
    fn text(&self) -> &str;

    fn reassign_trip(_trip: &mut Trip, _key: &str, _label: &str) -> bool {
        false
    }

    fn reassign_shift(_shift: &mut Shift, _key: &str, _label: &str) -> bool {
        false
    }
}

/// Point `field` at `label` when it names the same thing
fn retarget(field: &mut String, key: &str, label: &str) -> bool {
    if field != label && normalize_text(field) == key {
        *field = label.to_string();
        true
    } else {
        false
    }
}

impl Referenced for Place {
    fn text(&self) -> &str {
        self.label()
    }

    fn reassign_trip(trip: &mut Trip, key: &str, label: &str) -> bool {
        retarget(&mut trip.place, key, label)
    }
}

impl Referenced for Name {
    fn text(&self) -> &str {
        self.label()
    }

    fn reassign_trip(trip: &mut Trip, key: &str, label: &str) -> bool {
        retarget(&mut trip.name, key, label)
    }
}

impl Referenced for Address {
    fn text(&self) -> &str {
        self.label()
    }

    fn reassign_trip(trip: &mut Trip, key: &str, label: &str) -> bool {
        let start = retarget(&mut trip.start_address, key, label);
        let end = retarget(&mut trip.end_address, key, label);
        start || end
    }
}

impl Referenced for Service {
    fn text(&self) -> &str {
        self.label()
    }

    fn reassign_trip(trip: &mut Trip, key: &str, label: &str) -> bool {
        retarget(&mut trip.service, key, label)
    }

    fn reassign_shift(shift: &mut Shift, key: &str, label: &str) -> bool {
        retarget(&mut shift.service, key, label)
    }
}

impl Referenced for Region {
    fn text(&self) -> &str {
        self.label()
    }

    fn reassign_trip(trip: &mut Trip, key: &str, label: &str) -> bool {
        retarget(&mut trip.region, key, label)
    }

    fn reassign_shift(shift: &mut Shift, key: &str, label: &str) -> bool {
        retarget(&mut shift.region, key, label)
    }
}

/// Re-validate a scanned group against the current table and pick the survivor.
/// Live records that joined the key since the scan are merged as well.
fn plan_merge<T: Record + DedupKey>(
    data: &TableData<T>,
    target: &FixTarget,
    canonical: Option<u64>,
    rule: CanonicalRule,
) -> Result<(T, Vec<T>)> {
    for id in &target.member_ids {
        let record = data
            .get(*id)
            .ok_or_else(|| DiagnosticsError::stale(&target.key, format!("record {} no longer exists", id)))?;
        if record.action() == Action::Delete {
            return Err(DiagnosticsError::stale(
                &target.key,
                format!("record {} is pending delete", id),
            ));
        }
        if record.dedup_key() != target.key {
            return Err(DiagnosticsError::stale(
                &target.key,
                format!("record {} was edited to '{}'", id, record.dedup_key()),
            ));
        }
    }

    let members: Vec<T> = data
        .iter()
        .filter(|r| r.action() != Action::Delete && r.dedup_key() == target.key)
        .cloned()
        .collect();
    if members.len() < 2 {
        return Err(DiagnosticsError::EmptyGroup(target.key.clone()));
    }

    let chosen = match canonical {
        Some(id) => members
            .iter()
            .find(|m| m.id() == id)
            .ok_or(DiagnosticsError::UnknownCanonical(id))?,
        None => rule
            .choose(&members)
            .ok_or_else(|| DiagnosticsError::EmptyGroup(target.key.clone()))?,
    };
    let chosen = chosen.clone();
    let others = members.into_iter().filter(|m| m.id() != chosen.id()).collect();
    Ok((chosen, others))
}

/// Remove the non-canonical members and re-flag the survivor
fn merge_into<T: Record>(
    data: &mut TableData<T>,
    canonical: &T,
    others: &[T],
    now: DateTime<Utc>,
) -> std::result::Result<Vec<u64>, StoreError> {
    let mut removed = Vec::with_capacity(others.len());
    for other in others {
        data.delete_item(other.id(), now);
        removed.push(other.id());
    }
    let mut survivor = canonical.clone();
    update_action(&mut survivor, Action::Update, now);
    data.replace(survivor)?;
    Ok(removed)
}

fn title(entity: EntityType) -> String {
    let name = entity.table_name();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Duplicate detection, data-quality checks and fixes over one store
#[derive(Debug, Clone)]
pub struct DiagnosticsEngine {
    db: Arc<LocalDatabase>,
    rule: CanonicalRule,
    threshold: usize,
}

impl DiagnosticsEngine {
    pub fn new(db: Arc<LocalDatabase>) -> Self {
        Self {
            db,
            rule: CanonicalRule::default(),
            threshold: 10,
        }
    }

    pub fn from_config(db: Arc<LocalDatabase>, config: &AppConfig) -> Self {
        Self {
            db,
            rule: config.canonical_rule,
            threshold: config.severity_error_threshold,
        }
    }

    pub fn with_rule(mut self, rule: CanonicalRule) -> Self {
        self.rule = rule;
        self
    }

    /// Reference duplicates escalate to error above this many groups
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn rule(&self) -> CanonicalRule {
        self.rule
    }

    pub fn database(&self) -> &Arc<LocalDatabase> {
        &self.db
    }

    async fn duplicate_groups<T: StoredEntity + DedupKey>(&self) -> Vec<DuplicateGroup<T>> {
        let data = T::table(&self.db).read().await;
        find_duplicate_groups(data.iter())
    }

    /// Scan one table for duplicates
    pub async fn scan_for_duplicates(&self, entity: EntityType) -> DiagnosticItem {
        let findings = match entity {
            EntityType::Trip => DuplicateFindings::Trip(self.duplicate_groups().await),
            EntityType::Shift => DuplicateFindings::Shift(self.duplicate_groups().await),
            EntityType::Address => DuplicateFindings::Address(self.duplicate_groups().await),
            EntityType::Place => DuplicateFindings::Place(self.duplicate_groups().await),
            EntityType::Name => DuplicateFindings::Name(self.duplicate_groups().await),
            EntityType::Service => DuplicateFindings::Service(self.duplicate_groups().await),
            EntityType::Region => DuplicateFindings::Region(self.duplicate_groups().await),
        };
        self.duplicate_item(findings)
    }

    fn duplicate_item(&self, findings: DuplicateFindings) -> DiagnosticItem {
        let entity = findings.entity_type();
        let groups = findings.group_count();
        let owns_totals = entity.affects_totals();

        let severity = match groups {
            0 => Severity::Info,
            _ if owns_totals => Severity::Error,
            n if n > self.threshold => Severity::Error,
            _ => Severity::Warning,
        };
        let bulk_fixable = groups > 0 && (!owns_totals || findings.all_identical());
        let description = if groups == 0 {
            format!("No duplicate {} found", entity.table_name())
        } else {
            format!(
                "{} {} share a key with another record across {} group(s)",
                findings.record_count(),
                entity.table_name(),
                groups
            )
        };

        DiagnosticItem {
            name: format!("Duplicate {}", title(entity)),
            count: groups,
            severity,
            description,
            item_type: entity,
            fixable: groups > 0,
            bulk_fixable,
            findings: Findings::Duplicates(findings),
        }
    }

    /// Merge one scanned group using the configured canonical rule
    pub async fn apply_bulk_fix(&self, target: &FixTarget) -> Result<FixReport> {
        self.merge(target, None).await
    }

    /// Merge one scanned group, keeping `canonical_id`
    pub async fn apply_bulk_fix_with(
        &self,
        target: &FixTarget,
        canonical_id: u64,
    ) -> Result<FixReport> {
        self.merge(target, Some(canonical_id)).await
    }

    async fn merge(&self, target: &FixTarget, canonical: Option<u64>) -> Result<FixReport> {
        let result = match target.entity {
            EntityType::Trip => self.merge_records::<Trip>(target, canonical).await,
            EntityType::Shift => self.merge_records::<Shift>(target, canonical).await,
            EntityType::Address => self.merge_reference::<Address>(target, canonical).await,
            EntityType::Place => self.merge_reference::<Place>(target, canonical).await,
            EntityType::Name => self.merge_reference::<Name>(target, canonical).await,
            EntityType::Service => self.merge_reference::<Service>(target, canonical).await,
            EntityType::Region => self.merge_reference::<Region>(target, canonical).await,
        };
        match &result {
            Ok(report) => tracing::info!(
                "Merged {} duplicate {} into {} (key '{}', {} references moved)",
                report.removed.len(),
                target.entity.table_name(),
                report.canonical_id,
                report.key,
                report.reassigned
            ),
            Err(e) => tracing::warn!("Bulk fix of '{}' aborted: {}", target.key, e),
        }
        result
    }

    /// Trips and shifts: nothing references them, only the group table changes
    async fn merge_records<T: StoredEntity + DedupKey>(
        &self,
        target: &FixTarget,
        canonical: Option<u64>,
    ) -> Result<FixReport> {
        let mut data = T::table(&self.db).write().await;
        self.db.ensure_available()?;

        let (chosen, others) = plan_merge(&data, target, canonical, self.rule)?;
        if canonical.is_none() && others.iter().any(|o| !chosen.same_payload(o)) {
            return Err(DiagnosticsError::NotBulkFixable(target.key.clone()));
        }

        let mut staged = data.clone();
        let removed = merge_into(&mut staged, &chosen, &others, Utc::now())?;
        *data = staged;

        Ok(FixReport {
            entity: T::ENTITY,
            key: target.key.clone(),
            canonical_id: chosen.id(),
            removed,
            reassigned: 0,
        })
    }

    async fn merge_reference<T: Referenced>(
        &self,
        target: &FixTarget,
        canonical: Option<u64>,
    ) -> Result<FixReport> {
        // lock order: trips, shifts, then the group's table
        let mut trip_data = self.db.trips().write().await;
        let mut shift_data = self.db.shifts().write().await;
        let mut group_data = T::table(&self.db).write().await;
        self.db.ensure_available()?;

        let (chosen, others) = plan_merge(&group_data, target, canonical, self.rule)?;
        let label = chosen.text().to_string();
        let now = Utc::now();

        let mut trips = trip_data.clone();
        let mut shifts = shift_data.clone();
        let mut reassigned = 0;
        for trip in trip_data.iter().filter(|t| t.action() != Action::Delete) {
            let mut trip = trip.clone();
            if T::reassign_trip(&mut trip, &target.key, &label) {
                update_action(&mut trip, Action::Update, now);
                trips.replace(trip)?;
                reassigned += 1;
            }
        }
        for shift in shift_data.iter().filter(|s| s.action() != Action::Delete) {
            let mut shift = shift.clone();
            if T::reassign_shift(&mut shift, &target.key, &label) {
                update_action(&mut shift, Action::Update, now);
                shifts.replace(shift)?;
                reassigned += 1;
            }
        }

        let mut group = group_data.clone();
        let removed = merge_into(&mut group, &chosen, &others, now)?;

        *trip_data = trips;
        *shift_data = shifts;
        *group_data = group;

        Ok(FixReport {
            entity: T::ENTITY,
            key: target.key.clone(),
            canonical_id: chosen.id(),
            removed,
            reassigned,
        })
    }

    /// Bulk-fix every duplicate group of one table. Groups are independent:
    /// one failure leaves the others applied.
    pub async fn fix_all(&self, entity: EntityType) -> Vec<(String, Result<FixReport>)> {
        let item = self.scan_for_duplicates(entity).await;
        let mut outcomes = Vec::new();
        for target in item.targets() {
            let outcome = self.apply_bulk_fix(&target).await;
            outcomes.push((target.key, outcome));
        }
        outcomes
    }

    /// Trips whose shift does not exist
    pub async fn check_orphaned_trips(&self) -> DiagnosticItem {
        let orphans = {
            let trips = self.db.trips().read().await;
            let shifts = self.db.shifts().read().await;
            let trips: Vec<Trip> = trips.iter().cloned().collect();
            let shifts: Vec<Shift> = shifts.iter().cloned().collect();
            checks::find_orphaned_trips(&trips, &shifts)
        };
        let count = orphans.len();
        DiagnosticItem {
            name: "Orphaned Trips".to_string(),
            count,
            severity: if count > 0 { Severity::Error } else { Severity::Info },
            description: format!("{} trip(s) have no matching shift", count),
            item_type: EntityType::Trip,
            fixable: count > 0,
            bulk_fixable: count > 0,
            findings: Findings::OrphanedTrips(orphans),
        }
    }

    pub async fn check_shifts_without_duration(&self) -> DiagnosticItem {
        let shifts: Vec<Shift> = self.db.shifts().list().await;
        let found = checks::find_shifts_without_duration(&shifts);
        let count = found.len();
        DiagnosticItem {
            name: "Shifts Without Duration".to_string(),
            count,
            severity: if count > 0 { Severity::Warning } else { Severity::Info },
            description: format!("{} shift(s) have start and finish but no time", count),
            item_type: EntityType::Shift,
            fixable: count > 0,
            bulk_fixable: count > 0,
            findings: Findings::ShiftsWithoutDuration(found),
        }
    }

    pub async fn check_trips_without_duration(&self) -> DiagnosticItem {
        let trips: Vec<Trip> = self.db.trips().list().await;
        let found = checks::find_trips_without_duration(&trips);
        let count = found.len();
        DiagnosticItem {
            name: "Trips Without Duration".to_string(),
            count,
            severity: if count > 0 { Severity::Warning } else { Severity::Info },
            description: format!("{} trip(s) have pickup and dropoff but no duration", count),
            item_type: EntityType::Trip,
            fixable: count > 0,
            bulk_fixable: count > 0,
            findings: Findings::TripsWithoutDuration(found),
        }
    }

    pub async fn check_empty_shifts(&self) -> DiagnosticItem {
        let shifts: Vec<Shift> = self.db.shifts().list().await;
        let found = checks::find_empty_shifts(&shifts);
        let count = found.len();
        DiagnosticItem {
            name: "Empty Shifts".to_string(),
            count,
            severity: if count > 0 { Severity::Warning } else { Severity::Info },
            description: format!("{} shift(s) have no times and no trips", count),
            item_type: EntityType::Shift,
            fixable: false,
            bulk_fixable: false,
            findings: Findings::EmptyShifts(found),
        }
    }

    /// Every duplicate scan followed by the other checks
    pub async fn run_all(&self) -> Vec<DiagnosticItem> {
        let mut items = Vec::new();
        for entity in EntityType::ALL {
            items.push(self.scan_for_duplicates(entity).await);
        }
        items.push(self.check_orphaned_trips().await);
        items.push(self.check_shifts_without_duration().await);
        items.push(self.check_trips_without_duration().await);
        items.push(self.check_empty_shifts().await);
        tracing::debug!(
            "Diagnostics run: {} issue(s)",
            items.iter().filter(|i| i.count > 0).count()
        );
        items
    }

    /// Fill in missing shift and trip durations from their clock times.
    /// Returns the number of records changed.
    pub async fn fix_missing_durations(&self) -> std::result::Result<usize, StoreError> {
        let mut trip_data = self.db.trips().write().await;
        let mut shift_data = self.db.shifts().write().await;
        self.db.ensure_available()?;
        let now = Utc::now();

        let mut trips = trip_data.clone();
        let mut shifts = shift_data.clone();
        let mut fixed = 0;

        let pending: Vec<Shift> = shift_data.iter().cloned().collect();
        for mut shift in checks::find_shifts_without_duration(&pending) {
            if let Some(time) = checks::duration_between(&shift.start, &shift.finish) {
                shift.time = time;
                update_action(&mut shift, Action::Update, now);
                shifts.replace(shift)?;
                fixed += 1;
            }
        }
        let pending: Vec<Trip> = trip_data.iter().cloned().collect();
        for mut trip in checks::find_trips_without_duration(&pending) {
            if let Some(duration) = checks::duration_between(&trip.pickup_time, &trip.dropoff_time) {
                trip.duration = duration;
                update_action(&mut trip, Action::Update, now);
                trips.replace(trip)?;
                fixed += 1;
            }
        }

        *trip_data = trips;
        *shift_data = shifts;
        tracing::info!("Filled in {} missing duration(s)", fixed);
        Ok(fixed)
    }

    /// Create a shift for every orphaned trip key. Keys still held by a
    /// shift pending delete are skipped. Returns the number of shifts created.
    pub async fn create_missing_shifts(&self) -> std::result::Result<usize, StoreError> {
        let trip_data = self.db.trips().read().await;
        let mut shift_data = self.db.shifts().write().await;
        self.db.ensure_available()?;

        let trips: Vec<Trip> = trip_data.iter().cloned().collect();
        let shifts: Vec<Shift> = shift_data.iter().cloned().collect();
        let mut created: BTreeMap<String, Shift> = BTreeMap::new();
        for trip in checks::find_orphaned_trips(&trips, &shifts) {
            let key = trip.shift_key();
            if shift_data.by_identity(&key).is_some() {
                tracing::debug!("Shift {} is pending delete; not recreated", key);
                continue;
            }
            let shift = created
                .entry(key)
                .or_insert_with(|| Shift::new(trip.date.clone(), trip.service.clone(), trip.number));
            if shift.region.is_empty() {
                shift.region = trip.region.clone();
            }
            shift.trips += 1;
        }

        let count = created.len();
        if count > 0 {
            shift_data.append(created.into_values().collect())?;
        }
        tracing::info!("Created {} missing shift(s)", count);
        Ok(count)
    }
}

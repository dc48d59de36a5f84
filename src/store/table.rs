//! # Indexed Tables
//!
//! One [`Table`] per entity type. Rows live in an ordered map keyed by local id,
//! with a unique index on the composite identity key and non-unique secondary
//! indexes on the fields each entity declares in [`Record::INDEXES`].
//!
//! All writes go through the table's single `RwLock` writer, so the
//! check-uniqueness-then-insert step cannot interleave with another writer.
//! Bulk paths (`load`, `append`, `put_many`) validate the whole batch first and
//! only then mutate, so readers never see half of a batch.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gigsync::store::LocalDatabase;
//! use gigsync::shared::entity::Trip;
//!
//! # async fn example() -> Result<(), gigsync::shared::error::StoreError> {
//! let db = LocalDatabase::in_memory();
//! let id = db.trips().add(Trip::new("2024-01-01", "Uber", 1)).await?;
//! let trip = db.trips().get(id).await;
//! let uber = db.trips().query("service", "Uber").await?;
//! # Ok(())
//! # }
//! ```

use crate::shared::action::{update_action, Action, ActionRecord};
use crate::shared::entity::Record;
use crate::shared::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared availability flag for every table of one database
#[derive(Debug, Default)]
pub struct StoreHealth {
    unavailable: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl StoreHealth {
    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    pub fn mark_unavailable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("Local store unavailable: {}", reason);
        if let Ok(mut slot) = self.reason.lock() {
            *slot = Some(reason);
        }
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn mark_available(&self) {
        if let Ok(mut slot) = self.reason.lock() {
            *slot = None;
        }
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Fail with `Unavailable` while the store is down
    pub fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            return Ok(());
        }
        let reason = self
            .reason
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .unwrap_or_else(|| "unknown".to_string());
        Err(StoreError::Unavailable(reason))
    }
}

/// Serialized form of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Record")]
pub struct TableSnapshot<T: Record> {
    pub next_id: u64,
    pub rows: Vec<T>,
}

impl<T: Record> Default for TableSnapshot<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: Vec::new(),
        }
    }
}

/// In-memory table state. Obtained through [`Table::read`] / [`Table::write`]
/// when several tables must be inspected or changed under held locks.
#[derive(Debug, Clone)]
pub struct TableData<T: Record> {
    rows: BTreeMap<u64, T>,
    identity: HashMap<String, u64>,
    indexes: HashMap<&'static str, HashMap<String, BTreeSet<u64>>>,
    next_id: u64,
}

impl<T: Record> Default for TableData<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            identity: HashMap::new(),
            indexes: T::INDEXES.iter().map(|f| (*f, HashMap::new())).collect(),
            next_id: 1,
        }
    }
}

impl<T: Record> TableData<T> {
    fn table() -> &'static str {
        T::ENTITY.table_name()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.rows.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    /// Row holding an exact identity key
    pub fn by_identity(&self, key: &str) -> Option<&T> {
        self.identity.get(key).and_then(|id| self.rows.get(id))
    }

    /// Row correlated with a remote row id
    pub fn by_row_id(&self, row_id: u64) -> Option<&T> {
        self.rows.values().find(|r| r.row_id() == Some(row_id))
    }

    pub fn query(&self, field: &str, value: &str) -> Result<Vec<T>, StoreError> {
        let index = self
            .indexes
            .get(field)
            .ok_or_else(|| StoreError::invalid_query(Self::table(), field))?;
        Ok(index
            .get(value)
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    pub fn filter(&self, field: &str, prefix: &str) -> Result<Vec<T>, StoreError> {
        let index = self
            .indexes
            .get(field)
            .ok_or_else(|| StoreError::invalid_query(Self::table(), field))?;
        let prefix = prefix.to_lowercase();
        let ids: BTreeSet<u64> = index
            .iter()
            .filter(|(value, _)| value.to_lowercase().starts_with(&prefix))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        Ok(ids.iter().filter_map(|id| self.rows.get(id)).cloned().collect())
    }

    fn index_row(&mut self, row: &T) {
        let id = row.id();
        self.identity.insert(row.identity_key(), id);
        for field in T::INDEXES {
            if let Some(value) = row.field(field) {
                self.indexes
                    .entry(field)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(id);
            }
        }
    }

    fn unindex_row(&mut self, row: &T) {
        let id = row.id();
        if self.identity.get(&row.identity_key()) == Some(&id) {
            self.identity.remove(&row.identity_key());
        }
        for field in T::INDEXES {
            if let Some(value) = row.field(field) {
                if let Some(index) = self.indexes.get_mut(field) {
                    if let Some(ids) = index.get_mut(&value) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            index.remove(&value);
                        }
                    }
                }
            }
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Insert a new row, assigning its id. Fails on identity collision.
    pub fn insert(&mut self, mut item: T) -> Result<u64, StoreError> {
        let key = item.identity_key();
        if self.identity.contains_key(&key) {
            return Err(StoreError::conflict(Self::table(), key));
        }
        let id = self.allocate_id();
        item.set_id(id);
        self.index_row(&item);
        self.rows.insert(id, item);
        Ok(id)
    }

    /// Replace an existing row. Fails if the row is missing or its new
    /// identity collides with another row.
    pub fn replace(&mut self, item: T) -> Result<(), StoreError> {
        let id = item.id();
        let previous = self.rows.get(&id).cloned().ok_or(StoreError::NotFound {
            table: Self::table(),
            id,
        })?;
        let key = item.identity_key();
        if let Some(owner) = self.identity.get(&key) {
            if *owner != id {
                return Err(StoreError::conflict(Self::table(), key));
            }
        }
        self.unindex_row(&previous);
        self.index_row(&item);
        self.rows.insert(id, item);
        Ok(())
    }

    /// Physically remove a row
    pub fn remove(&mut self, id: u64) -> Option<T> {
        let row = self.rows.remove(&id)?;
        self.unindex_row(&row);
        Some(row)
    }

    /// Check that `items` can be written without identity collisions.
    /// `keep_existing` decides whether current rows participate.
    fn validate_batch<'a>(
        &self,
        items: impl IntoIterator<Item = &'a T>,
        keep_existing: bool,
        skip_ids: &HashSet<u64>,
    ) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for item in items {
            let key = item.identity_key();
            if keep_existing {
                if let Some(owner) = self.identity.get(&key) {
                    if !skip_ids.contains(owner) {
                        return Err(StoreError::conflict(Self::table(), key));
                    }
                }
            }
            if !seen.insert(key.clone()) {
                return Err(StoreError::conflict(Self::table(), key));
            }
        }
        Ok(())
    }

    /// Atomically replace the whole table. Rows keep non-zero ids.
    pub fn load(&mut self, items: Vec<T>) -> Result<(), StoreError> {
        self.validate_batch(items.iter(), false, &HashSet::new())?;
        let mut ids = HashSet::new();
        for item in &items {
            if item.id() != 0 && !ids.insert(item.id()) {
                return Err(StoreError::conflict(Self::table(), format!("id:{}", item.id())));
            }
        }

        let max_id = ids.iter().copied().max().unwrap_or(0);
        let mut fresh = TableData::<T> {
            next_id: self.next_id.max(max_id + 1),
            ..TableData::default()
        };
        for mut item in items {
            if item.id() == 0 {
                let id = fresh.allocate_id();
                item.set_id(id);
            }
            fresh.index_row(&item);
            fresh.rows.insert(item.id(), item);
        }
        *self = fresh;
        Ok(())
    }

    /// Atomically insert a batch, preserving existing rows. Every item gets a fresh id.
    pub fn append(&mut self, items: Vec<T>) -> Result<Vec<u64>, StoreError> {
        self.validate_batch(items.iter(), true, &HashSet::new())?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(self.insert(item)?);
        }
        Ok(ids)
    }

    /// Atomically replace several existing rows
    pub fn replace_many(&mut self, items: Vec<T>) -> Result<(), StoreError> {
        let replaced: HashSet<u64> = items.iter().map(|i| i.id()).collect();
        for item in &items {
            if !self.rows.contains_key(&item.id()) {
                return Err(StoreError::NotFound {
                    table: Self::table(),
                    id: item.id(),
                });
            }
        }
        self.validate_batch(items.iter(), true, &replaced)?;
        for item in &items {
            if let Some(previous) = self.rows.get(&item.id()).cloned() {
                self.unindex_row(&previous);
            }
        }
        for item in items {
            self.index_row(&item);
            self.rows.insert(item.id(), item);
        }
        Ok(())
    }

    /// Lifecycle-aware delete: never-synced rows are removed outright,
    /// synced rows become pending deletes.
    pub fn delete_item(&mut self, id: u64, at: DateTime<Utc>) -> Option<Action> {
        let row = self.rows.get(&id)?;
        match row.action() {
            Action::Add => {
                self.remove(id);
                None
            }
            _ => {
                let mut row = row.clone();
                update_action(&mut row, Action::Delete, at);
                let action = row.action();
                self.rows.insert(id, row);
                Some(action)
            }
        }
    }

    /// Rows with a pending action
    pub fn dirty(&self) -> Vec<T> {
        self.rows.values().filter(|r| r.is_dirty()).cloned().collect()
    }

    pub fn snapshot(&self) -> TableSnapshot<T> {
        TableSnapshot {
            next_id: self.next_id,
            rows: self.rows.values().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: TableSnapshot<T>) -> Result<Self, StoreError> {
        let mut data = TableData::default();
        data.load(snapshot.rows)?;
        data.next_id = data.next_id.max(snapshot.next_id);
        Ok(data)
    }
}

/// Repository for one entity type
#[derive(Debug)]
pub struct Table<T: Record> {
    data: RwLock<TableData<T>>,
    health: Arc<StoreHealth>,
}

impl<T: Record> Table<T> {
    pub fn new(health: Arc<StoreHealth>) -> Self {
        Self::with_data(TableData::default(), health)
    }

    pub fn with_data(data: TableData<T>, health: Arc<StoreHealth>) -> Self {
        Self {
            data: RwLock::new(data),
            health,
        }
    }

    pub fn name(&self) -> &'static str {
        T::ENTITY.table_name()
    }

    /// Consistent read snapshot for multi-step inspection
    pub async fn read(&self) -> RwLockReadGuard<'_, TableData<T>> {
        self.data.read().await
    }

    /// The table's single writer
    pub async fn write(&self) -> RwLockWriteGuard<'_, TableData<T>> {
        self.data.write().await
    }

    /// Insert a record; `Conflict` if its identity key is taken
    pub async fn add(&self, item: T) -> Result<u64, StoreError> {
        self.health.ensure_available()?;
        let id = self.data.write().await.insert(item)?;
        tracing::debug!("{}: added record {}", self.name(), id);
        Ok(id)
    }

    pub async fn get(&self, id: u64) -> Option<T> {
        self.data.read().await.get(id).cloned()
    }

    /// Physically remove a record
    pub async fn delete(&self, id: u64) -> Result<Option<T>, StoreError> {
        self.health.ensure_available()?;
        Ok(self.data.write().await.remove(id))
    }

    pub async fn list(&self) -> Vec<T> {
        self.data.read().await.iter().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.data.read().await.len()
    }

    /// First record matching `predicate`, in id order
    pub async fn find<F>(&self, predicate: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.data.read().await.iter().find(|r| predicate(r)).cloned()
    }

    /// Case-insensitive prefix match on an indexed field
    pub async fn filter(&self, field: &str, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.data.read().await.filter(field, prefix)
    }

    /// Exact match on an indexed field
    pub async fn query(&self, field: &str, value: &str) -> Result<Vec<T>, StoreError> {
        self.data.read().await.query(field, value)
    }

    /// Replace the whole table in one step
    pub async fn load(&self, items: Vec<T>) -> Result<(), StoreError> {
        self.health.ensure_available()?;
        let count = items.len();
        self.data.write().await.load(items)?;
        tracing::debug!("{}: loaded {} records", self.name(), count);
        Ok(())
    }

    /// Insert a batch in one step, keeping existing rows
    pub async fn append(&self, items: Vec<T>) -> Result<Vec<u64>, StoreError> {
        self.health.ensure_available()?;
        self.data.write().await.append(items)
    }

    /// Update an existing record
    pub async fn put(&self, item: T) -> Result<(), StoreError> {
        self.health.ensure_available()?;
        self.data.write().await.replace(item)
    }

    /// Update several records in one step
    pub async fn put_many(&self, items: Vec<T>) -> Result<(), StoreError> {
        self.health.ensure_available()?;
        self.data.write().await.replace_many(items)
    }

    /// Apply a user edit and flag the record dirty
    pub async fn edit<F>(&self, id: u64, edit: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T),
    {
        self.edit_at(id, Utc::now(), edit).await
    }

    /// [`Table::edit`] stamped with `at`. Rows pending delete are refused
    /// and left untouched.
    pub async fn edit_at<F>(&self, id: u64, at: DateTime<Utc>, edit: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T),
    {
        self.health.ensure_available()?;
        let mut data = self.data.write().await;
        let mut row = data.get(id).cloned().ok_or(StoreError::NotFound {
            table: self.name(),
            id,
        })?;
        if row.action() == Action::Delete {
            return Err(StoreError::PendingDelete {
                table: self.name(),
                id,
            });
        }
        edit(&mut row);
        update_action(&mut row, Action::Update, at);
        data.replace(row.clone())?;
        Ok(row)
    }

    /// User-facing delete; see [`TableData::delete_item`]
    pub async fn delete_item(&self, id: u64) -> Result<Option<Action>, StoreError> {
        self.delete_item_at(id, Utc::now()).await
    }

    pub async fn delete_item_at(
        &self,
        id: u64,
        at: DateTime<Utc>,
    ) -> Result<Option<Action>, StoreError> {
        self.health.ensure_available()?;
        Ok(self.data.write().await.delete_item(id, at))
    }

    /// Records with a pending action
    pub async fn dirty(&self) -> Vec<T> {
        self.data.read().await.dirty()
    }
}

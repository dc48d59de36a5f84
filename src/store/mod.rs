//! # Local Store Module
//!
//! Offline-first storage for every entity table plus sync metadata.
//!
//! ## Architecture
//!
//! The store keeps all tables in memory and persists them as one JSON snapshot:
//! - **Tables**: one indexed [`Table`] per entity type (see `table.rs`)
//! - **Sync Metadata**: cursor, last sync time and client id (see `sync.rs`)
//! - **Schema**: snapshot version gate (see `schema.rs`)
//!
//! Snapshots are written to a temp file next to the target and renamed into
//! place, so a crash mid-write never leaves a torn file. A failed write marks
//! the store unavailable until [`LocalDatabase::restore`] succeeds.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gigsync::store::LocalDatabase;
//! use gigsync::shared::entity::Place;
//!
//! # async fn example() -> Result<(), gigsync::shared::error::StoreError> {
//! let db = LocalDatabase::open("/tmp/gigsync/store.json").await?;
//! db.places().add(Place::new("Starbucks")).await?;
//! db.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod schema;
pub mod sync;
pub mod table;

pub use table::{StoreHealth, Table, TableData, TableSnapshot};

use crate::shared::entity::{
    Address, EntityType, Name, Place, Region, Service, Shift, Tagged, Trip,
};
use crate::shared::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result type for local store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk snapshot of the whole store
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    schema_version: u32,
    client_id: Uuid,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    trips: TableSnapshot<Trip>,
    #[serde(default)]
    shifts: TableSnapshot<Shift>,
    #[serde(default)]
    addresses: TableSnapshot<Address>,
    #[serde(default)]
    places: TableSnapshot<Place>,
    #[serde(default)]
    names: TableSnapshot<Name>,
    #[serde(default)]
    services: TableSnapshot<Service>,
    #[serde(default)]
    regions: TableSnapshot<Region>,
}

/// Local store: the seven entity tables and sync metadata
#[derive(Debug)]
pub struct LocalDatabase {
    trips: Table<Trip>,
    shifts: Table<Shift>,
    addresses: Table<Address>,
    places: Table<Place>,
    names: Table<Name>,
    services: Table<Service>,
    regions: Table<Region>,
    metadata: RwLock<BTreeMap<String, String>>,
    client_id: Uuid,
    path: Option<PathBuf>,
    health: Arc<StoreHealth>,
}

/// Typed access to the table holding an entity
pub trait StoredEntity: Tagged {
    fn table(db: &LocalDatabase) -> &Table<Self>;
}

macro_rules! stored_entity {
    ($($ty:ident => $field:ident),* $(,)?) => {
        $(
            impl StoredEntity for $ty {
                fn table(db: &LocalDatabase) -> &Table<Self> {
                    &db.$field
                }
            }

            impl LocalDatabase {
                pub fn $field(&self) -> &Table<$ty> {
                    &self.$field
                }
            }
        )*
    };
}

stored_entity!(
    Trip => trips,
    Shift => shifts,
    Address => addresses,
    Place => places,
    Name => names,
    Service => services,
    Region => regions,
);

impl LocalDatabase {
    /// Store without a backing file; `flush` is a no-op
    pub fn in_memory() -> Self {
        Self::empty(None)
    }

    fn empty(path: Option<PathBuf>) -> Self {
        let health = Arc::new(StoreHealth::default());
        Self {
            trips: Table::new(health.clone()),
            shifts: Table::new(health.clone()),
            addresses: Table::new(health.clone()),
            places: Table::new(health.clone()),
            names: Table::new(health.clone()),
            services: Table::new(health.clone()),
            regions: Table::new(health.clone()),
            metadata: RwLock::new(BTreeMap::new()),
            client_id: Uuid::new_v4(),
            path,
            health,
        }
    }

    fn from_parts(
        path: Option<PathBuf>,
        client_id: Uuid,
        metadata: BTreeMap<String, String>,
        tables: Tables,
    ) -> Result<Self> {
        let health = Arc::new(StoreHealth::default());
        Ok(Self {
            trips: Table::with_data(TableData::from_snapshot(tables.trips)?, health.clone()),
            shifts: Table::with_data(TableData::from_snapshot(tables.shifts)?, health.clone()),
            addresses: Table::with_data(
                TableData::from_snapshot(tables.addresses)?,
                health.clone(),
            ),
            places: Table::with_data(TableData::from_snapshot(tables.places)?, health.clone()),
            names: Table::with_data(TableData::from_snapshot(tables.names)?, health.clone()),
            services: Table::with_data(
                TableData::from_snapshot(tables.services)?,
                health.clone(),
            ),
            regions: Table::with_data(TableData::from_snapshot(tables.regions)?, health.clone()),
            metadata: RwLock::new(metadata),
            client_id,
            path,
            health,
        })
    }

    /// Open or create a snapshot-backed store
    ///
    /// Creates the parent directory if needed. A missing file yields an empty
    /// store; a file written by a newer schema is refused.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if !tokio::fs::try_exists(&path).await? {
            tracing::info!("Creating new local store at {}", path.display());
            return Ok(Self::empty(Some(path)));
        }

        let bytes = tokio::fs::read(&path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        schema::check_version(snapshot.schema_version)?;
        if schema::needs_migration(snapshot.schema_version) {
            tracing::info!(
                "Upgrading snapshot schema {} -> {} (pending: {:?})",
                snapshot.schema_version,
                schema::CURRENT_SCHEMA_VERSION,
                schema::get_pending_migrations(snapshot.schema_version)
            );
        }

        let db = Self::from_parts(
            Some(path.clone()),
            snapshot.client_id,
            snapshot.metadata,
            Tables {
                trips: snapshot.trips,
                shifts: snapshot.shifts,
                addresses: snapshot.addresses,
                places: snapshot.places,
                names: snapshot.names,
                services: snapshot.services,
                regions: snapshot.regions,
            },
        )?;
        tracing::info!("Opened local store at {}", path.display());
        Ok(db)
    }

    /// Snapshot file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Identifier sent with every push
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Typed table access
    pub fn table<T: StoredEntity>(&self) -> &Table<T> {
        T::table(self)
    }

    pub fn health(&self) -> &Arc<StoreHealth> {
        &self.health
    }

    pub fn is_available(&self) -> bool {
        self.health.is_available()
    }

    /// Fail with `Unavailable` while the store is down
    pub fn ensure_available(&self) -> Result<()> {
        self.health.ensure_available()
    }

    /// Take the store offline, e.g. after an external storage failure
    pub fn mark_unavailable(&self, reason: impl Into<String>) {
        self.health.mark_unavailable(reason);
    }

    /// Persist the snapshot
    pub async fn flush(&self) -> Result<()> {
        self.ensure_available()?;
        self.persist().await
    }

    /// Retry persistence and bring the store back online on success
    pub async fn restore(&self) -> Result<()> {
        self.persist().await?;
        self.health.mark_available();
        tracing::info!("Local store restored");
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = self.snapshot().await;
        let result = async {
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            let mut tmp = path.clone().into_os_string();
            tmp.push(".tmp");
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await?;
            Ok::<usize, StoreError>(bytes.len())
        }
        .await;

        match result {
            Ok(len) => {
                tracing::debug!("Persisted {} bytes to {}", len, path.display());
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.health.mark_unavailable(reason.clone());
                Err(StoreError::Unavailable(reason))
            }
        }
    }

    async fn snapshot(&self) -> Snapshot {
        // tables are read in lock order
        let trips = self.trips.read().await.snapshot();
        let shifts = self.shifts.read().await.snapshot();
        let addresses = self.addresses.read().await.snapshot();
        let places = self.places.read().await.snapshot();
        let names = self.names.read().await.snapshot();
        let services = self.services.read().await.snapshot();
        let regions = self.regions.read().await.snapshot();
        Snapshot {
            schema_version: schema::CURRENT_SCHEMA_VERSION,
            client_id: self.client_id,
            metadata: self.metadata.read().await.clone(),
            trips,
            shifts,
            addresses,
            places,
            names,
            services,
            regions,
        }
    }

    /// Row count of one table
    pub async fn count(&self, entity: EntityType) -> usize {
        match entity {
            EntityType::Trip => self.trips.count().await,
            EntityType::Shift => self.shifts.count().await,
            EntityType::Address => self.addresses.count().await,
            EntityType::Place => self.places.count().await,
            EntityType::Name => self.names.count().await,
            EntityType::Service => self.services.count().await,
            EntityType::Region => self.regions.count().await,
        }
    }

    /// Records with a pending action in one table
    pub async fn dirty_count(&self, entity: EntityType) -> usize {
        match entity {
            EntityType::Trip => self.trips.read().await.dirty().len(),
            EntityType::Shift => self.shifts.read().await.dirty().len(),
            EntityType::Address => self.addresses.read().await.dirty().len(),
            EntityType::Place => self.places.read().await.dirty().len(),
            EntityType::Name => self.names.read().await.dirty().len(),
            EntityType::Service => self.services.read().await.dirty().len(),
            EntityType::Region => self.regions.read().await.dirty().len(),
        }
    }

    /// Records with a pending action across all tables
    pub async fn total_dirty(&self) -> usize {
        let mut total = 0;
        for entity in EntityType::ALL {
            total += self.dirty_count(entity).await;
        }
        total
    }

    /// Get store statistics
    ///
    /// Returns per-table row and pending-change counts for debugging and the CLI.
    pub async fn stats(&self) -> DatabaseStats {
        let mut tables = Vec::with_capacity(EntityType::ALL.len());
        for entity in EntityType::ALL {
            tables.push(TableStats {
                entity,
                rows: self.count(entity).await,
                dirty: self.dirty_count(entity).await,
            });
        }
        DatabaseStats {
            tables,
            last_sync_time: self.get_last_sync_time().await,
            available: self.is_available(),
        }
    }
}

/// Table payloads used when assembling a store
struct Tables {
    trips: TableSnapshot<Trip>,
    shifts: TableSnapshot<Shift>,
    addresses: TableSnapshot<Address>,
    places: TableSnapshot<Place>,
    names: TableSnapshot<Name>,
    services: TableSnapshot<Service>,
    regions: TableSnapshot<Region>,
}

/// Per-table statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub entity: EntityType,
    pub rows: usize,
    /// Records waiting to be pushed
    pub dirty: usize,
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub tables: Vec<TableStats>,
    pub last_sync_time: Option<chrono::DateTime<chrono::Utc>>,
    pub available: bool,
}

impl DatabaseStats {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn total_dirty(&self) -> usize {
        self.tables.iter().map(|t| t.dirty).sum()
    }
}

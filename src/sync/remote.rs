//! # Remote Collaborator
//!
//! The authoritative store the orchestrator reconciles with. Transport and
//! authentication live behind [`RemoteClient`]; [`crate::sync::http::HttpRemote`]
//! is the JSON-over-HTTP implementation.
//!
//! Per-record outcomes travel as data: a push never fails because one record
//! was refused. Only transport-level problems surface as [`SyncError`].

use crate::shared::action::Action;
use crate::shared::entity::{EntityRecord, EntityType};
use crate::shared::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dirty records of one entity type, partitioned by pending action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushBatch {
    pub client_id: Uuid,
    pub entity: Option<EntityType>,
    #[serde(default)]
    pub add: Vec<EntityRecord>,
    #[serde(default)]
    pub update: Vec<EntityRecord>,
    #[serde(default)]
    pub delete: Vec<EntityRecord>,
}

impl PushBatch {
    pub fn new(client_id: Uuid, entity: EntityType) -> Self {
        Self {
            client_id,
            entity: Some(entity),
            ..Self::default()
        }
    }

    /// File a record under its pending action; clean records are ignored
    pub fn push(&mut self, record: EntityRecord) {
        match record.action() {
            Action::Add => self.add.push(record),
            Action::Update => self.update.push(record),
            Action::Delete => self.delete.push(record),
            Action::None => {}
        }
    }

    pub fn len(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.add.iter().chain(self.update.iter()).chain(self.delete.iter())
    }
}

/// Remote-assigned fields applied to an accepted record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFields {
    #[serde(default)]
    pub row_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accepted {
    pub local_id: u64,
    #[serde(default)]
    pub canonical: CanonicalFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejected {
    pub local_id: u64,
    pub reason: String,
}

/// Per-record outcome of a push
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    #[serde(default)]
    pub accepted: Vec<Accepted>,
    #[serde(default)]
    pub rejected: Vec<Rejected>,
}

impl PushResult {
    /// Accept everything in `batch` without canonical fields
    pub fn accept_all(batch: &PushBatch) -> Self {
        Self {
            accepted: batch
                .iter()
                .map(|r| Accepted {
                    local_id: r.id(),
                    canonical: CanonicalFields::default(),
                })
                .collect(),
            rejected: Vec::new(),
        }
    }
}

/// One remote row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub row_id: u64,
    /// Tombstone: the row was deleted upstream
    #[serde(default)]
    pub deleted: bool,
    pub record: EntityRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResult {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    /// Cursor for the next incremental pull
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Authoritative remote store
#[async_trait]
pub trait RemoteClient: Send + Sync + std::fmt::Debug {
    /// Submit one entity type's dirty records
    async fn push(&self, batch: PushBatch) -> Result<PushResult, SyncError>;

    /// Records changed since `cursor`; `None` pulls everything
    async fn pull(&self, cursor: Option<String>) -> Result<PullResult, SyncError>;
}

/// Stand-in used when no remote is configured; every call fails as transport
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteClient for OfflineRemote {
    async fn push(&self, _batch: PushBatch) -> Result<PushResult, SyncError> {
        Err(SyncError::transport("no remote configured"))
    }

    async fn pull(&self, _cursor: Option<String>) -> Result<PullResult, SyncError> {
        Err(SyncError::transport("no remote configured"))
    }
}

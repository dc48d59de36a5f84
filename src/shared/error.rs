//! Shared Error Types
//!
//! Error taxonomy for the store, the sync orchestrator and the diagnostics engine.
//!
//! # Error Categories
//!
//! - `StoreError` - Local store failures (conflicts, bad queries, persistence)
//! - `SyncError` - Whole-cycle sync failures (transport, timeout, store)
//! - `DiagnosticsError` - A bulk fix that was aborted for one duplicate group
//!
//! Per-record push rejections are not errors: they travel as data in
//! [`crate::sync::remote::PushResult`] so sibling records are never affected.
//!
//! # Usage
//!
//! ```rust
//! use gigsync::shared::error::StoreError;
//!
//! let error = StoreError::conflict("trips", "2024-01-01|Uber|1");
//! assert!(!error.is_fatal());
//! ```
use std::time::Duration;
use thiserror::Error;

/// Local store failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Composite identity key already taken in the table
    #[error("Conflict in table '{table}': key '{key}' already exists")]
    Conflict {
        /// Table name
        table: &'static str,
        /// The colliding identity key
        key: String,
    },

    /// Query against a field the table does not index
    #[error("Invalid query on table '{table}': field '{field}' is not indexed")]
    InvalidQuery {
        /// Table name
        table: &'static str,
        /// Requested field
        field: String,
    },

    /// Update of a row that does not exist
    #[error("Record {id} not found in table '{table}'")]
    NotFound {
        /// Table name
        table: &'static str,
        /// Local id
        id: u64,
    },

    /// Edit of a row whose delete has not been pushed yet
    #[error("Record {id} in table '{table}' is pending delete")]
    PendingDelete {
        /// Table name
        table: &'static str,
        /// Local id
        id: u64,
    },

    /// The store cannot be read or written; fatal for the engine
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Snapshot encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot was written by an incompatible schema
    #[error("Schema version {found} is newer than supported version {supported}")]
    SchemaMismatch {
        /// Version found on disk
        found: u32,
        /// Version this build understands
        supported: u32,
    },
}

impl StoreError {
    /// Create a new conflict error
    pub fn conflict(table: &'static str, key: impl Into<String>) -> Self {
        Self::Conflict {
            table,
            key: key.into(),
        }
    }

    /// Create a new invalid query error
    pub fn invalid_query(table: &'static str, field: impl Into<String>) -> Self {
        Self::InvalidQuery {
            table,
            field: field.into(),
        }
    }

    /// Create a new unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Only an unavailable store is fatal to the whole engine
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(format!("IO error: {}", err))
    }
}

/// Whole-cycle sync failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Remote unreachable or answered with a transport-level failure
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Remote call exceeded the configured timeout
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// Local store failure during the cycle
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A cycle is already running
    #[error("A sync cycle is already in progress")]
    AlreadySyncing,

    /// Full reload refused because local edits would be lost
    #[error("{0} unsaved changes must be synced before reloading")]
    UnsavedChanges(usize),
}

impl SyncError {
    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Transport failures and timeouts trigger backoff rather than surfacing as fatal
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Whether the engine must stop syncing until the store is restored
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_fatal())
    }
}

/// A bulk fix was aborted; the store is unchanged for that group
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiagnosticsError {
    /// Group has fewer than two live members
    #[error("Duplicate group '{0}' has nothing to merge")]
    EmptyGroup(String),

    /// Members changed since the scan (deleted, edited to another key)
    #[error("Duplicate group '{key}' is stale: {reason}")]
    StaleGroup {
        /// Normalized group key
        key: String,
        /// What no longer matches
        reason: String,
    },

    /// Requested canonical record is not part of the group
    #[error("Record {0} is not a member of the duplicate group")]
    UnknownCanonical(u64),

    /// Members disagree on payload; a canonical record must be picked explicitly
    #[error("Duplicate group '{0}' has diverging records and needs a manual merge")]
    NotBulkFixable(String),

    /// Store rejected the change set
    #[error("Bulk fix failed: {0}")]
    Store(#[from] StoreError),
}

impl DiagnosticsError {
    /// Create a new stale group error
    pub fn stale(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StaleGroup {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

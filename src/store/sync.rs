//! # Sync Metadata Operations
//!
//! Key/value metadata the orchestrator keeps next to the tables: the pull
//! cursor and the time of the last successful cycle. Persisted with the
//! snapshot.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gigsync::store::LocalDatabase;
//!
//! # async fn example() {
//! let db = LocalDatabase::in_memory();
//! db.set_cursor("c-17").await;
//! assert_eq!(db.get_cursor().await.as_deref(), Some("c-17"));
//! # }
//! ```

use crate::store::LocalDatabase;
use chrono::{DateTime, Utc};

/// Metadata key of the pull cursor
pub const CURSOR_KEY: &str = "cursor";
/// Metadata key of the last successful sync
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

impl LocalDatabase {
    /// Set sync metadata
    pub async fn set_sync_metadata(&self, key: &str, value: &str) {
        self.metadata
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    /// Get sync metadata
    pub async fn get_sync_metadata(&self, key: &str) -> Option<String> {
        self.metadata.read().await.get(key).cloned()
    }

    /// Remove sync metadata
    pub async fn clear_sync_metadata(&self, key: &str) {
        self.metadata.write().await.remove(key);
    }

    /// Get last sync timestamp
    pub async fn get_last_sync_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_sync_metadata(LAST_SYNC_TIME_KEY).await?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!("Ignoring malformed last sync time '{}': {}", raw, e);
                None
            }
        }
    }

    /// Set last sync timestamp
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) {
        self.set_sync_metadata(LAST_SYNC_TIME_KEY, &at.to_rfc3339())
            .await
    }

    /// Opaque pull cursor returned by the remote
    pub async fn get_cursor(&self) -> Option<String> {
        self.get_sync_metadata(CURSOR_KEY).await
    }

    pub async fn set_cursor(&self, cursor: &str) {
        self.set_sync_metadata(CURSOR_KEY, cursor).await
    }

    /// Forget the cursor so the next pull starts from scratch
    pub async fn reset_cursor(&self) {
        self.clear_sync_metadata(CURSOR_KEY).await
    }
}

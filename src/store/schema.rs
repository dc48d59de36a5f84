//! Snapshot Schema Definitions
//!
//! Contains schema version constants and the version gate applied when a
//! snapshot file is opened.

use crate::shared::error::StoreError;

/// Current snapshot schema version
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Schema migration versions
pub const MIGRATION_VERSIONS: &[u32] = &[1];

/// Check if a snapshot needs migration
pub fn needs_migration(current_version: u32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: u32) -> Vec<u32> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .cloned()
        .collect()
}

/// Refuse snapshots written by a newer build
pub fn check_version(found: u32) -> Result<(), StoreError> {
    if found > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(())
}

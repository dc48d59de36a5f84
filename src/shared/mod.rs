//! Shared Module
//!
//! Types used by every layer: the domain entities, the record action state
//! machine, error types and configuration.

/// Record action tracking
pub mod action;

/// Domain entities
pub mod entity;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

pub use action::{clear_action, update_action, Action, ActionRecord};
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use entity::{
    Address, EntityRecord, EntityType, Name, Place, Record, Region, Service, Shift, Tagged, Trip,
};
pub use error::{DiagnosticsError, StoreError, SyncError};

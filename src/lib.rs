//! gigsync - Main Library
//!
//! Local-first storage for gig-work trips and shifts, synchronized with an
//! authoritative remote store, with continuous data-quality diagnostics.
//!
//! # Overview
//!
//! - Offline record keeping with per-record action tracking
//! - Periodic push/pull reconciliation with partial-failure handling
//! - Duplicate detection and atomic bulk fixes
//!
//! # Module Structure
//!
//! - **`shared`** - Entities, the action state machine, errors and configuration
//! - **`store`** - Indexed in-memory tables persisted as a JSON snapshot
//! - **`sync`** - Sync orchestrator, scheduling, remote collaborator and status publisher
//! - **`diagnostics`** - Duplicate scans, data-quality checks and fixes
//! - **`context`** - Process-wide wiring of the above
//!
//! # Usage
//!
//! ```rust,no_run
//! use gigsync::context::AppContext;
//! use gigsync::shared::config::AppConfig;
//! use gigsync::shared::entity::{EntityType, Trip};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = AppContext::init(AppConfig::default()).await?;
//! context.db.trips().add(Trip::new("2024-01-01", "Uber", 1)).await?;
//!
//! context.sync.start_polling();
//! let report = context.diagnostics.scan_for_duplicates(EntityType::Trip).await;
//! println!("{}: {}", report.name, report.description);
//!
//! context.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Every table sits behind its own `tokio::sync::RwLock`. Operations spanning
//! several tables take the writers in one fixed order: trips, shifts,
//! addresses, places, names, services, regions.
//!
//! # Error Handling
//!
//! Each layer has its own `thiserror` enum in `shared::error`. Only an
//! unavailable store is fatal; everything else is reported per record,
//! per group or per cycle.

/// Shared types and data structures
pub mod shared;

/// Local store
pub mod store;

/// Sync orchestrator
pub mod sync;

/// Data-quality diagnostics
pub mod diagnostics;

/// Process context
pub mod context;

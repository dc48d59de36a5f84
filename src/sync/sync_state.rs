//! # Sync State
//!
//! Snapshot of the orchestrator as seen by the UI: status, operation,
//! progress, and the countdown to the next scheduled cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// What kind of cycle is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOperation {
    /// User-triggered push + pull
    Save,
    /// Full reload from the remote
    Load,
    /// Scheduled push + pull
    AutoSave,
}

/// Phase of an operation, used to pick its status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Start,
    Success,
    Error,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Save => "save",
            SyncOperation::Load => "load",
            SyncOperation::AutoSave => "auto-save",
        }
    }

    /// Human-readable status line
    pub fn message(self, phase: OperationPhase) -> &'static str {
        match (self, phase) {
            (SyncOperation::Save, OperationPhase::Start) => "Saving changes to remote...",
            (SyncOperation::Save, OperationPhase::Success) => "Changes saved successfully",
            (SyncOperation::Save, OperationPhase::Error) => "Failed to save changes",
            (SyncOperation::Load, OperationPhase::Start) => "Loading data from remote...",
            (SyncOperation::Load, OperationPhase::Success) => "Data loaded successfully",
            (SyncOperation::Load, OperationPhase::Error) => "Failed to load data",
            (SyncOperation::AutoSave, OperationPhase::Start) => "Auto-saving in background...",
            (SyncOperation::AutoSave, OperationPhase::Success) => "Auto-save completed",
            (SyncOperation::AutoSave, OperationPhase::Error) => "Auto-save failed",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub operation: Option<SyncOperation>,
    pub message: String,
    /// 0-100
    pub progress: u8,
    pub items_synced: usize,
    pub total_items: usize,
    pub timestamp: DateTime<Utc>,
    /// Last rejection or failure reason
    pub error: Option<String>,
    /// Countdown to the next scheduled cycle; `None` while polling is off
    pub next_sync_in: Option<Duration>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            operation: None,
            message: String::new(),
            progress: 0,
            items_synced: 0,
            total_items: 0,
            timestamp: Utc::now(),
            error: None,
            next_sync_in: None,
        }
    }
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }

    /// Rounded percentage of `items_synced` over `total_items`
    pub fn compute_progress(items_synced: usize, total_items: usize) -> u8 {
        if total_items == 0 {
            return 0;
        }
        let pct = (items_synced.min(total_items) as f64 / total_items as f64) * 100.0;
        pct.round() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

/// One line in the status log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub text: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

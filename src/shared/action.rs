//! Action Tracking
//!
//! Every stored record carries a pending action. A record is *dirty* while
//! its action is anything but [`Action::None`]; the sync orchestrator drains
//! dirty records and clears them once the remote side accepts them.
//!
//! Allowed transitions:
//!
//! ```text
//! none -> add | update | delete
//! add  -> add            (edits never downgrade a pending add)
//! add  -> (hard remove)  (deleting a never-synced record)
//! update -> delete
//! delete -> (physical removal after sync)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending action on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Clean: matches the remote copy
    #[default]
    None,
    /// Created locally, never synced
    Add,
    /// Synced record edited locally
    Update,
    /// Synced record deleted locally
    Delete,
}

impl Action {
    /// Whether the record still needs to be pushed
    pub fn is_dirty(self) -> bool {
        self != Action::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base contract for every stored entity
pub trait ActionRecord {
    /// Local id; 0 until the store assigns one
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);

    fn action(&self) -> Action;
    fn action_time(&self) -> DateTime<Utc>;
    fn saved(&self) -> bool;

    /// Remote-assigned row, if the record was ever accepted upstream
    fn row_id(&self) -> Option<u64>;
    fn set_row_id(&mut self, row_id: Option<u64>);

    /// Raw setter; prefer [`clear_action`] and [`update_action`]
    fn set_action_state(&mut self, action: Action, at: DateTime<Utc>, saved: bool);

    fn is_dirty(&self) -> bool {
        self.action().is_dirty()
    }
}

/// Mark a record as in sync with the remote side
pub fn clear_action<R: ActionRecord + ?Sized>(record: &mut R, at: DateTime<Utc>) {
    record.set_action_state(Action::None, at, true);
}

/// Flag a record as pending `requested`.
///
/// A pending add always wins over later edits, and a pending delete is
/// terminal. Returns `false` when the requested action was not applied.
pub fn update_action<R: ActionRecord + ?Sized>(
    record: &mut R,
    requested: Action,
    at: DateTime<Utc>,
) -> bool {
    match (record.action(), requested) {
        (_, Action::None) => {
            clear_action(record, at);
            true
        }
        // the timestamp still moves so an in-flight sync sees the edit
        (Action::Add, _) => {
            record.set_action_state(Action::Add, at, false);
            false
        }
        (Action::Delete, _) => false,
        (_, requested) => {
            record.set_action_state(requested, at, false);
            true
        }
    }
}

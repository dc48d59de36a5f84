//! Scripted remote collaborator
//!
//! Accepts every pushed record unless told otherwise. Pulls return queued
//! results in order, then empty ones. Pulls can be held open to observe a
//! cycle while it is syncing, and pushes can hang to exercise timeouts.

#![allow(dead_code)]

use async_trait::async_trait;
use gigsync::shared::error::SyncError;
use gigsync::sync::{
    Accepted, CanonicalFields, PullResult, PushBatch, PushResult, Rejected, RemoteClient,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Script {
    rejections: HashMap<u64, String>,
    row_ids: HashMap<u64, u64>,
    failures: usize,
    pulls: VecDeque<PullResult>,
    pushed: Vec<PushBatch>,
    cursors: Vec<Option<String>>,
}

#[derive(Debug, Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
    hold_pulls: AtomicBool,
    hang_pushes: AtomicBool,
    entered: Notify,
    release: Notify,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Refuse the record with this local id
    pub fn reject(&self, local_id: u64, reason: &str) {
        self.script().rejections.insert(local_id, reason.to_string());
    }

    /// Answer an acceptance of `local_id` with a canonical row id
    pub fn assign_row(&self, local_id: u64, row_id: u64) {
        self.script().row_ids.insert(local_id, row_id);
    }

    /// Fail the next `n` calls with a transport error
    pub fn fail_next(&self, n: usize) {
        self.script().failures = n;
    }

    pub fn queue_pull(&self, result: PullResult) {
        self.script().pulls.push_back(result);
    }

    /// Block pulls until [`ScriptedRemote::release`]
    pub fn hold_pulls(&self) {
        self.hold_pulls.store(true, Ordering::SeqCst);
    }

    /// Never answer a push
    pub fn hang_pushes(&self) {
        self.hang_pushes.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold_pulls.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// Wait until a pull is in flight
    pub async fn pull_entered(&self) {
        self.entered.notified().await;
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<PushBatch> {
        self.script().pushed.clone()
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.script().cursors.clone()
    }

    fn take_failure(&self) -> Result<(), SyncError> {
        let mut script = self.script();
        if script.failures > 0 {
            script.failures -= 1;
            return Err(SyncError::transport("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn push(&self, batch: PushBatch) -> Result<PushResult, SyncError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_pushes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.take_failure()?;

        let mut script = self.script();
        let mut result = PushResult::default();
        for record in batch.iter() {
            let local_id = record.id();
            match script.rejections.get(&local_id) {
                Some(reason) => result.rejected.push(Rejected {
                    local_id,
                    reason: reason.clone(),
                }),
                None => result.accepted.push(Accepted {
                    local_id,
                    canonical: CanonicalFields {
                        row_id: script.row_ids.get(&local_id).copied(),
                    },
                }),
            }
        }
        script.pushed.push(batch);
        Ok(result)
    }

    async fn pull(&self, cursor: Option<String>) -> Result<PullResult, SyncError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_pulls.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.take_failure()?;

        let mut script = self.script();
        script.cursors.push(cursor);
        Ok(script.pulls.pop_front().unwrap_or_default())
    }
}

//! # Sync Scheduler
//!
//! Polling state for the orchestrator: whether polling is armed, which
//! phase the engine is in, and the bounded exponential backoff applied after
//! transport failures.
//!
//! ```text
//! Idle -> Scheduled -> Syncing -> Scheduled
//!                           \---> Backoff -> Scheduled
//! ```
//!
//! Every `start_polling` opens a new generation; a poll loop only keeps
//! running while its generation is current, so a stop followed by a start
//! never leaves two loops armed.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Polling disabled, nothing running
    #[default]
    Idle,
    /// Waiting for the next poll tick
    Scheduled,
    /// A cycle is running
    Syncing,
    /// Waiting out a transport failure
    Backoff,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Scheduled => "scheduled",
            Phase::Syncing => "syncing",
            Phase::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Bounded exponential backoff: `min(base * 2^(failures-1), max)`
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Count a failure and return the delay before the next attempt
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay_for(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn current_delay(&self) -> Duration {
        self.delay_for(self.failures)
    }
}

/// Source of wall-clock time for action timestamps
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Polling switch, phase and backoff shared by the service and its poll loop
#[derive(Debug)]
pub struct SyncScheduler {
    enabled: AtomicBool,
    generation: AtomicU64,
    phase: Mutex<Phase>,
    backoff: Mutex<Backoff>,
    interval: Duration,
    cancel: Notify,
}

impl SyncScheduler {
    pub fn new(interval: Duration, backoff: Backoff) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            phase: Mutex::new(Phase::Idle),
            backoff: Mutex::new(backoff),
            interval,
            cancel: Notify::new(),
        }
    }

    /// Arm polling. Returns the new generation, or `None` if already armed.
    pub fn start(&self) -> Option<u64> {
        if self
            .enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_phase(Phase::Scheduled);
        Some(generation)
    }

    /// Disarm polling and wake any waiting loop. Returns whether it was armed.
    pub fn stop(&self) -> bool {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();
        if *lock(&self.phase) != Phase::Syncing {
            self.set_phase(Phase::Idle);
        }
        was_enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether a loop started at `generation` should keep going
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_enabled() && self.generation.load(Ordering::SeqCst) == generation
    }

    pub async fn cancelled(&self) {
        self.cancel.notified().await
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub fn set_phase(&self, phase: Phase) {
        *lock(&self.phase) = phase;
    }

    /// Phase to settle in once a cycle ends
    pub fn settle(&self) {
        let phase = if !self.is_enabled() {
            Phase::Idle
        } else if lock(&self.backoff).failures() > 0 {
            Phase::Backoff
        } else {
            Phase::Scheduled
        };
        self.set_phase(phase);
    }

    pub fn record_failure(&self) -> Duration {
        lock(&self.backoff).record_failure()
    }

    pub fn record_success(&self) {
        lock(&self.backoff).reset();
    }

    pub fn failures(&self) -> u32 {
        lock(&self.backoff).failures()
    }

    /// Wait before the next cycle: the backoff delay while failing, else the poll interval
    pub fn next_delay(&self) -> Duration {
        let backoff = lock(&self.backoff);
        if backoff.failures() > 0 {
            backoff.current_delay()
        } else {
            self.interval
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

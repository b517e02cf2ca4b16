//! One worker and its failure policy.
//!
//! ```text
//!             start ok                dispatch
//! Stopped ─▶ Starting ──────▶ Available ──────▶ Busy
//!    ▲           │                ▲               │ ok / conversion error
//!    │  retries  │                └───────────────┤
//!    └───────────┘                ▲               │ timeout / connection lost /
//!    ▲                            │ restart ok    ▼ max tasks reached
//!    └─────────────────────── Restarting ◀────────┘
//!          restart failed
//! ```
//!
//! The worker sits behind an async mutex so exactly one task runs on it at a
//! time; the state sits behind a plain mutex so the pool can read it
//! without waiting for a running task.

use crate::config::PoolConfig;
use crate::error::OfficeError;
use crate::task::OfficeTask;
use crate::worker::Worker;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`PoolEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Stopped,
    Starting,
    Available,
    Busy,
    Restarting,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Stopped => "stopped",
            EntryState::Starting => "starting",
            EntryState::Available => "available",
            EntryState::Busy => "busy",
            EntryState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

struct Slot {
    worker: Box<dyn Worker>,
    tasks_run: u32,
}

/// Supervisor of exactly one [`Worker`].
pub struct PoolEntry {
    label: String,
    state: Mutex<EntryState>,
    slot: tokio::sync::Mutex<Slot>,
    task_execution_timeout: Duration,
    start_attempts: u32,
    start_retry_delay: Duration,
    max_tasks_per_worker: u32,
}

impl PoolEntry {
    pub fn new(worker: Box<dyn Worker>, config: &PoolConfig) -> Self {
        Self {
            label: worker.describe(),
            state: Mutex::new(EntryState::Stopped),
            slot: tokio::sync::Mutex::new(Slot {
                worker,
                tasks_run: 0,
            }),
            task_execution_timeout: config.task_execution_timeout,
            start_attempts: config.start_attempts.max(1),
            start_retry_delay: config.start_retry_delay,
            max_tasks_per_worker: config.max_tasks_per_worker,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> EntryState {
        *self.state.lock()
    }

    fn set_state(&self, next: EntryState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("{}: {} -> {}", self.label, *state, next);
            *state = next;
        }
    }

    /// Starts the worker, retrying up to the configured attempt count.
    pub async fn start(&self) -> Result<(), OfficeError> {
        let mut slot = self.slot.lock().await;
        self.set_state(EntryState::Starting);
        match self.start_with_retries(slot.worker.as_mut()).await {
            Ok(()) => {
                slot.tasks_run = 0;
                self.set_state(EntryState::Available);
                info!("{} started", self.label);
                Ok(())
            }
            Err(e) => {
                self.set_state(EntryState::Stopped);
                Err(e)
            }
        }
    }

    /// Stops the worker, waiting for a running task to finish first.
    pub async fn stop(&self) -> Result<(), OfficeError> {
        let mut slot = self.slot.lock().await;
        let result = slot.worker.stop().await;
        self.set_state(EntryState::Stopped);
        result
    }

    /// Runs `task` on the worker under the execution timeout.
    pub async fn execute(&self, task: &mut dyn OfficeTask) -> Result<(), OfficeError> {
        let mut slot = self.slot.lock().await;
        self.set_state(EntryState::Busy);

        let outcome = timeout(self.task_execution_timeout, slot.worker.execute(task)).await;
        slot.tasks_run += 1;

        match outcome {
            Err(_) => {
                let error = OfficeError::ExecutionTimeout {
                    timeout: self.task_execution_timeout,
                };
                warn!(
                    "{}: task did not complete within {}ms; killing the worker",
                    self.label,
                    self.task_execution_timeout.as_millis()
                );
                self.set_state(EntryState::Restarting);
                if let Err(e) = slot.worker.kill().await {
                    warn!("{}: {}", self.label, e);
                }
                task.abort(&error).await;
                self.restart_after(&mut slot, error).await
            }
            Ok(Err(error)) if error.requires_restart() => {
                warn!("{}: {}; restarting the worker", self.label, error);
                self.set_state(EntryState::Restarting);
                if let Err(e) = slot.worker.stop().await {
                    warn!("{}: {}", self.label, e);
                }
                self.restart_after(&mut slot, error).await
            }
            Ok(result) => {
                if self.max_tasks_per_worker > 0 && slot.tasks_run >= self.max_tasks_per_worker {
                    info!(
                        "{}: recycling the worker after {} tasks",
                        self.label, slot.tasks_run
                    );
                    self.set_state(EntryState::Restarting);
                    if let Err(e) = slot.worker.stop().await {
                        warn!("{}: {}", self.label, e);
                    }
                    if let Err(e) = self.restart(&mut slot).await {
                        error!("{}: could not be recycled: {}", self.label, e);
                    }
                } else {
                    self.set_state(EntryState::Available);
                }
                result
            }
        }
    }

    /// Kills a worker whose task was abandoned by its caller, then restarts
    /// it while `keep_running` still holds.
    ///
    /// `keep_running` is checked once the worker is ours: a pool stopped in
    /// the meantime must not get a fresh process back.
    pub async fn recover(&self, keep_running: impl Fn() -> bool + Send) -> Result<(), OfficeError> {
        let mut slot = self.slot.lock().await;
        if self.state() == EntryState::Stopped {
            debug!("{}: already stopped; nothing to recover", self.label);
            return Ok(());
        }
        warn!("{}: task was cancelled mid-flight; killing the worker", self.label);
        self.set_state(EntryState::Restarting);
        if let Err(e) = slot.worker.kill().await {
            warn!("{}: {}", self.label, e);
        }
        if !keep_running() {
            self.set_state(EntryState::Stopped);
            return Ok(());
        }
        self.restart(&mut slot).await
    }

    async fn restart_after(&self, slot: &mut Slot, cause: OfficeError) -> Result<(), OfficeError> {
        match self.restart(slot).await {
            Ok(()) => Err(cause),
            Err(restart_error) => Err(OfficeError::WorkerLost {
                worker: self.label.clone(),
                reason: format!("{cause}; restart failed: {restart_error}"),
            }),
        }
    }

    async fn restart(&self, slot: &mut Slot) -> Result<(), OfficeError> {
        slot.tasks_run = 0;
        match self.start_with_retries(slot.worker.as_mut()).await {
            Ok(()) => {
                info!("{} restarted", self.label);
                self.set_state(EntryState::Available);
                Ok(())
            }
            Err(e) => {
                error!("{} is out of service: {}", self.label, e);
                self.set_state(EntryState::Stopped);
                Err(e)
            }
        }
    }

    async fn start_with_retries(&self, worker: &mut dyn Worker) -> Result<(), OfficeError> {
        let mut attempt = 1;
        loop {
            match worker.start().await {
                Ok(()) => return Ok(()),
                Err(e @ OfficeError::Configuration(_)) => return Err(e),
                Err(e) if attempt >= self.start_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "{}: start attempt {}/{} failed: {}",
                        self.label, attempt, self.start_attempts, e
                    );
                    attempt += 1;
                    sleep(self.start_retry_delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("worker", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

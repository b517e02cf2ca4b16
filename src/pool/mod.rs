//! Pool supervisor: dispatches tasks across pool entries.
//!
//! ## Why a semaphore plus an idle list?
//!
//! Callers must wait in FIFO order for *some* free entry, up to the queue
//! timeout. A fair `tokio::sync::Semaphore` provides the waiting and the
//! ordering; a mutex-protected list of idle entry indexes says which entry a
//! permit stands for. The invariant is `available permits == idle.len()`:
//! an index is pushed back before its permit is returned, and an entry that
//! is out of service gives back neither.
//!
//! ```text
//! execute(task)
//!   ├─ acquire permit (≤ task_queue_timeout) ──▶ NoWorkerAvailable
//!   ├─ pop idle index ─▶ EntryLease
//!   ├─ entry.execute(task)
//!   └─ drop lease: Available ─▶ push index, add permit
//!                  Stopped   ─▶ retire (close the queue if none left)
//!                  Busy      ─▶ caller cancelled; kill, then restart in
//!                               background unless the pool has stopped
//! ```
//!
//! ## Startup policy
//!
//! `start()` is all-or-nothing: every entry starts in parallel and, if any
//! fails, the ones that did start are stopped again and the first error is
//! returned.

pub mod entry;

pub use entry::{EntryState, PoolEntry};

use crate::config::{LocalOfficeConfig, PoolConfig, RemoteOfficeConfig};
use crate::error::OfficeError;
use crate::office::OfficeConnector;
use crate::task::OfficeTask;
use crate::worker::{LocalWorker, RemoteWorker, Worker};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Something that runs office tasks.
#[async_trait]
pub trait OfficeManager: Send + Sync {
    /// Runs `task` on a free worker, waiting for one if needed.
    async fn execute(&self, task: &mut dyn OfficeTask) -> Result<(), OfficeError>;

    async fn start(&self) -> Result<(), OfficeError>;

    /// Stops every worker. Individual failures are logged, not returned.
    async fn stop(&self) -> Result<(), OfficeError>;

    fn is_running(&self) -> bool;

    /// Number of tasks that can run at the same time.
    fn pool_size(&self) -> usize;
}

/// Stops `manager`, logging instead of returning a failure.
pub async fn stop_quietly(manager: &dyn OfficeManager) {
    if let Err(e) = manager.stop().await {
        warn!("Could not stop the office manager: {}", e);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    New,
    Running,
    Terminated,
}

struct PoolShared {
    entries: Vec<Arc<PoolEntry>>,
    idle: Mutex<VecDeque<usize>>,
    permits: Semaphore,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn is_running(&self) -> bool {
        *self.state.lock() == PoolState::Running
    }

    /// Returns a leased entry to circulation, or takes it out.
    fn release(self: &Arc<Self>, index: usize) {
        let entry = &self.entries[index];
        match entry.state() {
            EntryState::Available => {
                if self.is_running() {
                    self.idle.lock().push_back(index);
                    self.permits.add_permits(1);
                }
            }
            EntryState::Busy | EntryState::Restarting => {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let shared = Arc::clone(self);
                        handle.spawn(async move {
                            let entry = &shared.entries[index];
                            if let Err(e) = entry.recover(|| shared.is_running()).await {
                                error!("{}: recovery failed: {}", entry.label(), e);
                            }
                            shared.release(index);
                        });
                    }
                    Err(_) => self.retire(index),
                }
            }
            EntryState::Stopped | EntryState::Starting => self.retire(index),
        }
    }

    fn retire(&self, index: usize) {
        if !self.is_running() {
            return;
        }
        warn!("{} removed from the pool", self.entries[index].label());
        let all_lost = self
            .entries
            .iter()
            .all(|e| e.state() == EntryState::Stopped);
        if all_lost {
            error!("Every office worker is out of service; rejecting queued tasks");
            self.permits.close();
        }
    }
}

/// The right to run one task on one entry; returned to the pool on drop.
struct EntryLease {
    shared: Arc<PoolShared>,
    index: usize,
}

impl EntryLease {
    fn entry(&self) -> &PoolEntry {
        &self.shared.entries[self.index]
    }
}

impl Drop for EntryLease {
    fn drop(&mut self) {
        self.shared.release(self.index);
    }
}

/// A fixed set of workers behind a fair queue.
///
/// # Example
/// ```rust,no_run
/// use officeconv::{Converter, OfficeManager, OfficePool, RemoteOfficeConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), officeconv::OfficeError> {
/// let config = RemoteOfficeConfig::builder("http://localhost:9980")
///     .pool_size(4)
///     .build()?;
/// let pool = Arc::new(OfficePool::remote(config)?);
/// pool.start().await?;
///
/// let converter = Converter::new(pool.clone());
/// converter.convert("report.docx").to("report.pdf").execute().await?;
///
/// pool.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct OfficePool {
    shared: Arc<PoolShared>,
    queue_timeout: Duration,
    lifecycle: tokio::sync::Mutex<()>,
}

impl OfficePool {
    /// A pool over `workers`, one entry each.
    pub fn new(workers: Vec<Box<dyn Worker>>, config: &PoolConfig) -> Result<Self, OfficeError> {
        if workers.is_empty() {
            return Err(OfficeError::Configuration(
                "An office pool needs at least one worker".into(),
            ));
        }
        let entries = workers
            .into_iter()
            .map(|w| Arc::new(PoolEntry::new(w, config)))
            .collect();
        Ok(Self {
            shared: Arc::new(PoolShared {
                entries,
                idle: Mutex::new(VecDeque::new()),
                permits: Semaphore::new(0),
                state: Mutex::new(PoolState::New),
            }),
            queue_timeout: config.task_queue_timeout,
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// One local office process per configured endpoint.
    pub fn local(
        config: LocalOfficeConfig,
        connector: Arc<dyn OfficeConnector>,
    ) -> Result<Self, OfficeError> {
        let config = Arc::new(config);
        let workers = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Box::new(LocalWorker::new(
                    endpoint.clone(),
                    config.clone(),
                    connector.clone(),
                )) as Box<dyn Worker>
            })
            .collect();
        Self::new(workers, &config.pool)
    }

    /// `pool_size` slots against one remote conversion service.
    pub fn remote(config: RemoteOfficeConfig) -> Result<Self, OfficeError> {
        let config = Arc::new(config);
        let workers = (0..config.pool_size)
            .map(|i| Box::new(RemoteWorker::new(i, config.clone())) as Box<dyn Worker>)
            .collect();
        Self::new(workers, &config.pool)
    }

    /// Current state of every entry, in creation order.
    pub fn entry_states(&self) -> Vec<EntryState> {
        self.shared.entries.iter().map(|e| e.state()).collect()
    }

    async fn acquire(&self) -> Result<EntryLease, OfficeError> {
        if !self.shared.is_running() {
            return Err(OfficeError::PoolNotRunning);
        }
        let started = Instant::now();
        let acquired = timeout(self.queue_timeout, self.shared.permits.acquire()).await;
        match acquired {
            Err(_) => {
                return Err(OfficeError::NoWorkerAvailable {
                    waited: self.queue_timeout,
                })
            }
            Ok(Err(_closed)) if self.shared.is_running() => {
                return Err(OfficeError::NoWorkerAvailable {
                    waited: started.elapsed(),
                })
            }
            Ok(Err(_closed)) => return Err(OfficeError::PoolNotRunning),
            Ok(Ok(permit)) => permit.forget(),
        }

        let index = self.shared.idle.lock().pop_front();
        match index {
            Some(index) => Ok(EntryLease {
                shared: self.shared.clone(),
                index,
            }),
            None => {
                // The pool stopped between the permit and the pop.
                Err(OfficeError::PoolNotRunning)
            }
        }
    }
}

#[async_trait]
impl OfficeManager for OfficePool {
    async fn execute(&self, task: &mut dyn OfficeTask) -> Result<(), OfficeError> {
        let lease = self.acquire().await?;
        debug!("Dispatching task to {}", lease.entry().label());
        let result = lease.entry().execute(task).await;
        if let Err(e) = &result {
            debug!("Task on {} failed: {}", lease.entry().label(), e);
        }
        result
    }

    async fn start(&self) -> Result<(), OfficeError> {
        let _guard = self.lifecycle.lock().await;
        match *self.shared.state.lock() {
            PoolState::Running => return Ok(()),
            PoolState::Terminated => {
                return Err(OfficeError::Configuration(
                    "A stopped office pool cannot be restarted".into(),
                ))
            }
            PoolState::New => {}
        }

        let entries = &self.shared.entries;
        let results = join_all(entries.iter().map(|e| e.start())).await;
        if results.iter().any(|r| r.is_err()) {
            let started = entries
                .iter()
                .zip(&results)
                .filter(|(_, r)| r.is_ok())
                .map(|(e, _)| e.stop());
            for stopped in join_all(started).await {
                if let Err(e) = stopped {
                    warn!("Could not stop an office worker after a failed start: {}", e);
                }
            }
            let first = results.into_iter().find_map(Result::err);
            return Err(first.unwrap_or(OfficeError::PoolNotRunning));
        }

        {
            let mut idle = self.shared.idle.lock();
            idle.clear();
            idle.extend(0..entries.len());
        }
        *self.shared.state.lock() = PoolState::Running;
        self.shared.permits.add_permits(entries.len());
        info!("Office pool started with {} workers", entries.len());
        Ok(())
    }

    async fn stop(&self) -> Result<(), OfficeError> {
        let _guard = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *self.shared.state.lock(), PoolState::Terminated);
        if previous == PoolState::Terminated {
            return Ok(());
        }
        self.shared.permits.close();

        let stops = join_all(self.shared.entries.iter().map(|e| async move {
            (e.label().to_string(), e.stop().await)
        }))
        .await;
        for (label, result) in stops {
            if let Err(e) = result {
                warn!("Could not stop {}: {}", label, e);
            }
        }
        self.shared.idle.lock().clear();
        info!("Office pool stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn pool_size(&self) -> usize {
        self.shared.entries.len()
    }
}

impl std::fmt::Debug for OfficePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficePool")
            .field("state", &*self.shared.state.lock())
            .field("entries", &self.shared.entries)
            .field("queue_timeout", &self.queue_timeout)
            .finish()
    }
}

//! Fake office engine shared by the integration tests.
//!
//! A [`FakeWorker`] behaves like a local worker whose office process is
//! simulated in memory: documents "load" instantly, "store" by writing a
//! marker into the target file, and can be told to crash or hang.

#![allow(dead_code)]

use async_trait::async_trait;
use officeconv::office::{OfficeDocument, OfficeSession};
use officeconv::{
    DocumentFamily, OfficeConnector, OfficeContext, OfficeEndpoint, OfficeError, OfficeTask,
    PoolConfig, Properties, Worker,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared knobs and counters of one or more fake workers.
#[derive(Default)]
pub struct Script {
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub kills: AtomicU32,
    pub loads: AtomicU32,
    pub stores: AtomicU32,
    /// Number of upcoming `start` calls that fail.
    pub failing_starts: AtomicU32,
    /// The next store writes half a file, then loses the connection.
    pub crash_next_store: AtomicBool,
    /// The next load never returns.
    pub hang_next_load: AtomicBool,
    /// `terminate` never returns.
    pub hang_terminate: AtomicBool,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

pub struct FakeSession {
    script: Arc<Script>,
}

impl FakeSession {
    pub fn new(script: Arc<Script>) -> Self {
        Self { script }
    }
}

/// Connects once `ready_file` exists, like an office process that has
/// finished booting.
pub struct FakeConnector {
    pub script: Arc<Script>,
    pub ready_file: PathBuf,
}

#[async_trait]
impl OfficeConnector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &OfficeEndpoint,
    ) -> Result<Box<dyn OfficeSession>, OfficeError> {
        if self.ready_file.exists() {
            Ok(Box::new(FakeSession::new(self.script.clone())))
        } else {
            Err(OfficeError::Connection {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            })
        }
    }
}

#[async_trait]
impl OfficeSession for FakeSession {
    async fn is_alive(&mut self) -> bool {
        true
    }

    async fn load(
        &mut self,
        path: &Path,
        _properties: &Properties,
    ) -> Result<Box<dyn OfficeDocument>, OfficeError> {
        if self.script.hang_next_load.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !path.exists() {
            return Err(OfficeError::conversion(format!(
                "{} does not exist",
                path.display()
            )));
        }
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDocument {
            script: self.script.clone(),
        }))
    }

    async fn terminate(&mut self) -> Result<(), OfficeError> {
        if self.script.hang_terminate.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub struct FakeDocument {
    script: Arc<Script>,
}

#[async_trait]
impl OfficeDocument for FakeDocument {
    fn family(&self) -> DocumentFamily {
        DocumentFamily::Text
    }

    async fn refresh(&mut self) -> Result<(), OfficeError> {
        Ok(())
    }

    async fn store(&mut self, path: &Path, properties: &Properties) -> Result<(), OfficeError> {
        if self.script.crash_next_store.swap(false, Ordering::SeqCst) {
            tokio::fs::write(path, b"%PDF-1.7 trunc").await.ok();
            return Err(OfficeError::Connection {
                endpoint: "fake".into(),
                reason: "connection reset by peer".into(),
            });
        }
        self.script.stores.fetch_add(1, Ordering::SeqCst);
        let filter = properties
            .get("FilterName")
            .and_then(|v| v.as_str())
            .unwrap_or("none");
        tokio::fs::write(path, format!("converted with {filter}"))
            .await
            .map_err(|e| OfficeError::conversion(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), OfficeError> {
        Ok(())
    }
}

// ── Worker ───────────────────────────────────────────────────────────────

pub struct FakeWorker {
    name: String,
    script: Arc<Script>,
    working_dir: PathBuf,
    session: Option<FakeSession>,
}

impl FakeWorker {
    pub fn new(name: &str, script: Arc<Script>, working_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            script,
            working_dir: working_dir.to_path_buf(),
            session: None,
        }
    }

    pub fn boxed(name: &str, script: Arc<Script>, working_dir: &Path) -> Box<dyn Worker> {
        Box::new(Self::new(name, script, working_dir))
    }
}

#[async_trait]
impl Worker for FakeWorker {
    async fn start(&mut self) -> Result<(), OfficeError> {
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        let failing = self.script.failing_starts.load(Ordering::SeqCst);
        if failing > 0 {
            self.script.failing_starts.store(failing - 1, Ordering::SeqCst);
            return Err(OfficeError::Connection {
                endpoint: self.name.clone(),
                reason: "process exited during startup".into(),
            });
        }
        self.session = Some(FakeSession::new(self.script.clone()));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), OfficeError> {
        self.script.stops.fetch_add(1, Ordering::SeqCst);
        self.session = None;
        Ok(())
    }

    async fn is_ready(&mut self) -> bool {
        self.session.is_some()
    }

    async fn execute(&mut self, task: &mut dyn OfficeTask) -> Result<(), OfficeError> {
        let session = self.session.as_mut().ok_or_else(|| OfficeError::Connection {
            endpoint: self.name.clone(),
            reason: "not started".into(),
        })?;
        task.execute(OfficeContext::local(&self.working_dir, session))
            .await
    }

    async fn kill(&mut self) -> Result<(), OfficeError> {
        self.script.kills.fetch_add(1, Ordering::SeqCst);
        self.session = None;
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ── Tasks ────────────────────────────────────────────────────────────────

/// Task that only sleeps, tracking how many run at once.
pub struct SleepTask {
    pub duration: Duration,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub aborted: Arc<AtomicBool>,
}

impl SleepTask {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another task sharing this one's counters.
    pub fn sibling(&self, duration: Duration) -> Self {
        Self {
            duration,
            running: self.running.clone(),
            peak: self.peak.clone(),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OfficeTask for SleepTask {
    async fn execute(&mut self, _ctx: OfficeContext<'_>) -> Result<(), OfficeError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = Running(&self.running);
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    async fn abort(&mut self, _error: &OfficeError) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

// ── Config ───────────────────────────────────────────────────────────────

pub fn pool_config(working_dir: &Path) -> PoolConfig {
    PoolConfig::builder()
        .working_dir(working_dir)
        .task_execution_timeout(Duration::from_secs(5))
        .task_queue_timeout(Duration::from_secs(5))
        .start_attempts(1)
        .start_retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

//! A supervised local `soffice` process.
//!
//! Each [`LocalWorker`] owns one endpoint (socket port or pipe) and one
//! instance profile directory under the pool's working directory. Neither
//! is shared with another worker: two office processes writing to the same
//! profile corrupt it.
//!
//! ## Start
//!
//! 1. Look for an orphaned process already listening on the endpoint (left
//!    behind by a crashed run) and kill it, or fail when
//!    `kill_existing_process` is off.
//! 2. Recreate the instance profile, copying the template profile if one is
//!    configured.
//! 3. Launch `soffice --accept=<endpoint>;urp;... --headless ...`.
//! 4. Connect through the [`OfficeConnector`], retrying every
//!    `process_retry_interval` until `process_timeout`. A process that exits
//!    in the meantime fails the start immediately, except for exit code 81:
//!    office asks to be relaunched after initialising a fresh profile.
//!
//! ## Stop
//!
//! Ask the session to terminate and wait for the process to exit, each
//! bounded by `stop_grace_period`, then kill it by PID through the platform [`ProcessHandle`]
//! (falling back to the child handle). The instance profile is deleted last.
//!
//! [`ProcessHandle`]: office_process::ProcessHandle

use super::Worker;
use crate::config::LocalOfficeConfig;
use crate::error::OfficeError;
use crate::office::{OfficeConnector, OfficeEndpoint, OfficeSession};
use crate::task::{OfficeContext, OfficeTask};
use async_trait::async_trait;
use office_process::ProcessQuery;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Exit code of an office process asking to be relaunched.
const RESTART_EXIT_CODE: i32 = 81;

/// Relaunches tolerated during a single start.
const MAX_RELAUNCHES: u32 = 2;

/// Executable name searched for when looking for orphaned processes.
const PROCESS_NAME: &str = "soffice";

enum Launch {
    Connected(Box<dyn OfficeSession>),
    Relaunch,
}

/// One local office process bound to a private endpoint and profile.
pub struct LocalWorker {
    endpoint: OfficeEndpoint,
    config: Arc<LocalOfficeConfig>,
    connector: Arc<dyn OfficeConnector>,
    instance_profile: PathBuf,
    process: Option<Child>,
    session: Option<Box<dyn OfficeSession>>,
}

impl LocalWorker {
    pub fn new(
        endpoint: OfficeEndpoint,
        config: Arc<LocalOfficeConfig>,
        connector: Arc<dyn OfficeConnector>,
    ) -> Self {
        let instance_profile = config
            .pool
            .working_dir
            .join(format!(".officeconv_{}", endpoint.id()));
        Self {
            endpoint,
            config,
            connector,
            instance_profile,
            process: None,
            session: None,
        }
    }

    pub fn endpoint(&self) -> &OfficeEndpoint {
        &self.endpoint
    }

    pub fn instance_profile(&self) -> &Path {
        &self.instance_profile
    }

    /// PID of the running office process.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// Command-line arguments passed to `soffice`.
    pub fn command_args(&self) -> Vec<String> {
        vec![
            format!("--accept={}", self.endpoint.accept_string()),
            "--headless".into(),
            "--invisible".into(),
            "--nocrashreport".into(),
            "--nodefault".into(),
            "--nofirststartwizard".into(),
            "--nolockcheck".into(),
            "--nologo".into(),
            "--norestore".into(),
            format!(
                "-env:UserInstallation={}",
                office_process::to_file_url(&self.instance_profile)
            ),
        ]
    }

    fn connection_error(&self, reason: impl std::fmt::Display) -> OfficeError {
        OfficeError::connection(self.endpoint.to_string(), reason)
    }

    async fn ensure_no_running_process(&mut self) -> Result<(), OfficeError> {
        let query = ProcessQuery::new(PROCESS_NAME, self.endpoint.accept_string());
        let handle = self.config.process_handle.clone();
        let found = tokio::task::spawn_blocking(move || handle.find_pid(&query))
            .await
            .map_err(|e| self.connection_error(e))?;

        let pid = match found {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Could not list processes before starting office: {}", e);
                return Ok(());
            }
        };

        if !self.config.kill_existing_process {
            return Err(self.connection_error(format!(
                "an office process (pid {pid}) is already listening; \
                 stop it or enable kill_existing_process"
            )));
        }
        warn!("Killing existing office process {} on {}", pid, self.endpoint);
        let handle = self.config.process_handle.clone();
        tokio::task::spawn_blocking(move || handle.kill(pid))
            .await
            .map_err(|e| self.connection_error(e))??;
        Ok(())
    }

    async fn prepare_instance_profile(&mut self) -> Result<(), OfficeError> {
        let profile = self.instance_profile.clone();
        let template = self.config.template_profile_dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if profile.exists() {
                warn!(
                    "Instance profile {} already exists; deleting it",
                    profile.display()
                );
                std::fs::remove_dir_all(&profile)?;
            }
            if let Some(template) = template {
                debug!(
                    "Copying template profile {} into {}",
                    template.display(),
                    profile.display()
                );
                copy_dir_all(&template, &profile)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| self.connection_error(e))?
        .map_err(|e| OfficeError::SpecsIo {
            path: self.instance_profile.clone(),
            source: e,
        })
    }

    async fn delete_instance_profile(&mut self) {
        match tokio::fs::remove_dir_all(&self.instance_profile).await {
            Ok(()) => debug!("Deleted instance profile {}", self.instance_profile.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not delete instance profile {}: {}",
                self.instance_profile.display(),
                e
            ),
        }
    }

    fn spawn(&self) -> Result<Child, OfficeError> {
        let executable = office_process::office_executable(&self.config.office_home);
        let child = Command::new(&executable)
            .args(self.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.connection_error(format!("could not launch {}: {e}", executable.display()))
            })?;
        info!(
            "Started office process {} on {}",
            child.id().map(|p| p.to_string()).unwrap_or_default(),
            self.endpoint
        );
        Ok(child)
    }

    async fn connect(&mut self, process: &mut Child) -> Result<Launch, OfficeError> {
        let started = Instant::now();
        let deadline = started + self.config.process_timeout;
        loop {
            if let Some(status) = process.try_wait().map_err(|e| self.connection_error(e))? {
                if status.code() == Some(RESTART_EXIT_CODE) {
                    return Ok(Launch::Relaunch);
                }
                return Err(self.connection_error(format!(
                    "office process exited with {status} before accepting connections"
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = match timeout(remaining, self.connector.connect(&self.endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(self.connection_error("connection attempt timed out")),
            };
            match attempt {
                Ok(session) => {
                    debug!(
                        "Connected to office on {} after {}ms",
                        self.endpoint,
                        started.elapsed().as_millis()
                    );
                    return Ok(Launch::Connected(session));
                }
                Err(e) if Instant::now() + self.config.process_retry_interval < deadline => {
                    debug!("Office on {} not accepting yet: {}", self.endpoint, e);
                    sleep(self.config.process_retry_interval).await;
                }
                Err(e) => {
                    return Err(self.connection_error(format!(
                        "office did not accept a connection within {}ms: {e}",
                        self.config.process_timeout.as_millis()
                    )));
                }
            }
        }
    }

    /// Kills `process` by PID, falling back to the child handle.
    async fn force_kill(&mut self, mut process: Child) -> Result<(), OfficeError> {
        if let Ok(Some(status)) = process.try_wait() {
            debug!("Office process on {} already exited with {}", self.endpoint, status);
            return Ok(());
        }
        let mut result = Ok(());
        if let Some(pid) = process.id() {
            let handle = self.config.process_handle.clone();
            let killed = tokio::task::spawn_blocking(move || handle.kill(pid))
                .await
                .map_err(|e| self.connection_error(e))
                .and_then(|r| r.map_err(OfficeError::from));
            if let Err(e) = killed {
                warn!("Could not kill office process {}: {}; retrying", pid, e);
                if let Err(e) = process.start_kill() {
                    result = Err(self.connection_error(format!("could not kill process {pid}: {e}")));
                }
            }
        }
        match process.wait().await {
            Ok(status) => info!("Office process on {} killed ({})", self.endpoint, status),
            Err(e) => warn!("Could not reap office process on {}: {}", self.endpoint, e),
        }
        result
    }
}

#[async_trait]
impl Worker for LocalWorker {
    async fn start(&mut self) -> Result<(), OfficeError> {
        if self.process.is_some() {
            return Ok(());
        }
        self.ensure_no_running_process().await?;
        self.prepare_instance_profile().await?;

        let mut relaunches = 0;
        loop {
            let mut process = match self.spawn() {
                Ok(process) => process,
                Err(e) => {
                    self.delete_instance_profile().await;
                    return Err(e);
                }
            };
            match self.connect(&mut process).await {
                Ok(Launch::Connected(session)) => {
                    self.session = Some(session);
                    self.process = Some(process);
                    return Ok(());
                }
                Ok(Launch::Relaunch) if relaunches < MAX_RELAUNCHES => {
                    relaunches += 1;
                    info!("Office on {} asked to be relaunched", self.endpoint);
                }
                Ok(Launch::Relaunch) => {
                    self.delete_instance_profile().await;
                    return Err(self.connection_error(format!(
                        "office kept exiting with code {RESTART_EXIT_CODE}"
                    )));
                }
                Err(e) => {
                    if let Err(kill_err) = self.force_kill(process).await {
                        warn!("{}", kill_err);
                    }
                    self.delete_instance_profile().await;
                    return Err(e);
                }
            }
        }
    }

    async fn stop(&mut self) -> Result<(), OfficeError> {
        if let Some(mut session) = self.session.take() {
            match timeout(self.config.stop_grace_period, session.terminate()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Office on {} did not acknowledge terminate: {}", self.endpoint, e)
                }
                Err(_) => warn!(
                    "Office on {} did not answer terminate within {}ms",
                    self.endpoint,
                    self.config.stop_grace_period.as_millis()
                ),
            }
        }

        let result = match self.process.take() {
            Some(mut process) => {
                let waited = timeout(self.config.stop_grace_period, process.wait()).await;
                match waited {
                    Ok(Ok(status)) => {
                        info!("Office process on {} exited ({})", self.endpoint, status);
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        warn!("Could not wait for office on {}: {}", self.endpoint, e);
                        self.force_kill(process).await
                    }
                    Err(_) => {
                        warn!(
                            "Office process on {} still running after {}ms; killing it",
                            self.endpoint,
                            self.config.stop_grace_period.as_millis()
                        );
                        self.force_kill(process).await
                    }
                }
            }
            None => Ok(()),
        };

        self.delete_instance_profile().await;
        result
    }

    async fn is_ready(&mut self) -> bool {
        match (self.process.as_mut(), self.session.as_mut()) {
            (Some(process), Some(session)) => {
                matches!(process.try_wait(), Ok(None)) && session.is_alive().await
            }
            _ => false,
        }
    }

    async fn execute(&mut self, task: &mut dyn OfficeTask) -> Result<(), OfficeError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| OfficeError::connection(self.endpoint.to_string(), "office is not running"))?;
        task.execute(OfficeContext::local(
            &self.config.pool.working_dir,
            session.as_mut(),
        ))
        .await
    }

    async fn kill(&mut self) -> Result<(), OfficeError> {
        // The session is wedged; dropping it must not wait on the engine.
        drop(self.session.take());
        let result = match self.process.take() {
            Some(process) => self.force_kill(process).await,
            None => Ok(()),
        };
        self.delete_instance_profile().await;
        result
    }

    fn describe(&self) -> String {
        format!("office process on {}", self.endpoint)
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

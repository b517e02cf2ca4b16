//! Configuration types for office pools.
//!
//! Everything a pool needs is resolved once, when its configuration is built,
//! and passed down explicitly: the office home is detected (or validated) by
//! [`LocalOfficeConfigBuilder::build`], the process handle for the current OS
//! is picked there too, and workers never consult environment variables or
//! global state afterwards.
//!
//! Three structs cover the two pool flavours:
//!
//! * [`PoolConfig`]: knobs shared by every pool (timeouts, start retries,
//!   recycling, working directory).
//! * [`LocalOfficeConfig`]: office home, endpoints, profiles and process
//!   supervision for pools of local `soffice` processes.
//! * [`RemoteOfficeConfig`]: URL, pool size, HTTP timeouts and TLS for pools
//!   talking to a remote conversion endpoint.
//!
//! # Design choice: builder over constructor
//! Each struct is built via a builder whose `build()` validates the values
//! and fails with [`OfficeError::Configuration`], so an invalid pool is
//! rejected before any process is launched.

use crate::error::OfficeError;
use crate::office::{OfficeEndpoint, DEFAULT_PORT};
use office_process::ProcessHandle;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ── Pool ─────────────────────────────────────────────────────────────────

/// Settings shared by local and remote pools.
///
/// # Example
/// ```rust
/// use officeconv::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::builder()
///     .task_execution_timeout(Duration::from_secs(60))
///     .task_queue_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.start_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Directory receiving temp files and instance profiles. Default: the
    /// system temp directory.
    pub working_dir: PathBuf,

    /// Hard limit for one task on one worker. Default: 120 s.
    ///
    /// On expiry the worker is treated as wedged: it is killed and restarted
    /// and the task fails with [`OfficeError::ExecutionTimeout`].
    pub task_execution_timeout: Duration,

    /// How long a caller may wait for a free worker. Default: 30 s.
    pub task_queue_timeout: Duration,

    /// Attempts to start (or restart) a worker before giving up. Default: 3.
    pub start_attempts: u32,

    /// Pause between two start attempts. Default: 1 s.
    pub start_retry_delay: Duration,

    /// Tasks a worker runs before it is recycled. `0` never recycles.
    /// Default: 0 (local pools default to 200).
    pub max_tasks_per_worker: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::temp_dir(),
            task_execution_timeout: Duration::from_secs(120),
            task_queue_timeout: Duration::from_secs(30),
            start_attempts: 3,
            start_retry_delay: Duration::from_secs(1),
            max_tasks_per_worker: 0,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder {
            config: Self::default(),
        }
    }

    fn validate(&self) -> Result<(), OfficeError> {
        if self.task_execution_timeout.is_zero() {
            return Err(invalid("task execution timeout must be greater than zero"));
        }
        if self.task_queue_timeout.is_zero() {
            return Err(invalid("task queue timeout must be greater than zero"));
        }
        if self.start_attempts == 0 {
            return Err(invalid("start attempts must be at least 1"));
        }
        office_process::validate_working_dir(&self.working_dir)?;
        Ok(())
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = dir.into();
        self
    }

    pub fn task_execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_execution_timeout = timeout;
        self
    }

    pub fn task_queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_queue_timeout = timeout;
        self
    }

    pub fn start_attempts(mut self, attempts: u32) -> Self {
        self.config.start_attempts = attempts;
        self
    }

    pub fn start_retry_delay(mut self, delay: Duration) -> Self {
        self.config.start_retry_delay = delay;
        self
    }

    pub fn max_tasks_per_worker(mut self, n: u32) -> Self {
        self.config.max_tasks_per_worker = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PoolConfig, OfficeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Local office ─────────────────────────────────────────────────────────

/// Default number of tasks a local office process runs before it is recycled.
pub const DEFAULT_MAX_TASKS_PER_PROCESS: u32 = 200;

/// Configuration of a pool of local office processes, one per endpoint.
#[derive(Clone)]
pub struct LocalOfficeConfig {
    /// Installation root (the directory holding `program/`).
    pub office_home: PathBuf,

    /// One worker per endpoint. Default: a single socket on port 2002.
    pub endpoints: Vec<OfficeEndpoint>,

    /// Profile copied into each instance profile before first start.
    pub template_profile_dir: Option<PathBuf>,

    /// How long a freshly launched process may take to accept a
    /// connection. Default: 120 s.
    pub process_timeout: Duration,

    /// Delay between two connection attempts while it starts. Default: 250 ms.
    pub process_retry_interval: Duration,

    /// How long `stop()` waits for a clean exit before force-killing.
    /// Default: 10 s.
    pub stop_grace_period: Duration,

    /// Kill a process already holding an endpoint instead of failing.
    /// Default: true.
    pub kill_existing_process: bool,

    /// Platform capability used to find and kill office processes.
    pub process_handle: Arc<dyn ProcessHandle>,

    pub pool: PoolConfig,
}

impl fmt::Debug for LocalOfficeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOfficeConfig")
            .field("office_home", &self.office_home)
            .field(
                "endpoints",
                &self.endpoints.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            )
            .field("template_profile_dir", &self.template_profile_dir)
            .field("process_timeout", &self.process_timeout)
            .field("process_retry_interval", &self.process_retry_interval)
            .field("stop_grace_period", &self.stop_grace_period)
            .field("kill_existing_process", &self.kill_existing_process)
            .field("process_handle", &self.process_handle)
            .field("pool", &self.pool)
            .finish()
    }
}

impl LocalOfficeConfig {
    pub fn builder() -> LocalOfficeConfigBuilder {
        LocalOfficeConfigBuilder {
            office_home: None,
            endpoints: Vec::new(),
            template_profile_dir: None,
            process_timeout: Duration::from_secs(120),
            process_retry_interval: Duration::from_millis(250),
            stop_grace_period: Duration::from_secs(10),
            kill_existing_process: true,
            process_handle: None,
            pool: PoolConfig {
                max_tasks_per_worker: DEFAULT_MAX_TASKS_PER_PROCESS,
                ..PoolConfig::default()
            },
        }
    }
}

/// Builder for [`LocalOfficeConfig`].
pub struct LocalOfficeConfigBuilder {
    office_home: Option<PathBuf>,
    endpoints: Vec<OfficeEndpoint>,
    template_profile_dir: Option<PathBuf>,
    process_timeout: Duration,
    process_retry_interval: Duration,
    stop_grace_period: Duration,
    kill_existing_process: bool,
    process_handle: Option<Arc<dyn ProcessHandle>>,
    pool: PoolConfig,
}

impl LocalOfficeConfigBuilder {
    /// Office installation root. Detected when unset.
    pub fn office_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.office_home = Some(home.into());
        self
    }

    /// Adds a socket endpoint on the loopback interface.
    pub fn port(mut self, port: u16) -> Self {
        self.endpoints.push(OfficeEndpoint::socket(port));
        self
    }

    /// Adds a named-pipe endpoint.
    pub fn pipe(mut self, name: impl Into<String>) -> Self {
        self.endpoints.push(OfficeEndpoint::pipe(name));
        self
    }

    /// Replaces every endpoint configured so far.
    pub fn endpoints(mut self, endpoints: Vec<OfficeEndpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn template_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_profile_dir = Some(dir.into());
        self
    }

    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn process_retry_interval(mut self, interval: Duration) -> Self {
        self.process_retry_interval = interval;
        self
    }

    pub fn stop_grace_period(mut self, period: Duration) -> Self {
        self.stop_grace_period = period;
        self
    }

    pub fn kill_existing_process(mut self, kill: bool) -> Self {
        self.kill_existing_process = kill;
        self
    }

    /// Overrides the platform process handle.
    pub fn process_handle(mut self, handle: Arc<dyn ProcessHandle>) -> Self {
        self.process_handle = Some(handle);
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Build the configuration, detecting the office home when unset.
    pub fn build(self) -> Result<LocalOfficeConfig, OfficeError> {
        self.pool.validate()?;

        let endpoints = if self.endpoints.is_empty() {
            vec![OfficeEndpoint::socket(DEFAULT_PORT)]
        } else {
            self.endpoints
        };
        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint) {
                return Err(invalid(format!(
                    "endpoint '{endpoint}' is configured more than once"
                )));
            }
        }

        if self.process_timeout.is_zero() {
            return Err(invalid("process timeout must be greater than zero"));
        }
        if self.process_retry_interval.is_zero()
            || self.process_retry_interval > self.process_timeout
        {
            return Err(invalid(
                "process retry interval must be greater than zero and at most the process timeout",
            ));
        }

        let office_home = match self.office_home {
            Some(home) => home,
            None => office_process::find_office_home()
                .ok_or(office_process::ProcessError::OfficeHomeNotFound)?,
        };
        office_process::validate_office_home(&office_home)?;

        if let Some(dir) = &self.template_profile_dir {
            office_process::validate_template_profile_dir(dir)?;
        }

        let process_handle = match self.process_handle {
            Some(handle) => handle,
            None => Arc::from(office_process::default_process_handle()?),
        };

        Ok(LocalOfficeConfig {
            office_home,
            endpoints,
            template_profile_dir: self.template_profile_dir,
            process_timeout: self.process_timeout,
            process_retry_interval: self.process_retry_interval,
            stop_grace_period: self.stop_grace_period,
            kill_existing_process: self.kill_existing_process,
            process_handle,
            pool: self.pool,
        })
    }
}

// ── Remote office ────────────────────────────────────────────────────────

/// TLS settings of a remote pool. All certificate material is PEM.
#[derive(Debug, Clone, Default)]
pub struct SslConfig {
    /// Accept any server certificate. For testing only.
    pub trust_all: bool,
    /// Extra trusted root certificates (PEM bundle).
    pub trust_store: Option<PathBuf>,
    /// Client certificate chain and private key (PEM).
    pub identity: Option<PathBuf>,
    /// Check that the certificate matches the host name. Default: true.
    pub verify_hostname: bool,
}

impl SslConfig {
    pub fn new() -> Self {
        Self {
            verify_hostname: true,
            ..Self::default()
        }
    }
}

/// Configuration of a pool of remote conversion slots.
#[derive(Debug, Clone)]
pub struct RemoteOfficeConfig {
    /// Base URL of the conversion service.
    pub url: String,
    /// Concurrent requests allowed against the service. Default: 1.
    pub pool_size: usize,
    /// Default: 60 s.
    pub connect_timeout: Duration,
    /// Bound on a single request, upload and response included. Default: 120 s.
    pub socket_timeout: Duration,
    pub ssl: Option<SslConfig>,
    pub pool: PoolConfig,
}

impl RemoteOfficeConfig {
    pub fn builder(url: impl Into<String>) -> RemoteOfficeConfigBuilder {
        RemoteOfficeConfigBuilder {
            config: RemoteOfficeConfig {
                url: url.into(),
                pool_size: 1,
                connect_timeout: Duration::from_secs(60),
                socket_timeout: Duration::from_secs(120),
                ssl: None,
                pool: PoolConfig::default(),
            },
        }
    }
}

/// Builder for [`RemoteOfficeConfig`].
#[derive(Debug)]
pub struct RemoteOfficeConfigBuilder {
    config: RemoteOfficeConfig,
}

impl RemoteOfficeConfigBuilder {
    pub fn pool_size(mut self, n: usize) -> Self {
        self.config.pool_size = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    pub fn ssl(mut self, ssl: SslConfig) -> Self {
        self.config.ssl = Some(ssl);
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RemoteOfficeConfig, OfficeError> {
        let c = &self.config;
        c.pool.validate()?;
        if c.url.trim().is_empty() {
            return Err(invalid("remote URL must not be empty"));
        }
        if !(c.url.starts_with("http://") || c.url.starts_with("https://")) {
            return Err(invalid(format!(
                "remote URL must start with http:// or https://, got '{}'",
                c.url
            )));
        }
        if c.pool_size == 0 {
            return Err(invalid("pool size must be at least 1"));
        }
        if c.connect_timeout.is_zero() || c.socket_timeout.is_zero() {
            return Err(invalid("HTTP timeouts must be greater than zero"));
        }
        Ok(self.config)
    }
}

fn invalid(message: impl Into<String>) -> OfficeError {
    OfficeError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_office_home() -> tempfile::TempDir {
        let home = tempfile::tempdir().unwrap();
        let exe = office_process::office_executable(home.path());
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, b"").unwrap();
        home
    }

    #[test]
    fn pool_defaults() {
        let c = PoolConfig::default();
        assert_eq!(c.task_execution_timeout, Duration::from_secs(120));
        assert_eq!(c.task_queue_timeout, Duration::from_secs(30));
        assert_eq!(c.max_tasks_per_worker, 0);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = PoolConfig::builder()
            .task_execution_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, OfficeError::Configuration(_)));
        let err = PoolConfig::builder()
            .task_queue_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, OfficeError::Configuration(_)));
    }

    #[test]
    fn missing_working_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = PoolConfig::builder()
            .working_dir(dir.path().join("missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, OfficeError::Configuration(_)), "got: {err:?}");
    }

    #[test]
    fn local_defaults_to_port_2002_and_recycling() {
        let home = fake_office_home();
        let c = LocalOfficeConfig::builder()
            .office_home(home.path())
            .build()
            .unwrap();
        assert_eq!(c.endpoints, vec![OfficeEndpoint::socket(2002)]);
        assert_eq!(c.pool.max_tasks_per_worker, DEFAULT_MAX_TASKS_PER_PROCESS);
        assert!(c.kill_existing_process);
    }

    #[test]
    fn duplicate_endpoints_are_rejected() {
        let home = fake_office_home();
        let err = LocalOfficeConfig::builder()
            .office_home(home.path())
            .port(2002)
            .port(2002)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn office_home_without_executable_is_rejected() {
        let home = tempfile::tempdir().unwrap();
        let err = LocalOfficeConfig::builder()
            .office_home(home.path())
            .build()
            .unwrap_err();
        assert!(matches!(err, OfficeError::Configuration(_)));
    }

    #[test]
    fn remote_validation() {
        assert!(RemoteOfficeConfig::builder("http://localhost:9980")
            .build()
            .is_ok());
        assert!(RemoteOfficeConfig::builder("localhost:9980").build().is_err());
        let err = RemoteOfficeConfig::builder("https://office.example.com")
            .pool_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pool size"));
    }

    #[test]
    fn remote_defaults() {
        let c = RemoteOfficeConfig::builder("http://localhost:9980")
            .build()
            .unwrap();
        assert_eq!(c.pool_size, 1);
        assert_eq!(c.connect_timeout, Duration::from_secs(60));
        assert_eq!(c.socket_timeout, Duration::from_secs(120));
        assert!(SslConfig::new().verify_hostname);
    }
}

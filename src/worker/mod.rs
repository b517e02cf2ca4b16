//! Units of conversion capacity.
//!
//! A [`Worker`] is owned by exactly one pool entry, which serialises every
//! call to it. Two implementations exist:
//!
//! * [`LocalWorker`]: an `soffice` process bound to a private endpoint and
//!   instance profile, supervised by the worker.
//! * [`RemoteWorker`]: a slot on a remote conversion service; nothing to
//!   supervise, `start`/`stop` only open and drop the HTTP client.

pub mod local;
pub mod remote;

pub use local::LocalWorker;
pub use remote::{normalize_url, RemoteConnection, RemoteWorker};

use crate::error::OfficeError;
use crate::task::OfficeTask;
use async_trait::async_trait;

/// Lifecycle of one unit of conversion capacity.
#[async_trait]
pub trait Worker: Send {
    /// Launches or connects. Fails with [`OfficeError::Connection`] when the
    /// engine cannot be reached.
    async fn start(&mut self) -> Result<(), OfficeError>;

    /// Shuts down cleanly, waiting a bounded time before forcing it.
    async fn stop(&mut self) -> Result<(), OfficeError>;

    /// Whether the worker can take a task right now.
    async fn is_ready(&mut self) -> bool;

    /// Runs `task` against this worker's engine.
    async fn execute(&mut self, task: &mut dyn OfficeTask) -> Result<(), OfficeError>;

    /// Tears the worker down without waiting for it (wedged engine).
    async fn kill(&mut self) -> Result<(), OfficeError> {
        self.stop().await
    }

    /// Short label for logs and errors.
    fn describe(&self) -> String;
}

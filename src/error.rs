//! Error type for the officeconv library.
//!
//! Every failure surfaces as a single [`OfficeError`]. The variants are
//! grouped by *who has to react*:
//!
//! * **Configuration**: the caller asked for something impossible (no target
//!   format, bad office home). Fails before any worker is contacted.
//! * **Worker health**: [`OfficeError::Connection`] and
//!   [`OfficeError::ExecutionTimeout`] mean the worker itself is suspect.
//!   The pool entry inspects [`OfficeError::requires_restart`] and recycles
//!   the worker before it serves another job.
//! * **Conversion**: the worker is healthy but this document could not be
//!   loaded, transformed or stored. The worker stays up.
//! * **Capacity**: [`OfficeError::NoWorkerAvailable`] and
//!   [`OfficeError::PoolNotRunning`] say nothing about the document; retrying
//!   later (or sizing the pool up) may help. See
//!   [`OfficeError::is_capacity_error`].

use crate::format::DocumentFamily;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by [`OfficeError::Conversion`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors returned by the officeconv library.
#[derive(Debug, Error)]
pub enum OfficeError {
    // ── Configuration errors ─────────────────────────────────────────────
    /// Builder validation failed, or a job was submitted without a target
    /// format.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── Worker health ────────────────────────────────────────────────────
    /// A worker could not be started, reached, or dropped its connection
    /// mid-task.
    #[error("Cannot connect to office at '{endpoint}': {reason}")]
    Connection { endpoint: String, reason: String },

    /// A task exceeded the per-task execution timeout; the worker was killed.
    #[error("Task did not complete within {}ms; the office worker was restarted", .timeout.as_millis())]
    ExecutionTimeout { timeout: Duration },

    /// A worker failed to restart after a fault and was taken out of service.
    #[error("Office worker {worker} could not be restarted and is out of service: {reason}")]
    WorkerLost { worker: String, reason: String },

    // ── Conversion errors ────────────────────────────────────────────────
    /// Load, transformation or store failed inside a healthy worker.
    #[error("Conversion failed: {message}")]
    Conversion {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The target format has no store filter for the loaded document family.
    #[error("Unsupported conversion: '{format}' cannot be produced from a {family} document")]
    UnsupportedConversion {
        format: String,
        family: DocumentFamily,
    },

    // ── Document I/O ─────────────────────────────────────────────────────
    /// Materialising a stream into a temp file, or draining a temp file into
    /// a sink, failed.
    #[error("I/O error on '{path}': {source}")]
    SpecsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Capacity errors ──────────────────────────────────────────────────
    /// Every worker stayed busy for the whole queue-wait timeout.
    #[error("No office worker became available within {}ms", .waited.as_millis())]
    NoWorkerAvailable { waited: Duration },

    /// The pool was never started, or has been stopped.
    #[error("The office pool is not running")]
    PoolNotRunning,
}

impl OfficeError {
    /// A conversion failure without an underlying cause.
    pub fn conversion(message: impl Into<String>) -> Self {
        OfficeError::Conversion {
            message: message.into(),
            source: None,
        }
    }

    /// A conversion failure wrapping `cause`.
    pub fn conversion_caused_by(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OfficeError::Conversion {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// A connection failure for `endpoint`.
    pub fn connection(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        OfficeError::Connection {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is a connection failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, OfficeError::Connection { .. })
    }

    /// Whether the worker that produced this error must be recycled before
    /// it serves another task.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            OfficeError::Connection { .. } | OfficeError::ExecutionTimeout { .. }
        )
    }

    /// Whether this error reports missing capacity rather than a failed
    /// conversion.
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            OfficeError::NoWorkerAvailable { .. } | OfficeError::PoolNotRunning
        )
    }
}

impl From<office_process::ProcessError> for OfficeError {
    fn from(e: office_process::ProcessError) -> Self {
        match e {
            office_process::ProcessError::OfficeHomeNotFound
            | office_process::ProcessError::InvalidDirectory { .. }
            | office_process::ProcessError::UnsupportedPlatform { .. } => {
                OfficeError::Configuration(e.to_string())
            }
            other => OfficeError::connection("office process", other),
        }
    }
}

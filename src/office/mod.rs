//! Boundary to the office engine's automation bridge.
//!
//! The crate never talks to the engine's native RPC protocol itself. A
//! local worker launches `soffice` listening on an [`OfficeEndpoint`] and
//! then asks an [`OfficeConnector`] to open an [`OfficeSession`] on it.
//! Everything the conversion task needs from the engine (load, refresh,
//! store, close, plus the handful of mutations the built-in filters use) goes
//! through these traits.
//!
//! ## Blocking bridges
//!
//! Implementations wrapping a blocking client must move each call onto
//! `tokio::task::spawn_blocking`. The pool entry enforces its execution
//! timeout by dropping the task future; a call that blocks the runtime thread
//! cannot be interrupted that way and the watchdog would fire late.

use crate::error::OfficeError;
use crate::format::{DocumentFamily, Properties};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Default port of the first local worker.
pub const DEFAULT_PORT: u16 = 2002;

// ── Endpoints ────────────────────────────────────────────────────────────

/// Private communication channel of one local office process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OfficeEndpoint {
    /// TCP socket on the loopback interface.
    Socket { host: String, port: u16 },
    /// Named pipe.
    Pipe { name: String },
}

impl OfficeEndpoint {
    pub fn socket(port: u16) -> Self {
        OfficeEndpoint::Socket {
            host: LOOPBACK.to_string(),
            port,
        }
    }

    pub fn pipe(name: impl Into<String>) -> Self {
        OfficeEndpoint::Pipe { name: name.into() }
    }

    /// Connection part of the URL, e.g. `socket,host=127.0.0.1,port=2002,tcpNoDelay=1`.
    pub fn connect_string(&self) -> String {
        match self {
            OfficeEndpoint::Socket { host, port } => {
                format!("socket,host={host},port={port},tcpNoDelay=1")
            }
            OfficeEndpoint::Pipe { name } => format!("pipe,name={name}"),
        }
    }

    /// Value of `soffice --accept=`; also the string used to find an
    /// orphaned process holding this endpoint.
    pub fn accept_string(&self) -> String {
        format!("{};urp;StarOffice.ComponentContext", self.connect_string())
    }

    /// Filesystem-safe identifier, used to name the instance profile directory.
    ///
    /// Distinct endpoints always get distinct ids: bytes outside `[A-Za-z0-9]`
    /// are written as `_xx` hex escapes.
    pub fn id(&self) -> String {
        match self {
            OfficeEndpoint::Socket { host, port } if host == LOOPBACK => format!("socket_{port}"),
            OfficeEndpoint::Socket { host, port } => {
                format!("socket_{}_{port}", escape_id(host))
            }
            OfficeEndpoint::Pipe { name } => format!("pipe_{}", escape_id(name)),
        }
    }
}

const LOOPBACK: &str = "127.0.0.1";

fn escape_id(raw: &str) -> String {
    let mut id = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() {
            id.push(byte as char);
        } else {
            id.push_str(&format!("_{byte:02x}"));
        }
    }
    id
}

impl fmt::Display for OfficeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connect_string())
    }
}

// ── Document mutations used by built-in filters ──────────────────────────

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMargins {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// A text frame anchored to the first page, positioned in millimetres.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFrame {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Extra character/frame properties (font, colour, ...).
    pub properties: Properties,
}

// ── Engine traits ────────────────────────────────────────────────────────

/// Opens sessions on a running office process.
#[async_trait]
pub trait OfficeConnector: Send + Sync {
    /// Connects to the process listening on `endpoint`.
    ///
    /// Must fail with [`OfficeError::Connection`] while the process is not
    /// (yet) accepting connections; the worker retries until its process
    /// timeout.
    async fn connect(&self, endpoint: &OfficeEndpoint)
        -> Result<Box<dyn OfficeSession>, OfficeError>;
}

/// A live connection to one office process.
#[async_trait]
pub trait OfficeSession: Send {
    /// Cheap liveness probe.
    async fn is_alive(&mut self) -> bool;

    /// Loads `path` into the engine's document model.
    async fn load(
        &mut self,
        path: &Path,
        properties: &Properties,
    ) -> Result<Box<dyn OfficeDocument>, OfficeError>;

    /// Asks the process to shut down.
    async fn terminate(&mut self) -> Result<(), OfficeError>;
}

/// A document loaded in an office process.
///
/// Errors returned by any method are reported as-is: a dropped connection
/// must be an [`OfficeError::Connection`] so the pool recycles the worker.
#[async_trait]
pub trait OfficeDocument: Send {
    fn family(&self) -> DocumentFamily;

    /// Recomputes derived content (fields, indexes).
    async fn refresh(&mut self) -> Result<(), OfficeError>;

    /// Writes the document to `path`.
    async fn store(&mut self, path: &Path, properties: &Properties) -> Result<(), OfficeError>;

    /// Discards the document in the engine.
    async fn close(&mut self) -> Result<(), OfficeError>;

    async fn set_page_margins(&mut self, margins: PageMargins) -> Result<(), OfficeError> {
        let _ = margins;
        Err(unsupported("page margins"))
    }

    /// Deletes every page except `page` (1-based).
    async fn select_page(&mut self, page: u32) -> Result<(), OfficeError> {
        let _ = page;
        Err(unsupported("page selection"))
    }

    async fn insert_text_frame(&mut self, frame: &TextFrame) -> Result<(), OfficeError> {
        let _ = frame;
        Err(unsupported("text frames"))
    }
}

fn unsupported(what: &str) -> OfficeError {
    OfficeError::conversion(format!("This office bridge does not support {what}"))
}

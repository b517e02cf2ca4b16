//! # officeconv
//!
//! Convert office documents (DOCX, XLSX, ODT, PPTX, …) by driving a pool of
//! office-engine workers.
//!
//! ## Why this crate?
//!
//! An office engine is a heavyweight, single-threaded, crash-prone process.
//! Converting documents reliably means keeping a fixed set of them alive,
//! queueing work fairly, killing the ones that hang and restarting the ones
//! that die, all without the caller noticing. This crate owns that lifecycle
//! and exposes a small conversion API on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! Converter / BatchConverter
//!  │  infer formats, merge load / store options
//!  ▼
//! OfficeManager (OfficePool)
//!  │  fair queue, task_queue_timeout
//!  ▼
//! PoolEntry ×N      execution timeout, restart on crash, recycle after N tasks
//!  │
//!  ├─ LocalWorker   soffice process + instance profile + session
//!  └─ RemoteWorker  HTTP multipart to a conversion service
//!  ▼
//! ConversionTask    resolve source / target ─▶ load ─▶ filters ─▶ store
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use officeconv::{Converter, OfficeManager, OfficePool, RemoteOfficeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteOfficeConfig::builder("https://office.example.com").build()?;
//!     let pool = Arc::new(OfficePool::remote(config)?);
//!     pool.start().await?;
//!
//!     let converter = Converter::new(pool.clone());
//!     converter.convert("letter.docx").to("letter.pdf").execute().await?;
//!
//!     pool.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! Local workers need an [`OfficeConnector`]: the component that speaks the
//! office engine's native protocol over the worker's socket or pipe. The
//! crate supervises the process; the connector is supplied by the embedder.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `officeconv` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! officeconv = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod format;
pub mod office;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod task;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchConverter, BatchReport, ConvertedFile, FailedFile, SkippedFile};
pub use config::{
    LocalOfficeConfig, LocalOfficeConfigBuilder, PoolConfig, PoolConfigBuilder, RemoteOfficeConfig,
    RemoteOfficeConfigBuilder, SslConfig,
};
pub use convert::{ConversionJob, Converter, ConverterBuilder};
pub use document::{SourceDocument, SourceSpec, TargetDocument, TargetSpec};
pub use error::OfficeError;
pub use format::{default_registry, DocumentFamily, DocumentFormat, FormatRegistry, Properties};
pub use office::{OfficeConnector, OfficeDocument, OfficeEndpoint, OfficeSession};
pub use pipeline::{
    Filter, FilterChain, NoopFilter, PageMarginsFilter, PageSelectorFilter, RefreshFilter,
    TextInserterFilter,
};
pub use pool::{stop_quietly, EntryState, OfficeManager, OfficePool};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use task::{ConversionTask, OfficeContext, OfficeTask};
pub use worker::{LocalWorker, RemoteWorker, Worker};

//! Units of work executed by a worker.
//!
//! A pool hands an [`OfficeTask`] to one worker, which runs it against an
//! [`OfficeContext`]: either a live session with a local office process or
//! an HTTP connection to a remote conversion service.
//!
//! [`ConversionTask`] is the task behind every conversion:
//!
//! ```text
//! resolve source ─▶ resolve target ─▶ load ─▶ filters ─▶ store ─▶ close
//!                                                                   │
//!       on_complete / on_failure (exactly one) ◀──────────────────────┘
//!       release source (always)
//! ```
//!
//! ## Abandoned tasks
//!
//! When a task overruns its execution timeout, the pool entry drops the
//! `execute` future wherever it is suspended and then calls
//! [`OfficeTask::abort`]. The task remembers which callbacks are still
//! pending, so the target and the source are finalised exactly once whether
//! the task completes or is abandoned.

use crate::document::{SourceSpec, TargetSpec};
use crate::error::OfficeError;
use crate::format::{merge_properties, DocumentFamily, DocumentFormat, Properties};
use crate::office::{OfficeDocument, OfficeSession};
use crate::pipeline::{FilterChain, FilterContext};
use crate::worker::remote::RemoteConnection;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Store property naming the office export filter.
pub const FILTER_NAME: &str = "FilterName";

/// Where a task runs.
pub struct OfficeContext<'a> {
    /// Directory for temp files created by the task.
    pub working_dir: &'a Path,
    pub engine: Engine<'a>,
}

/// The conversion engine a task talks to.
pub enum Engine<'a> {
    Local(&'a mut dyn OfficeSession),
    Remote(&'a RemoteConnection),
}

impl<'a> OfficeContext<'a> {
    pub fn local(working_dir: &'a Path, session: &'a mut dyn OfficeSession) -> Self {
        Self {
            working_dir,
            engine: Engine::Local(session),
        }
    }

    pub fn remote(working_dir: &'a Path, connection: &'a RemoteConnection) -> Self {
        Self {
            working_dir,
            engine: Engine::Remote(connection),
        }
    }
}

/// Work submitted to a pool.
#[async_trait]
pub trait OfficeTask: Send {
    async fn execute(&mut self, ctx: OfficeContext<'_>) -> Result<(), OfficeError>;

    /// Called once after the pool abandoned `execute` (execution timeout).
    async fn abort(&mut self, error: &OfficeError) {
        let _ = error;
    }
}

// ── Conversion task ──────────────────────────────────────────────────────

/// Converts one source document into one target document.
pub struct ConversionTask {
    source: Box<dyn SourceSpec>,
    target: Box<dyn TargetSpec>,
    load_properties: Properties,
    store_properties: Properties,
    filters: FilterChain,
    /// Set once the target is resolved; taken when its callback fires.
    target_file: Option<PathBuf>,
    release_pending: bool,
}

impl ConversionTask {
    pub fn new(source: Box<dyn SourceSpec>, target: Box<dyn TargetSpec>) -> Self {
        Self {
            source,
            target,
            load_properties: Properties::new(),
            store_properties: Properties::new(),
            filters: FilterChain::default(),
            target_file: None,
            release_pending: true,
        }
    }

    /// Load options applied over the source format's defaults.
    pub fn load_properties(mut self, properties: Properties) -> Self {
        self.load_properties = properties;
        self
    }

    /// Store options applied over the target format's defaults.
    pub fn store_properties(mut self, properties: Properties) -> Self {
        self.store_properties = properties;
        self
    }

    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    async fn run(
        &mut self,
        ctx: OfficeContext<'_>,
        target_format: &DocumentFormat,
    ) -> Result<(), OfficeError> {
        let source_file = self.source.resolve(ctx.working_dir).await?;
        let target_file = self.target.resolve(ctx.working_dir).await?;
        self.target_file = Some(target_file.clone());

        let source_format = self.source.format().cloned();
        let load_properties = match &source_format {
            Some(f) => merge_properties(f.load_properties(), &self.load_properties),
            None => self.load_properties.clone(),
        };

        match ctx.engine {
            Engine::Local(session) => {
                self.convert_locally(
                    session,
                    &source_file,
                    &target_file,
                    target_format,
                    &load_properties,
                )
                .await
            }
            Engine::Remote(connection) => {
                let family = source_format.as_ref().and_then(|f| f.input_family());
                let defaults = family
                    .and_then(|family| target_format.store_properties(family))
                    .cloned()
                    .unwrap_or_default();
                let store_properties = merge_properties(&defaults, &self.store_properties);
                connection
                    .convert(
                        &source_file,
                        &target_file,
                        target_format.extension(),
                        &load_properties,
                        &store_properties,
                    )
                    .await
            }
        }
    }

    async fn convert_locally(
        &mut self,
        session: &mut dyn OfficeSession,
        source_file: &Path,
        target_file: &Path,
        target_format: &DocumentFormat,
        load_properties: &Properties,
    ) -> Result<(), OfficeError> {
        let mut document = session
            .load(source_file, load_properties)
            .await
            .map_err(|e| wrap(format!("Could not load document {}", source_file.display()), e))?;
        debug!(
            "Loaded {} as a {} document",
            source_file.display(),
            document.family()
        );

        let result = self
            .transform_and_store(document.as_mut(), source_file, target_file, target_format)
            .await;

        // A dead connection cannot close anything; the worker is recycled.
        let connection_lost = matches!(&result, Err(e) if e.requires_restart());
        if !connection_lost {
            if let Err(e) = document.close().await {
                warn!("Could not close document {}: {}", source_file.display(), e);
            }
        }
        result
    }

    async fn transform_and_store(
        &mut self,
        document: &mut dyn OfficeDocument,
        source_file: &Path,
        target_file: &Path,
        target_format: &DocumentFormat,
    ) -> Result<(), OfficeError> {
        let filter_ctx = FilterContext {
            source_file,
            target_file,
            target_format,
        };
        self.filters.run(&filter_ctx, document).await?;

        let store_properties = self.store_properties_for(target_format, document.family())?;
        document
            .store(target_file, &store_properties)
            .await
            .map_err(|e| wrap(format!("Could not store document to {}", target_file.display()), e))
    }

    /// Target format defaults for `family`, then caller overrides.
    fn store_properties_for(
        &self,
        target_format: &DocumentFormat,
        family: DocumentFamily,
    ) -> Result<Properties, OfficeError> {
        let defaults = target_format
            .store_properties(family)
            .cloned()
            .unwrap_or_default();
        let merged = merge_properties(&defaults, &self.store_properties);
        if merged.contains_key(FILTER_NAME) {
            Ok(merged)
        } else {
            Err(OfficeError::UnsupportedConversion {
                format: target_format.extension().to_string(),
                family,
            })
        }
    }

    /// Delivers the pending target callback, then releases the source.
    async fn finish(&mut self, outcome: Result<(), OfficeError>) -> Result<(), OfficeError> {
        let result = match (self.target_file.take(), outcome) {
            (Some(file), Ok(())) => self.target.on_complete(&file).await,
            (Some(file), Err(e)) => {
                self.target.on_failure(&file, &e).await;
                Err(e)
            }
            (None, outcome) => outcome,
        };
        self.release_source().await;
        result
    }

    async fn release_source(&mut self) {
        if std::mem::take(&mut self.release_pending) {
            if let Err(e) = self.source.release().await {
                warn!("Could not release conversion source: {}", e);
            }
        }
    }
}

#[async_trait]
impl OfficeTask for ConversionTask {
    async fn execute(&mut self, ctx: OfficeContext<'_>) -> Result<(), OfficeError> {
        let outcome = match self.target.format().cloned() {
            Some(target_format) => self.run(ctx, &target_format).await,
            None => Err(OfficeError::Configuration(
                "Target format is not set; use a target file with a known extension or set one explicitly"
                    .into(),
            )),
        };
        self.finish(outcome).await
    }

    async fn abort(&mut self, error: &OfficeError) {
        if let Some(file) = self.target_file.take() {
            self.target.on_failure(&file, error).await;
        }
        self.release_source().await;
    }
}

/// Wraps an engine failure once; connection failures keep their kind so
/// the pool entry still recycles the worker.
fn wrap(message: String, error: OfficeError) -> OfficeError {
    if error.requires_restart() {
        error
    } else {
        OfficeError::conversion_caused_by(message, error)
    }
}

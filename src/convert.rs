//! The conversion API exposed to callers.
//!
//! ```rust,no_run
//! # use officeconv::{Converter, OfficeManager};
//! # use std::sync::Arc;
//! # async fn run(pool: Arc<dyn OfficeManager>) -> Result<(), officeconv::OfficeError> {
//! let converter = Converter::new(pool);
//! converter
//!     .convert("quarterly.xlsx")
//!     .to("quarterly.pdf")
//!     .execute()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Formats
//!
//! Source and target formats are inferred from file extensions through the
//! converter's [`FormatRegistry`]. Streams carry no extension: a stream
//! target needs [`ConversionJob::as_format`] (or
//! [`TargetDocument::with_format`]), otherwise the job fails with
//! [`OfficeError::Configuration`] before any worker is contacted.
//!
//! ## Options
//!
//! Load options are merged in three layers: the source format's defaults,
//! then the converter's defaults, then the job's own. Store options follow
//! the same order, starting from the target format's options for the loaded
//! document's family.

use crate::document::{SourceDocument, SourceSpec, TargetDocument, TargetSpec};
use crate::error::OfficeError;
use crate::format::{default_registry, merge_properties, DocumentFormat, FormatRegistry, Properties};
use crate::pipeline::FilterChain;
use crate::pool::OfficeManager;
use crate::task::{ConversionTask, OfficeTask};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds and runs conversions against an [`OfficeManager`].
pub struct Converter {
    manager: Arc<dyn OfficeManager>,
    registry: Arc<FormatRegistry>,
    load_properties: Properties,
    store_properties: Properties,
    filters: FilterChain,
}

impl Converter {
    /// A converter with the built-in format catalog and the default filter
    /// chain.
    pub fn new(manager: Arc<dyn OfficeManager>) -> Self {
        Self::builder(manager).build()
    }

    pub fn builder(manager: Arc<dyn OfficeManager>) -> ConverterBuilder {
        ConverterBuilder {
            manager,
            registry: None,
            load_properties: Properties::new(),
            store_properties: Properties::new(),
            filters: FilterChain::default(),
        }
    }

    pub fn manager(&self) -> &Arc<dyn OfficeManager> {
        &self.manager
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Starts a conversion of a file path or a [`SourceDocument`].
    pub fn convert(&self, source: impl Into<SourceDocument>) -> ConversionJob<'_> {
        self.convert_spec(Box::new(source.into()))
    }

    /// Starts a conversion of a caller-provided source.
    pub fn convert_spec(&self, source: Box<dyn SourceSpec>) -> ConversionJob<'_> {
        ConversionJob {
            converter: self,
            source,
            target: None,
            target_format: None,
            load_properties: Properties::new(),
            store_properties: Properties::new(),
            filters: None,
        }
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("pool_size", &self.manager.pool_size())
            .field("formats", &self.registry.formats().len())
            .field("load_properties", &self.load_properties)
            .field("store_properties", &self.store_properties)
            .field("filters", &self.filters)
            .finish()
    }
}

/// Builder for [`Converter`].
pub struct ConverterBuilder {
    manager: Arc<dyn OfficeManager>,
    registry: Option<Arc<FormatRegistry>>,
    load_properties: Properties,
    store_properties: Properties,
    filters: FilterChain,
}

impl ConverterBuilder {
    /// Replaces the built-in format catalog.
    pub fn registry(mut self, registry: Arc<FormatRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Load option applied to every conversion.
    pub fn load_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.load_properties.insert(name.into(), value.into());
        self
    }

    /// Store option applied to every conversion.
    pub fn store_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.store_properties.insert(name.into(), value.into());
        self
    }

    /// Filters run between load and store. Default: a single refresh.
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn build(self) -> Converter {
        Converter {
            manager: self.manager,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(default_registry().clone())),
            load_properties: self.load_properties,
            store_properties: self.store_properties,
            filters: self.filters,
        }
    }
}

// ── Conversion job ───────────────────────────────────────────────────────

/// One pending conversion; run it with [`ConversionJob::execute`].
#[must_use = "a conversion job does nothing until executed"]
pub struct ConversionJob<'c> {
    converter: &'c Converter,
    source: Box<dyn SourceSpec>,
    target: Option<Box<dyn TargetSpec>>,
    target_format: Option<DocumentFormat>,
    load_properties: Properties,
    store_properties: Properties,
    filters: Option<FilterChain>,
}

impl<'c> ConversionJob<'c> {
    /// Sets the destination: a file path or a [`TargetDocument`].
    pub fn to(self, target: impl Into<TargetDocument>) -> Self {
        self.to_spec(Box::new(target.into()))
    }

    /// Sets a caller-provided destination.
    pub fn to_spec(mut self, target: Box<dyn TargetSpec>) -> Self {
        self.target = Some(target);
        self
    }

    /// Fixes the target format unless the target already carries one.
    pub fn as_format(mut self, format: DocumentFormat) -> Self {
        self.target_format = Some(format);
        self
    }

    pub fn load_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.load_properties.insert(name.into(), value.into());
        self
    }

    pub fn store_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.store_properties.insert(name.into(), value.into());
        self
    }

    /// Replaces the converter's filter chain for this job.
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Runs the conversion on the converter's manager.
    pub async fn execute(self) -> Result<(), OfficeError> {
        let manager = self.converter.manager.clone();
        let mut task = self.into_task().await?;
        let result = manager.execute(&mut task).await;
        if let Err(e) = &result {
            // Finalises whatever the task had not reached (e.g. no worker).
            task.abort(e).await;
        }
        result
    }

    /// Blocking wrapper around [`ConversionJob::execute`] for callers outside
    /// the runtime that owns the pool.
    ///
    /// Must not be called from within an async context.
    pub fn execute_blocking(self, runtime: &tokio::runtime::Handle) -> Result<(), OfficeError> {
        runtime.block_on(self.execute())
    }

    async fn into_task(self) -> Result<ConversionTask, OfficeError> {
        let converter = self.converter;
        let registry = &converter.registry;
        let mut source = self.source;

        let mut target = match self.target {
            Some(target) => target,
            None => {
                release_quietly(source.as_mut()).await;
                return Err(OfficeError::Configuration(
                    "No conversion target; call `.to(...)` before executing".into(),
                ));
            }
        };

        if source.format().is_none() {
            let inferred = source.path_hint().and_then(|p| registry.for_path(p)).cloned();
            if let Some(format) = inferred {
                source.set_format(format);
            }
        }

        if target.format().is_none() {
            let inferred = self
                .target_format
                .or_else(|| target.path_hint().and_then(|p| registry.for_path(p)).cloned());
            match inferred {
                Some(format) => target.set_format(format),
                None => {
                    release_quietly(source.as_mut()).await;
                    return Err(OfficeError::Configuration(
                        "Target format is required: use a target file with a known extension or call `.as_format(...)`"
                            .into(),
                    ));
                }
            }
        }

        debug!(
            "Converting {} -> {}",
            source.format().map(|f| f.extension()).unwrap_or("?"),
            target.format().map(|f| f.extension()).unwrap_or("?")
        );

        Ok(ConversionTask::new(source, target)
            .load_properties(merge_properties(
                &converter.load_properties,
                &self.load_properties,
            ))
            .store_properties(merge_properties(
                &converter.store_properties,
                &self.store_properties,
            ))
            .filters(self.filters.unwrap_or_else(|| converter.filters.clone())))
    }
}

async fn release_quietly(source: &mut dyn SourceSpec) {
    if let Err(e) = source.release().await {
        warn!("Could not release conversion source: {}", e);
    }
}

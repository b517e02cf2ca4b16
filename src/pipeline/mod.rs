//! Transformation pipeline run between load and store.
//!
//! A [`FilterChain`] is an ordered list of [`Filter`]s. Each filter receives
//! the loaded document and a [`Next`] continuation for the rest of the chain,
//! and decides whether to forward (`next.run(doc).await`), short-circuit
//! (return without calling `next`), or fail.
//!
//! ## Family capability table
//!
//! Every filter declares the [`DocumentFamily`] values it understands via
//! [`Filter::families`]. The chain consults that table before invoking a
//! filter: a filter written for text documents is skipped, not failed, when
//! a spreadsheet comes through.
//!
//! ```text
//! load ──▶ RefreshFilter ──▶ PageMarginsFilter ──▶ ... ──▶ store
//!            (all)            (TEXT only; skipped for
//!                              other families)
//! ```
//!
//! The default chain is a single [`RefreshFilter`]: a document stored right
//! after loading would otherwise keep stale fields and indexes.

pub mod filters;

pub use filters::{NoopFilter, PageMarginsFilter, PageSelectorFilter, RefreshFilter, TextInserterFilter};

use crate::error::OfficeError;
use crate::format::{DocumentFamily, DocumentFormat};
use crate::office::OfficeDocument;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What a filter may know about the running conversion.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub source_file: &'a Path,
    pub target_file: &'a Path,
    pub target_format: &'a DocumentFormat,
}

/// One step of the pipeline.
#[async_trait]
pub trait Filter: Send + Sync + fmt::Debug {
    /// Families this filter applies to. Default: all.
    fn families(&self) -> &[DocumentFamily] {
        &DocumentFamily::ALL
    }

    fn applies_to(&self, family: DocumentFamily) -> bool {
        self.families().contains(&family)
    }

    /// Mutates `doc` and (usually) forwards to `next`.
    async fn apply(
        &self,
        ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError>;
}

/// The remainder of a chain, handed to each filter.
pub struct Next<'a> {
    ctx: &'a FilterContext<'a>,
    filters: &'a [Arc<dyn Filter>],
}

impl<'a> Next<'a> {
    /// Runs the next applicable filter; filters that don't apply to the
    /// document's family are skipped.
    pub async fn run(self, doc: &mut dyn OfficeDocument) -> Result<(), OfficeError> {
        let family = doc.family();
        let mut rest = self.filters;
        while let Some((filter, tail)) = rest.split_first() {
            if filter.applies_to(family) {
                let next = Next {
                    ctx: self.ctx,
                    filters: tail,
                };
                return filter.apply(self.ctx, doc, next).await;
            }
            debug!("Skipping {:?}: not applicable to {} documents", filter, family);
            rest = tail;
        }
        Ok(())
    }
}

/// Ordered, immutable-once-built list of filters.
#[derive(Clone)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// An empty chain (documents are stored exactly as loaded).
    pub fn empty() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Appends `filter`.
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with_arc(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs the whole chain over `doc`.
    pub async fn run(
        &self,
        ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
    ) -> Result<(), OfficeError> {
        Next {
            ctx,
            filters: &self.filters,
        }
        .run(doc)
        .await
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::empty().with(RefreshFilter::new())
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.filters.iter()).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::format::Properties;
    use crate::office::{PageMargins, TextFrame};
    use parking_lot::Mutex;

    /// In-memory document recording every call.
    #[derive(Debug)]
    pub struct RecordingDocument {
        pub family: DocumentFamily,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingDocument {
        pub fn new(family: DocumentFamily) -> Self {
            Self {
                family,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl OfficeDocument for RecordingDocument {
        fn family(&self) -> DocumentFamily {
            self.family
        }
        async fn refresh(&mut self) -> Result<(), OfficeError> {
            self.calls.lock().push("refresh".into());
            Ok(())
        }
        async fn store(&mut self, path: &Path, _p: &Properties) -> Result<(), OfficeError> {
            self.calls.lock().push(format!("store {}", path.display()));
            Ok(())
        }
        async fn close(&mut self) -> Result<(), OfficeError> {
            self.calls.lock().push("close".into());
            Ok(())
        }
        async fn set_page_margins(&mut self, m: PageMargins) -> Result<(), OfficeError> {
            self.calls
                .lock()
                .push(format!("margins {} {} {} {}", m.left, m.top, m.right, m.bottom));
            Ok(())
        }
        async fn select_page(&mut self, page: u32) -> Result<(), OfficeError> {
            self.calls.lock().push(format!("select {page}"));
            Ok(())
        }
        async fn insert_text_frame(&mut self, frame: &TextFrame) -> Result<(), OfficeError> {
            self.calls.lock().push(format!("text {}", frame.text));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingDocument;
    use super::*;
    use crate::format::default_registry;
    use std::path::PathBuf;

    #[derive(Debug)]
    struct StopHere;

    #[async_trait]
    impl Filter for StopHere {
        async fn apply(
            &self,
            _ctx: &FilterContext<'_>,
            _doc: &mut dyn OfficeDocument,
            _next: Next<'_>,
        ) -> Result<(), OfficeError> {
            Ok(())
        }
    }

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("in.docx"), PathBuf::from("out.pdf"))
    }

    #[tokio::test]
    async fn default_chain_refreshes() {
        let (src, dst) = paths();
        let fmt = default_registry().by_extension("pdf").unwrap();
        let ctx = FilterContext {
            source_file: &src,
            target_file: &dst,
            target_format: fmt,
        };
        let mut doc = RecordingDocument::new(DocumentFamily::Spreadsheet);
        FilterChain::default().run(&ctx, &mut doc).await.unwrap();
        assert_eq!(*doc.calls.lock(), vec!["refresh".to_string()]);
    }

    #[tokio::test]
    async fn text_only_filter_is_skipped_for_spreadsheets() {
        let (src, dst) = paths();
        let fmt = default_registry().by_extension("pdf").unwrap();
        let ctx = FilterContext {
            source_file: &src,
            target_file: &dst,
            target_format: fmt,
        };
        let chain = FilterChain::empty()
            .with(PageMarginsFilter::new(10, 20, 30, 40))
            .with(RefreshFilter::new());

        let mut sheet = RecordingDocument::new(DocumentFamily::Spreadsheet);
        chain.run(&ctx, &mut sheet).await.unwrap();
        assert_eq!(*sheet.calls.lock(), vec!["refresh".to_string()]);

        let mut text = RecordingDocument::new(DocumentFamily::Text);
        chain.run(&ctx, &mut text).await.unwrap();
        assert_eq!(
            *text.calls.lock(),
            vec!["margins 10 20 30 40".to_string(), "refresh".to_string()]
        );
    }

    #[tokio::test]
    async fn short_circuit_stops_the_chain() {
        let (src, dst) = paths();
        let fmt = default_registry().by_extension("pdf").unwrap();
        let ctx = FilterContext {
            source_file: &src,
            target_file: &dst,
            target_format: fmt,
        };
        let chain = FilterChain::empty().with(StopHere).with(RefreshFilter::new());
        let mut doc = RecordingDocument::new(DocumentFamily::Text);
        chain.run(&ctx, &mut doc).await.unwrap();
        assert!(doc.calls.lock().is_empty());
    }
}

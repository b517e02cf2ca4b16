//! Built-in filters.

use super::{Filter, FilterContext, Next};
use crate::error::OfficeError;
use crate::format::{DocumentFamily, Properties};
use crate::office::{OfficeDocument, PageMargins, TextFrame};
use async_trait::async_trait;
use serde_json::Value;

const TEXT_ONLY: &[DocumentFamily] = &[DocumentFamily::Text];
const PAGED: &[DocumentFamily] = &[
    DocumentFamily::Text,
    DocumentFamily::Presentation,
    DocumentFamily::Drawing,
];

/// Refreshes derived content (fields, indexes) before store.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshFilter {
    last: bool,
}

impl RefreshFilter {
    pub fn new() -> Self {
        Self { last: false }
    }

    /// A refresh that ends the chain instead of forwarding.
    pub fn last() -> Self {
        Self { last: true }
    }
}

#[async_trait]
impl Filter for RefreshFilter {
    async fn apply(
        &self,
        _ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError> {
        doc.refresh().await?;
        if self.last {
            return Ok(());
        }
        next.run(doc).await
    }
}

/// Forwards without touching the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilter;

#[async_trait]
impl Filter for NoopFilter {
    async fn apply(
        &self,
        _ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError> {
        next.run(doc).await
    }
}

/// Sets the margins (mm) of every page style of a text document.
#[derive(Debug, Clone, Copy)]
pub struct PageMarginsFilter {
    margins: PageMargins,
}

impl PageMarginsFilter {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            margins: PageMargins {
                left,
                top,
                right,
                bottom,
            },
        }
    }
}

#[async_trait]
impl Filter for PageMarginsFilter {
    fn families(&self) -> &[DocumentFamily] {
        TEXT_ONLY
    }

    async fn apply(
        &self,
        _ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError> {
        doc.set_page_margins(self.margins).await?;
        next.run(doc).await
    }
}

/// Keeps a single page (1-based) of a paged document.
#[derive(Debug, Clone, Copy)]
pub struct PageSelectorFilter {
    page: u32,
}

impl PageSelectorFilter {
    pub fn new(page: u32) -> Self {
        Self { page: page.max(1) }
    }

    pub fn page(&self) -> u32 {
        self.page
    }
}

#[async_trait]
impl Filter for PageSelectorFilter {
    fn families(&self) -> &[DocumentFamily] {
        PAGED
    }

    async fn apply(
        &self,
        _ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError> {
        doc.select_page(self.page).await?;
        next.run(doc).await
    }
}

/// Inserts a positioned text frame on the first page of a text document.
#[derive(Debug, Clone)]
pub struct TextInserterFilter {
    frame: TextFrame,
}

impl TextInserterFilter {
    /// A `width` × `height` mm frame at the top-left corner.
    pub fn new(text: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            frame: TextFrame {
                text: text.into(),
                x: 0,
                y: 0,
                width,
                height,
                properties: Properties::new(),
            },
        }
    }

    /// Moves the frame to (`x`, `y`) mm from the page's top-left corner.
    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.frame.x = x;
        self.frame.y = y;
        self
    }

    /// Sets a frame / character property such as `CharHeight` or `CharColor`.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.frame.properties.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl Filter for TextInserterFilter {
    fn families(&self) -> &[DocumentFamily] {
        TEXT_ONLY
    }

    async fn apply(
        &self,
        _ctx: &FilterContext<'_>,
        doc: &mut dyn OfficeDocument,
        next: Next<'_>,
    ) -> Result<(), OfficeError> {
        doc.insert_text_frame(&self.frame).await?;
        next.run(doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::RecordingDocument;
    use super::super::FilterChain;
    use super::*;
    use crate::format::default_registry;
    use std::path::Path;

    async fn run(chain: FilterChain, family: DocumentFamily) -> Vec<String> {
        let fmt = default_registry().by_extension("pdf").unwrap();
        let ctx = FilterContext {
            source_file: Path::new("a.odt"),
            target_file: Path::new("b.pdf"),
            target_format: fmt,
        };
        let mut doc = RecordingDocument::new(family);
        chain.run(&ctx, &mut doc).await.unwrap();
        let calls = doc.calls.lock().clone();
        calls
    }

    #[tokio::test]
    async fn last_refresh_ends_chain() {
        let calls = run(
            FilterChain::empty()
                .with(RefreshFilter::last())
                .with(PageSelectorFilter::new(2)),
            DocumentFamily::Text,
        )
        .await;
        assert_eq!(calls, vec!["refresh"]);
    }

    #[tokio::test]
    async fn page_selector_skips_spreadsheets() {
        let chain = FilterChain::empty()
            .with(PageSelectorFilter::new(3))
            .with(NoopFilter)
            .with(RefreshFilter::new());
        assert_eq!(
            run(chain.clone(), DocumentFamily::Drawing).await,
            vec!["select 3", "refresh"]
        );
        assert_eq!(run(chain, DocumentFamily::Spreadsheet).await, vec!["refresh"]);
    }

    #[tokio::test]
    async fn text_inserter_only_for_text() {
        let chain = FilterChain::empty().with(
            TextInserterFilter::new("CONFIDENTIAL", 100, 20)
                .at(50, 10)
                .property("CharHeight", 24),
        );
        assert_eq!(run(chain.clone(), DocumentFamily::Text).await, vec!["text CONFIDENTIAL"]);
        assert!(run(chain, DocumentFamily::Presentation).await.is_empty());
    }

    #[test]
    fn page_selector_is_one_based() {
        assert_eq!(PageSelectorFilter::new(0).page(), 1);
    }
}

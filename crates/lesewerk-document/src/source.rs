// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document sources — the read-only page provider the engine pulls from.
//
// A `Document` is an immutable handle. The engine borrows it for one
// extraction call and loads pages one at a time, so a source never has to
// hold more than the raw bytes plus whatever index it builds on open.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use lesewerk_core::error::{LesewerkError, PageErrorKind, PageExtractionError, Result};
use lesewerk_core::types::{BoundingBox, LineSegment, PageLayout, TextRun};
use serde::{Deserialize, Serialize};

use crate::pdf::reader::PdfReader;

/// Geometry and text of a single loaded page.
///
/// Coordinates are in page units with a top-left origin.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageContent {
    /// 1-indexed page number.
    pub number: u32,
    pub width: f32,
    pub height: f32,
    pub text_runs: Vec<TextRun>,
    pub segments: Vec<LineSegment>,
    pub image_count: usize,
}

impl PageContent {
    pub fn new(number: u32, width: f32, height: f32) -> Self {
        Self {
            number,
            width,
            height,
            ..Default::default()
        }
    }

    /// Non-whitespace characters across all text runs.
    pub fn char_count(&self) -> usize {
        self.text_runs
            .iter()
            .map(|run| run.text.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            width: self.width,
            height: self.height,
            text_runs: self.text_runs.len(),
            line_segments: self.segments.len(),
            images: self.image_count,
        }
    }
}

/// A read-only provider of document pages.
///
/// Implementations must be safe to share between worker threads; the engine
/// never mutates a source.
pub trait DocumentSource: Send + Sync {
    fn page_count(&self) -> u32;

    /// Stable view over the raw document bytes, used for fingerprinting.
    fn bytes(&self) -> &[u8];

    /// Load geometry and text for one page (1-indexed).
    fn load_page(&self, page: u32) -> Result<PageContent>;

    /// Produce an image of the page for OCR, if the source can.
    fn render_page(&self, page: u32) -> Result<Option<DynamicImage>>;
}

/// Immutable handle to an opened document.
#[derive(Clone)]
pub struct Document {
    source: Arc<dyn DocumentSource>,
    page_count: u32,
    size: usize,
}

impl Document {
    // -- Construction ---------------------------------------------------------

    pub fn new(source: impl DocumentSource + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<dyn DocumentSource>) -> Self {
        let page_count = source.page_count();
        let size = source.bytes().len();
        Self {
            source,
            page_count,
            size,
        }
    }

    /// Open a PDF from the filesystem.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(PdfReader::open(path)?))
    }

    /// Open a PDF already held in memory.
    pub fn from_pdf_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        Ok(Self::new(PdfReader::from_bytes(bytes)?))
    }

    // -- Inspection -----------------------------------------------------------

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Size of the raw document in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    /// Shared handle to the underlying source, for moving into workers.
    pub fn source(&self) -> Arc<dyn DocumentSource> {
        Arc::clone(&self.source)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("page_count", &self.page_count)
            .field("size", &self.size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// One pre-built page of a [`MemorySource`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPage {
    pub width: f32,
    pub height: f32,
    pub text_runs: Vec<TextRun>,
    pub segments: Vec<LineSegment>,
    pub image: Option<DynamicImage>,
    failure: Option<(PageErrorKind, String)>,
}

impl MemoryPage {
    /// An empty US Letter page.
    pub fn blank() -> Self {
        Self {
            width: 612.0,
            height: 792.0,
            ..Default::default()
        }
    }

    /// Lay `text` out one run per line, top to bottom.
    pub fn with_text(mut self, text: &str) -> Self {
        let size = 12.0;
        let mut y = 72.0 + self.text_runs.len() as f32 * size * 1.2;
        for line in text.lines() {
            let width = line.chars().count() as f32 * size * 0.5;
            self.text_runs.push(TextRun {
                text: line.to_string(),
                bbox: BoundingBox::new(72.0, y, 72.0 + width, y + size),
                font_size: size,
            });
            y += size * 1.2;
        }
        self
    }

    pub fn with_run(mut self, run: TextRun) -> Self {
        self.text_runs.push(run);
        self
    }

    pub fn with_segment(mut self, segment: LineSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = Some(image);
        self
    }

    /// Make every load of this page fail with `kind`.
    pub fn failing(mut self, kind: PageErrorKind, message: impl Into<String>) -> Self {
        self.failure = Some((kind, message.into()));
        self
    }
}

/// A document whose pages were built in memory.
///
/// Used by callers that already hold parsed pages, and throughout the tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
    pages: Vec<MemoryPage>,
}

impl MemorySource {
    /// `bytes` identify the document for fingerprinting.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            pages: Vec::new(),
        }
    }

    pub fn with_page(mut self, page: MemoryPage) -> Self {
        self.pages.push(page);
        self
    }

    /// Append `count` pages, each holding the text `"page N ..."`.
    pub fn with_text_pages(mut self, count: u32) -> Self {
        let start = self.pages.len() as u32;
        for n in start + 1..=start + count {
            self.pages.push(MemoryPage::blank().with_text(&format!(
                "page {n} carries enough embedded text to skip recognition"
            )));
        }
        self
    }

    fn page(&self, page: u32) -> Result<&MemoryPage> {
        page.checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
            .ok_or_else(|| {
                PageExtractionError::new(
                    page,
                    PageErrorKind::Load,
                    format!("page out of range (document has {} pages)", self.pages.len()),
                )
                .into()
            })
    }
}

impl DocumentSource for MemorySource {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn load_page(&self, page: u32) -> Result<PageContent> {
        let memory = self.page(page)?;
        if let Some((kind, message)) = &memory.failure {
            return Err(LesewerkError::Page(PageExtractionError::new(
                page,
                *kind,
                message.clone(),
            )));
        }
        Ok(PageContent {
            number: page,
            width: memory.width,
            height: memory.height,
            text_runs: memory.text_runs.clone(),
            segments: memory.segments.clone(),
            image_count: usize::from(memory.image.is_some()),
        })
    }

    fn render_page(&self, page: u32) -> Result<Option<DynamicImage>> {
        Ok(self.page(page)?.image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn memory_source_numbers_pages_from_one() {
        let doc = Document::new(MemorySource::new(b"doc".to_vec()).with_text_pages(3));
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.size(), 3);

        let page = doc.source().load_page(2).expect("load page 2");
        assert_eq!(page.number, 2);
        assert!(page.text_runs[0].text.starts_with("page 2"));
    }

    #[test]
    fn out_of_range_page_is_a_load_error() {
        let source = MemorySource::new(b"x".to_vec()).with_text_pages(1);
        match source.load_page(5) {
            Err(LesewerkError::Page(err)) => {
                assert_eq!(err.page, 5);
                assert_eq!(err.kind, PageErrorKind::Load);
            }
            other => panic!("expected page error, got {other:?}"),
        }
        assert!(source.load_page(0).is_err());
    }

    #[test]
    fn failing_page_reports_its_kind() {
        let source = MemorySource::new(b"x".to_vec())
            .with_page(MemoryPage::blank().failing(PageErrorKind::Parse, "broken stream"));
        let err = source.load_page(1).expect_err("must fail");
        assert_eq!(err.to_string(), "page 1 (parse): broken stream");
    }

    #[test]
    fn layout_counts_content() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([255])));
        let source = MemorySource::new(b"x".to_vec()).with_page(
            MemoryPage::blank()
                .with_text("one\ntwo")
                .with_segment(LineSegment::new(0.0, 0.0, 10.0, 0.0))
                .with_image(image),
        );
        let page = source.load_page(1).expect("load");
        let layout = page.layout();
        assert_eq!(layout.text_runs, 2);
        assert_eq!(layout.line_segments, 1);
        assert_eq!(layout.images, 1);
        assert_eq!(page.char_count(), 6);
        assert!(source.render_page(1).expect("render").is_some());
    }
}

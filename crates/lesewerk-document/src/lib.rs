// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-document — Page-level document processing for the Lesewerk engine.
//
// Provides document sources (PDF via `lopdf`, in-memory pages), native text
// reconstruction, ruled-table detection with continuation merging, and the
// scanned-page pipeline (enhancement plus pluggable OCR recognisers).

pub mod native;
pub mod pdf;
pub mod scan;
pub mod source;
pub mod table;

// Re-export the primary types so callers can use `lesewerk_document::Document` etc.
pub use native::{NativeExtractor, NativeText};
pub use pdf::reader::PdfReader;
pub use scan::{OcrPreprocessing, Recognizer, ScanEnhancer};
pub use source::{Document, DocumentSource, MemoryPage, MemorySource, PageContent};
pub use table::TableExtractor;

#[cfg(feature = "ocr")]
pub use scan::ocr::OcrsRecognizer;

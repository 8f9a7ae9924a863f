// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Lesewerk.
//
// Only `FatalDocument` and `InvalidOptions` ever reach the caller as `Err`.
// Every other variant is captured by the engine and attached to the
// extraction outcome as a page error or a warning.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all Lesewerk operations.
#[derive(Debug, Error)]
pub enum LesewerkError {
    // -- Run-level errors --
    #[error("document cannot be opened: {0}")]
    FatalDocument(String),

    #[error("invalid extraction options: {0}")]
    InvalidOptions(String),

    #[error("extraction cancelled: {0}")]
    Cancelled(String),

    // -- Page / subsystem errors --
    #[error(transparent)]
    Page(#[from] PageExtractionError),

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("PDF operation failed: {0}")]
    Pdf(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Configuration / plumbing --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LesewerkError>;

/// What went wrong on a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageErrorKind {
    /// The page could not be read from the document source.
    Load,
    /// The page content stream could not be interpreted.
    Parse,
    /// The page exceeded the per-page timeout.
    Timeout,
    /// The worker processing the page panicked.
    Panicked,
    /// Recognition failed after native extraction was insufficient.
    Ocr,
    /// The page was started but abandoned because the run was cancelled.
    Cancelled,
}

impl PageErrorKind {
    /// Whether a retry of the same page might succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Load | Self::Timeout)
    }
}

impl fmt::Display for PageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Load => "load",
            Self::Parse => "parse",
            Self::Timeout => "timeout",
            Self::Panicked => "panicked",
            Self::Ocr => "ocr",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A non-fatal failure attached to one page of an extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("page {page} ({kind}): {message}")]
pub struct PageExtractionError {
    /// 1-indexed page number.
    pub page: u32,
    pub kind: PageErrorKind,
    pub message: String,
}

impl PageExtractionError {
    pub fn new(page: u32, kind: PageErrorKind, message: impl Into<String>) -> Self {
        Self {
            page,
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable errors and quality warnings.
//
// Every failure the engine swallows ends up in `quality.warnings` with a plain
// sentence and an actionable suggestion, so a caller can decide whether to
// re-run with different options (force OCR, lift the page cap, ...).

use crate::error::{LesewerkError, PageErrorKind, PageExtractionError};
use crate::types::{Warning, WarningKind};

/// Severity of an error from the caller's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Timeout or flaky read; a re-run may succeed as is.
    Transient,
    /// The caller must change options or install something.
    ActionRequired,
    /// Malformed input. Retrying cannot fix it.
    Permanent,
}

/// A human-readable error with plain message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    /// Whether re-running unchanged might help.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `LesewerkError` into a `HumanError`.
pub fn humanize_error(err: &LesewerkError) -> HumanError {
    match err {
        LesewerkError::FatalDocument(detail) => HumanError {
            message: "The document could not be opened.".into(),
            suggestion: format!(
                "The file may be damaged or not a supported format. Try re-exporting it as PDF. ({detail})"
            ),
            retriable: false,
            severity: Severity::Permanent,
        },

        LesewerkError::InvalidOptions(detail) => HumanError {
            message: "The extraction options are not valid.".into(),
            suggestion: format!("Fix the options and try again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        LesewerkError::Cancelled(_) => HumanError {
            message: "The extraction was cancelled.".into(),
            suggestion: "Run the extraction again to process the remaining pages.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        LesewerkError::Page(page_err) => humanize_page_error(page_err),

        LesewerkError::OcrUnavailable(detail) => HumanError {
            message: "Text recognition is not available.".into(),
            suggestion: format!(
                "Install the OCR models or point `ocr.model_dir` at them, then re-run. ({detail})"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        LesewerkError::Ocr(_) => HumanError {
            message: "Text recognition failed on a page.".into(),
            suggestion: "Re-run the extraction; if it keeps failing the page image may be unreadable.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        LesewerkError::Cache(_) => HumanError {
            message: "The result cache could not be used.".into(),
            suggestion: "Results were computed without the cache. Nothing to do unless this repeats.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        LesewerkError::Pdf(_) => HumanError {
            message: "There's a problem with this PDF file.".into(),
            suggestion: "The file may be damaged. Try opening it in a viewer first, or re-export it.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        LesewerkError::Image(_) => HumanError {
            message: "A page image could not be decoded.".into(),
            suggestion: "The embedded scan may use an unsupported encoding. Try re-scanning to PDF.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        LesewerkError::Config(detail) => HumanError {
            message: "The engine configuration is not valid.".into(),
            suggestion: format!("Check the configuration file and environment. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        LesewerkError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "The file couldn't be found.".into(),
                    suggestion: "It may have been moved or deleted. Check the path.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "The engine doesn't have permission to read that file.".into(),
                    suggestion: "Check the file permissions.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading a file.".into(),
                    suggestion: "Try again.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        LesewerkError::Serialization(_) => HumanError {
            message: "A result could not be encoded.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Humanize a single page failure by its kind.
fn humanize_page_error(err: &PageExtractionError) -> HumanError {
    match err.kind {
        PageErrorKind::Load => HumanError {
            message: format!("Page {} could not be read.", err.page),
            suggestion: "Re-run the extraction; the read may have been interrupted.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        PageErrorKind::Parse => HumanError {
            message: format!("Page {} has content the engine could not interpret.", err.page),
            suggestion: "Try re-running with OCR enabled so the page is read from its image.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },
        PageErrorKind::Timeout => HumanError {
            message: format!("Page {} took too long to process.", err.page),
            suggestion: "Raise `page_timeout_ms` or re-run when the machine is less busy.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        PageErrorKind::Panicked => HumanError {
            message: format!("Processing page {} crashed.", err.page),
            suggestion: "The page is probably malformed. Please report the file if you can.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },
        PageErrorKind::Ocr => HumanError {
            message: format!("Text recognition failed on page {}.", err.page),
            suggestion: "Re-run the extraction; if it keeps failing the scan may be unreadable.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        PageErrorKind::Cancelled => HumanError {
            message: format!("Page {} was abandoned because the run was cancelled.", err.page),
            suggestion: "Run the extraction again to process this page.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

// ---------------------------------------------------------------------------
// Warning builders
// ---------------------------------------------------------------------------

/// Why a page kept low-confidence native text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    /// OCR was disabled by the options or the mode.
    OcrDisabled,
    /// The OCR pool could not be initialised.
    OcrUnavailable,
    /// The page had no image to recognise.
    NoPageImage,
    /// Recognition ran but failed.
    OcrFailed,
}

/// Warning for a page that failed outright.
pub fn page_failure_warning(err: &PageExtractionError) -> Warning {
    let human = humanize_page_error(err);
    Warning {
        kind: WarningKind::PageFailed,
        page: Some(err.page),
        message: human.message,
        suggestion: human.suggestion,
    }
}

/// Warning for a page whose native text stayed below the confidence floor.
pub fn degraded_page_warning(page: u32, reason: DegradeReason) -> Warning {
    let (kind, message, suggestion) = match reason {
        DegradeReason::OcrDisabled => (
            WarningKind::DegradedPage,
            format!("Page {page} has little or no embedded text and OCR was disabled."),
            "Re-run with OCR enabled (standard or full mode) to read this page.".to_string(),
        ),
        DegradeReason::OcrUnavailable => (
            WarningKind::DegradedPage,
            format!("Page {page} needed OCR but text recognition is unavailable."),
            "Install the OCR models, then re-run.".to_string(),
        ),
        DegradeReason::NoPageImage => (
            WarningKind::DegradedPage,
            format!("Page {page} has little embedded text and no image to recognise."),
            "Check the page by hand; it may be blank or vector-only.".to_string(),
        ),
        DegradeReason::OcrFailed => (
            WarningKind::OcrFailed,
            format!("Text recognition failed on page {page}; kept the embedded text."),
            "Re-run the extraction; if it keeps failing the scan may be unreadable.".to_string(),
        ),
    };
    Warning {
        kind,
        page: Some(page),
        message,
        suggestion,
    }
}

/// Warning raised once per run when the OCR pool cannot start.
pub fn ocr_unavailable_warning(detail: &str) -> Warning {
    let human = humanize_error(&LesewerkError::OcrUnavailable(detail.to_string()));
    Warning {
        kind: WarningKind::OcrUnavailable,
        page: None,
        message: human.message,
        suggestion: human.suggestion,
    }
}

/// Warning for a run cut short by cancellation.
pub fn truncation_warning(pages_processed: u32, pages_planned: u32) -> Warning {
    Warning {
        kind: WarningKind::Truncated,
        page: None,
        message: format!(
            "Extraction was cancelled after {pages_processed} of {pages_planned} pages; the result is partial."
        ),
        suggestion: "Run the extraction again to process the remaining pages.".into(),
    }
}

/// Warning for a run that processed fewer pages than the document has.
pub fn page_limit_warning(cap: u32, total_pages: u32) -> Warning {
    Warning {
        kind: WarningKind::PageLimit,
        page: None,
        message: format!("Only the first {cap} of {total_pages} pages were processed."),
        suggestion: "Use full mode or raise `max_pages` to process every page.".into(),
    }
}

/// Warning for a run that had to bypass the cache.
pub fn cache_bypassed_warning(detail: &str) -> Warning {
    let human = humanize_error(&LesewerkError::Cache(detail.to_string()));
    Warning {
        kind: WarningKind::CacheBypassed,
        page: None,
        message: format!("{} ({detail})", human.message),
        suggestion: human.suggestion,
    }
}

/// Warning for a table stitched across pages.
pub fn table_merge_warning(pages: &[u32], merge_confidence: f32) -> Warning {
    let first = pages.first().copied().unwrap_or_default();
    let last = pages.last().copied().unwrap_or_default();
    Warning {
        kind: WarningKind::TableMerged,
        page: Some(first),
        message: format!(
            "A table on pages {first}-{last} was joined by matching headers (merge confidence {merge_confidence:.2})."
        ),
        suggestion: "Raise `tables.merge_threshold` if unrelated tables are being joined.".into(),
    }
}

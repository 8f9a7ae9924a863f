// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Lesewerk extraction engine.
//
// Geometry uses a top-left origin: `y` grows downwards, matching reading
// order. PDF sources flip their bottom-left user space on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PageExtractionError;

/// Unique identifier for one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Axis-aligned rectangle in page space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(xa: f32, ya: f32, xb: f32, yb: f32) -> Self {
        Self {
            x0: xa.min(xb),
            y0: ya.min(yb),
            x1: xa.max(xb),
            y1: ya.max(yb),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// A positioned run of text as drawn by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub bbox: BoundingBox,
    /// Effective font size in page units.
    pub font_size: f32,
}

/// Orientation of a ruling line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// A straight vector line drawn on the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl LineSegment {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Classify by near-zero delta on the orthogonal axis.
    ///
    /// Returns `None` for diagonal segments and for points.
    pub fn axis(&self, tolerance: f32) -> Option<Axis> {
        let dx = (self.x1 - self.x0).abs();
        let dy = (self.y1 - self.y0).abs();
        if dy <= tolerance && dx > tolerance {
            Some(Axis::Horizontal)
        } else if dx <= tolerance && dy > tolerance {
            Some(Axis::Vertical)
        } else {
            None
        }
    }
}

/// Per-page layout summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub text_runs: usize,
    pub line_segments: usize,
    pub images: usize,
}

// ---------------------------------------------------------------------------
// Pages and tables
// ---------------------------------------------------------------------------

/// How the text of a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

/// Lifecycle of a single page within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

/// One unit of page work, owned by the worker executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    /// 1-indexed page number.
    pub page: u32,
    /// 0-indexed chunk the page belongs to.
    pub chunk: u32,
    pub state: TaskState,
}

impl PageTask {
    pub fn new(page: u32, chunk: u32) -> Self {
        Self {
            page,
            chunk,
            state: TaskState::Pending,
        }
    }
}

/// A table detected on one page, or merged across consecutive pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Page the table starts on.
    pub page: u32,
    pub bbox: BoundingBox,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub confidence: f32,
    /// Every page the table spans, in order.
    pub pages: Vec<u32>,
    /// Set only when the table was stitched from a continuation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_confidence: Option<f32>,
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Number of data rows (the header is not counted).
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// The result for one processed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page: u32,
    /// `Done` or `Failed`.
    pub state: TaskState,
    pub text: String,
    pub method: ExtractionMethod,
    /// Confidence of the reported text, 0.0..=1.0.
    pub confidence: f32,
    /// Confidence of the native attempt, as seen by OCR routing.
    pub native_confidence: f32,
    pub tables: Vec<Table>,
    pub errors: Vec<PageExtractionError>,
    /// How many times the page was attempted (1 unless retried).
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<PageLayout>,
}

impl PageResult {
    /// A failed page carrying an empty result and the error that caused it.
    pub fn failed(error: PageExtractionError, attempts: u32) -> Self {
        Self {
            page: error.page,
            state: TaskState::Failed,
            text: String::new(),
            method: ExtractionMethod::Native,
            confidence: 0.0,
            native_confidence: 0.0,
            tables: Vec::new(),
            errors: vec![error],
            attempts,
            layout: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Done
    }
}

/// A single recognised word with its box in image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Output of one OCR recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
    pub word_boxes: Vec<WordBox>,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Preset controlling page caps and OCR eagerness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Few pages, no OCR, for fast feedback.
    Preview,
    /// Moderate page cap with OCR enabled.
    #[default]
    Standard,
    /// Every page.
    Full,
    /// Caller-supplied values, validated.
    Custom,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Standard => "standard",
            Self::Full => "full",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preview" => Ok(Self::Preview),
            "standard" => Ok(Self::Standard),
            "full" => Ok(Self::Full),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown extraction mode: {other}")),
        }
    }
}

/// Result of the native-text density estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentClass {
    /// Most sampled pages carry usable embedded text.
    Native,
    /// Almost no sampled page carries embedded text.
    Scanned,
    /// Somewhere in between.
    Mixed,
}

/// Terminal state of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Done,
    Failed,
    Cancelled,
}

/// Pipeline stage reported through progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Classifying,
    Extracting,
    Ocr,
    Aggregating,
    Done,
    Error,
}

/// One progress event delivered to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub pages_done: u32,
    pub pages_total: u32,
    pub current_page: Option<u32>,
    pub message: Option<String>,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout or flaky read, safe to retry automatically.
    Transient,
    /// Caller must change something (install OCR models, enable OCR).
    UserAction,
    /// Retrying with the same inputs will fail the same way.
    Permanent,
}

/// Category of a quality warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Native text was insufficient and OCR did not replace it.
    DegradedPage,
    /// The OCR pool could not be initialised.
    OcrUnavailable,
    /// Recognition failed for a page.
    OcrFailed,
    /// The page failed entirely.
    PageFailed,
    /// The cache was unusable and the run proceeded uncached.
    CacheBypassed,
    /// The run was cancelled; the outcome is partial.
    Truncated,
    /// The mode or `max_pages` capped the number of pages processed.
    PageLimit,
    /// A table was stitched across pages heuristically.
    TableMerged,
}

/// A user-visible quality warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub message: String,
    pub suggestion: String,
}

/// Aggregate quality metrics for a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall: f32,
    pub text_quality: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_quality: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_accuracy: Option<f32>,
    pub pages_processed: u32,
    pub total_pages: u32,
    pub warnings: Vec<Warning>,
}

/// Descriptive metadata about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub run_id: RunId,
    /// Hex fingerprint used as the cache key.
    pub fingerprint: String,
    pub document_class: DocumentClass,
    pub mode: ExtractionMode,
    pub from_cache: bool,
    pub total_tables: usize,
    pub text_length: usize,
    /// Most page buffers held at once during the run.
    pub peak_page_buffers: usize,
    pub elapsed_ms: u64,
    pub extracted_at: DateTime<Utc>,
}

/// Everything an extraction run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub status: RunStatus,
    /// Page texts joined in ascending page order.
    pub text: String,
    /// Per-page results in ascending page order.
    pub pages: Vec<PageResult>,
    /// Tables in page order, with continuations merged.
    pub tables: Vec<Table>,
    pub quality: QualityReport,
    /// Every page error, in page order.
    pub errors: Vec<PageExtractionError>,
    pub metadata: ExtractionMetadata,
}

impl ExtractionOutcome {
    /// True when the run stopped early and the outcome covers only some pages.
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn succeeded_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.succeeded()).count()
    }
}

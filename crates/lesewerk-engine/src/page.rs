// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page processing: one explicit state machine from load to a terminal
// result.
//
//   Load ──> Route ──> Done                  native text is good enough
//              │
//              ├──> Recognize ──> Done       OCR replaced the native text
//              │        │
//              └────────┴──> Degrade ──> Done
//
// Each attempt runs under the page timeout. Transient failures (load
// errors, timeouts) are retried with backoff; everything else fails the
// page immediately. A timed-out attempt's blocking work is drained before
// the retry, so one page is never loaded twice at once.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use lesewerk_core::error::{LesewerkError, PageErrorKind, PageExtractionError};
use lesewerk_core::human_errors::{DegradeReason, degraded_page_warning};
use lesewerk_core::types::{ExtractionMethod, PageLayout, PageResult, Recognition, Table, TaskState, Warning};
use lesewerk_document::{DocumentSource, NativeExtractor, NativeText, TableExtractor};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::ocr_pool::OcrPool;
use crate::pool::{BufferGauge, PageWork};
use crate::progress::CancellationToken;
use crate::retry::{RetryConfig, RetryDecision, should_retry};

/// Everything a worker needs to process pages of one run.
pub(crate) struct RunContext {
    pub source: Arc<dyn DocumentSource>,
    pub native: NativeExtractor,
    /// `None` when table detection is off.
    pub tables: Option<TableExtractor>,
    /// `None` when OCR is off for this run.
    pub ocr: Option<Arc<OcrPool>>,
    /// Confidence reported for degraded pages.
    pub confidence_floor: f32,
    pub page_timeout: Duration,
    pub retry: RetryConfig,
    pub gauge: BufferGauge,
    pub cancel: CancellationToken,
}

/// A page that reached `Done`, with the warnings it raised.
#[derive(Debug, Clone)]
pub struct PageReport {
    pub result: PageResult,
    pub warnings: Vec<Warning>,
    /// Set when the page needed OCR and the pool could not start.
    pub ocr_unavailable: Option<String>,
}

/// A page that ended `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub error: PageExtractionError,
    pub attempts: u32,
}

/// Output of the load step.
struct Analysed {
    native: NativeText,
    tables: Vec<Table>,
    layout: PageLayout,
    errors: Vec<PageExtractionError>,
    ocr_unavailable: Option<String>,
}

enum Step {
    Load,
    Route(Analysed),
    Recognize(Analysed),
    Degrade(Analysed, DegradeReason),
    Done(PageReport),
}

/// Process `page` to a terminal state, retrying transient failures.
pub(crate) async fn process_page(ctx: &RunContext, page: u32) -> Result<PageReport, PageFailure> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let work = PageWork::default();
        let error = match tokio::time::timeout(ctx.page_timeout, run_attempt(ctx, page, &work)).await {
            Ok(Ok(mut report)) => {
                report.result.attempts = attempt;
                return Ok(report);
            }
            Ok(Err(err)) => err,
            Err(_) => {
                if work.active() > 0 {
                    debug!(page, attempt, "Attempt timed out; waiting for its blocking work");
                    work.settled().await;
                }
                PageExtractionError::new(
                    page,
                    PageErrorKind::Timeout,
                    format!("page took longer than {} ms", ctx.page_timeout.as_millis()),
                )
            }
        };

        match should_retry(&error, attempt, &ctx.retry) {
            RetryDecision::RetryAfter(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        return Err(PageFailure { error, attempts: attempt });
                    }
                }
            }
            RetryDecision::GiveUp(_) | RetryDecision::Exhausted => {
                warn!(page, attempt, kind = %error.kind, error = %error.message, "Page failed");
                return Err(PageFailure { error, attempts: attempt });
            }
        }
    }
}

async fn run_attempt(ctx: &RunContext, page: u32, work: &PageWork) -> Result<PageReport, PageExtractionError> {
    let mut step = Step::Load;
    loop {
        step = match step {
            Step::Load => Step::Route(analyse(ctx, page, work).await?),
            Step::Route(analysed) => {
                if !ctx.native.needs_ocr(&analysed.native) {
                    Step::Done(native_report(page, analysed))
                } else if ctx.ocr.is_some() {
                    Step::Recognize(analysed)
                } else {
                    Step::Degrade(analysed, DegradeReason::OcrDisabled)
                }
            }
            Step::Recognize(analysed) => recognize(ctx, page, analysed, work).await,
            Step::Degrade(analysed, reason) => Step::Done(degraded_report(ctx, page, analysed, reason)),
            Step::Done(report) => return Ok(report),
        };
    }
}

/// Load the page and run native text and table extraction on it.
///
/// Runs on the blocking pool while holding one page buffer.
async fn analyse(ctx: &RunContext, page: u32, work: &PageWork) -> Result<Analysed, PageExtractionError> {
    let source = Arc::clone(&ctx.source);
    let native = ctx.native;
    let tables = ctx.tables.clone();
    let gauge = ctx.gauge.clone();

    let joined = work.spawn_blocking(move || {
        let _buffer = gauge.acquire();
        let content = source.load_page(page).map_err(|err| page_error(page, err))?;
        let native_text = native.extract(&content);
        let tables = tables.map(|t| t.extract(&content)).unwrap_or_default();
        Ok(Analysed {
            native: native_text,
            tables,
            layout: content.layout(),
            errors: Vec::new(),
            ocr_unavailable: None,
        })
    })
    .await;
    joined.unwrap_or_else(|err| Err(join_error(page, err)))
}

async fn recognize(ctx: &RunContext, page: u32, mut analysed: Analysed, work: &PageWork) -> Step {
    let Some(pool) = ctx.ocr.as_ref() else {
        return Step::Degrade(analysed, DegradeReason::OcrDisabled);
    };

    // Holds the rendered image until recognition is over.
    let _buffer = ctx.gauge.acquire();
    let source = Arc::clone(&ctx.source);
    let rendered = work.spawn_blocking(move || source.render_page(page)).await;
    let image = match rendered {
        Ok(Ok(Some(image))) => image,
        Ok(Ok(None)) => return Step::Degrade(analysed, DegradeReason::NoPageImage),
        Ok(Err(err)) => {
            warn!(page, error = %err, "Page image could not be rendered");
            return Step::Degrade(analysed, DegradeReason::NoPageImage);
        }
        Err(err) => {
            analysed.errors.push(join_error(page, err));
            return Step::Degrade(analysed, DegradeReason::NoPageImage);
        }
    };

    match pool.recognize(image, work).await {
        Ok(recognition) => Step::Done(ocr_report(page, analysed, recognition)),
        Err(LesewerkError::OcrUnavailable(reason)) => {
            analysed.ocr_unavailable = Some(reason);
            Step::Degrade(analysed, DegradeReason::OcrUnavailable)
        }
        Err(err) => {
            analysed
                .errors
                .push(PageExtractionError::new(page, PageErrorKind::Ocr, err.to_string()));
            Step::Degrade(analysed, DegradeReason::OcrFailed)
        }
    }
}

fn done(page: u32, analysed: Analysed, text: String, method: ExtractionMethod, confidence: f32) -> PageResult {
    PageResult {
        page,
        state: TaskState::Done,
        text,
        method,
        confidence: confidence.clamp(0.0, 1.0),
        native_confidence: analysed.native.confidence,
        tables: analysed.tables,
        errors: analysed.errors,
        attempts: 1,
        layout: Some(analysed.layout),
    }
}

fn native_report(page: u32, analysed: Analysed) -> PageReport {
    let text = analysed.native.text.clone();
    let confidence = analysed.native.confidence;
    debug!(page, confidence, "Page kept native text");
    PageReport {
        result: done(page, analysed, text, ExtractionMethod::Native, confidence),
        warnings: Vec::new(),
        ocr_unavailable: None,
    }
}

fn ocr_report(page: u32, analysed: Analysed, recognition: Recognition) -> PageReport {
    debug!(
        page,
        native = analysed.native.confidence,
        ocr = recognition.confidence,
        words = recognition.word_boxes.len(),
        "Page recognised"
    );
    PageReport {
        result: done(page, analysed, recognition.text, ExtractionMethod::Ocr, recognition.confidence),
        warnings: Vec::new(),
        ocr_unavailable: None,
    }
}

fn degraded_report(ctx: &RunContext, page: u32, analysed: Analysed, reason: DegradeReason) -> PageReport {
    debug!(page, ?reason, "Page degraded to native text");
    let text = analysed.native.text.clone();
    let ocr_unavailable = analysed.ocr_unavailable.clone();
    PageReport {
        result: done(page, analysed, text, ExtractionMethod::Native, ctx.confidence_floor),
        warnings: vec![degraded_page_warning(page, reason)],
        ocr_unavailable,
    }
}

/// Map a source error onto the page that raised it.
pub(crate) fn page_error(page: u32, err: LesewerkError) -> PageExtractionError {
    match err {
        LesewerkError::Page(mut err) => {
            err.page = page;
            err
        }
        LesewerkError::Pdf(message) | LesewerkError::Image(message) => {
            PageExtractionError::new(page, PageErrorKind::Parse, message)
        }
        other => PageExtractionError::new(page, PageErrorKind::Load, other.to_string()),
    }
}

pub(crate) fn join_error(page: u32, err: JoinError) -> PageExtractionError {
    if err.is_panic() {
        let message = panic_message(err.into_panic());
        PageExtractionError::new(page, PageErrorKind::Panicked, message)
    } else {
        PageExtractionError::new(page, PageErrorKind::Cancelled, err.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

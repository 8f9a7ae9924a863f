// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The extraction orchestrator.
//
// Init → Classifying → Extracting → Aggregating → {Done | Failed | Cancelled}
//
// Owns the page worker pool, the OCR pool and the result cache. One call to
// `extract` plans the pages, consults the cache, classifies the document,
// feeds the pool one chunk at a time and aggregates whatever came back.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lesewerk_core::config::EngineConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::human_errors::{
    cache_bypassed_warning, ocr_unavailable_warning, page_failure_warning, page_limit_warning,
    table_merge_warning, truncation_warning,
};
use lesewerk_core::types::{
    DocumentClass, ExtractionMetadata, ExtractionMethod, ExtractionOutcome, PageResult, PageTask,
    ProgressStage, QualityReport, RunId, RunStatus, Table, Warning, WarningKind,
};
use lesewerk_document::scan::OcrPreprocessing;
use lesewerk_document::table::merge_continuations;
use lesewerk_document::{Document, DocumentSource, NativeExtractor, TableExtractor};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheManager, CacheStats, Lookup};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::ocr_pool::{OcrPool, OcrStatus, RecognizerFactory, default_factory};
use crate::options::{ExtractionOptions, ResolvedOptions};
use crate::page::RunContext;
use crate::pool::{BufferGauge, PageMessage, WorkerPool};
use crate::progress::{CancellationToken, ProgressReporter};
use crate::retry::RetryConfig;

/// Native-text share at or above which a document counts as native.
const NATIVE_RATIO: f32 = 0.9;
/// Native-text share at or below which a document counts as scanned.
const SCANNED_RATIO: f32 = 0.1;
/// Weight of table accuracy in the overall quality score.
const TABLE_WEIGHT: f32 = 0.2;

/// Runs extractions against shared pools and a shared cache.
pub struct Orchestrator {
    config: EngineConfig,
    pool: WorkerPool,
    ocr: Arc<OcrPool>,
    cache: Arc<CacheManager>,
}

impl Orchestrator {
    /// Build with the recogniser compiled into this build, if any.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let factory = default_factory(&config);
        Self::with_recognizers(config, factory)
    }

    /// Build with an explicit recogniser factory. `None` disables OCR.
    pub fn with_recognizers(config: EngineConfig, recognizers: Option<RecognizerFactory>) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(CacheManager::from_config(&config.cache));
        let ocr = Arc::new(OcrPool::new(
            recognizers,
            config.ocr_workers,
            OcrPreprocessing::default(),
        ));
        Ok(Self {
            pool: WorkerPool::new(config.effective_workers()),
            ocr,
            cache,
            config,
        })
    }

    /// Share `cache` with other orchestrators.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn ocr_status(&self) -> OcrStatus {
        self.ocr.status()
    }

    /// Spawn the page workers. `extract` does this on demand.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Stop the page workers and release the recognisers.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.ocr.shutdown();
    }

    /// Extract text, tables and quality metrics from `document`.
    ///
    /// Only an unusable document (`FatalDocument`) or invalid options
    /// (`InvalidOptions`) are returned as errors; page failures, OCR trouble
    /// and cancellation are reported inside the outcome.
    #[instrument(skip_all, fields(pages = document.page_count(), mode = options.mode.as_str()))]
    pub async fn extract(&self, document: &Document, options: ExtractionOptions) -> Result<ExtractionOutcome> {
        let started = Instant::now();
        let resolved = options.resolve(&self.config)?;
        let total = document.page_count();
        if total == 0 {
            return Err(LesewerkError::FatalDocument("document has no pages".into()));
        }

        let key = fingerprint(document.bytes(), &resolved, &self.config);
        let reporter = ProgressReporter::new(options.on_progress.clone(), resolved.planned_pages(total));
        let cancel = options.cancellation.clone().unwrap_or_default();
        let run = Run {
            document,
            options: &resolved,
            fingerprint: &key,
            cancel: &cancel,
            reporter: &reporter,
        };

        let result = if resolved.cache_enabled {
            self.extract_cached(&run).await
        } else {
            self.execute(&run).await
        };

        match &result {
            Ok(outcome) if outcome.status == RunStatus::Failed => {
                reporter.stage(ProgressStage::Error, Some("no page could be extracted".into()));
            }
            Ok(_) => reporter.stage(ProgressStage::Done, None),
            Err(err) => reporter.stage(ProgressStage::Error, Some(err.to_string())),
        }
        reporter.finish().await;

        result.map(|mut outcome| {
            outcome.metadata.elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                run_id = %outcome.metadata.run_id,
                status = ?outcome.status,
                from_cache = outcome.metadata.from_cache,
                pages = outcome.pages.len(),
                elapsed_ms = outcome.metadata.elapsed_ms,
                "Extraction finished"
            );
            outcome
        })
    }

    async fn extract_cached(&self, run: &Run<'_>) -> Result<ExtractionOutcome> {
        match self.cache.acquire(run.fingerprint).await {
            Lookup::Hit(payload) => match serde_json::from_slice::<ExtractionOutcome>(&payload) {
                Ok(mut outcome) => {
                    debug!(fingerprint = %run.fingerprint, "Cache hit");
                    outcome.metadata.from_cache = true;
                    outcome.metadata.run_id = RunId::new();
                    Ok(outcome)
                }
                Err(err) => {
                    warn!(fingerprint = %run.fingerprint, error = %err, "Unreadable cache entry; recomputing");
                    self.cache.remove(run.fingerprint);
                    let mut outcome = self.execute(run).await?;
                    outcome.quality.warnings.push(cache_bypassed_warning(&err.to_string()));
                    Ok(outcome)
                }
            },
            Lookup::Build(guard) => {
                // An error drops the guard, which hands the build to a waiter.
                let mut outcome = self.execute(run).await?;
                if outcome.status == RunStatus::Cancelled {
                    // Truncated by this caller's token; a waiter builds its own.
                    drop(guard);
                    return Ok(outcome);
                }
                match serde_json::to_vec(&outcome) {
                    Ok(payload) if is_cacheable(&outcome) => {
                        let size = payload.len();
                        if !guard.complete(payload, None) {
                            debug!(size, "Outcome not cached");
                        }
                    }
                    Ok(payload) => {
                        debug!(status = ?outcome.status, "Outcome shared with waiters, not cached");
                        guard.share(payload);
                    }
                    Err(err) => {
                        drop(guard);
                        outcome.quality.warnings.push(cache_bypassed_warning(&err.to_string()));
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// Classify, extract chunk by chunk, aggregate.
    async fn execute(&self, run: &Run<'_>) -> Result<ExtractionOutcome> {
        let run_id = RunId::new();
        let total = run.document.page_count();
        let planned = run.options.planned_pages(total);
        let source = run.document.source();
        let gauge = BufferGauge::default();
        info!(%run_id, total, planned, chunk_size = run.options.chunk_size, "Extraction started");

        run.reporter.stage(ProgressStage::Classifying, None);
        let class = self.classify(&source, planned, &gauge).await;
        if run.options.enable_ocr && class != DocumentClass::Native {
            let ocr = Arc::clone(&self.ocr);
            tokio::spawn(async move {
                if let Err(err) = ocr.warm().await {
                    debug!(error = %err, "OCR warm-up failed");
                }
            });
        }

        let ctx = Arc::new(RunContext {
            source,
            native: NativeExtractor::from_config(&self.config),
            tables: run
                .options
                .enable_tables
                .then(|| TableExtractor::new(self.config.tables.clone())),
            ocr: run.options.enable_ocr.then(|| Arc::clone(&self.ocr)),
            confidence_floor: self.config.confidence_floor,
            page_timeout: self.config.page_timeout(),
            retry: RetryConfig::from_config(&self.config),
            gauge: gauge.clone(),
            cancel: run.cancel.clone(),
        });

        run.reporter.stage(ProgressStage::Extracting, None);
        let mut collected = Collected::default();
        for (index, chunk) in plan_chunks(planned, run.options.chunk_size).into_iter().enumerate() {
            if run.cancel.is_cancelled() {
                debug!(chunk = index, "Cancelled before chunk");
                break;
            }
            let size = chunk.len();
            let messages = self
                .pool
                .run_chunk(&ctx, chunk, |message| match message {
                    PageMessage::Completed(report) => {
                        let stage = match report.result.method {
                            ExtractionMethod::Ocr => ProgressStage::Ocr,
                            ExtractionMethod::Native => ProgressStage::Extracting,
                        };
                        run.reporter.page_done(report.result.page, stage);
                    }
                    PageMessage::Failed(failure) => {
                        run.reporter.page_done(failure.error.page, ProgressStage::Extracting)
                    }
                    PageMessage::Skipped(_) => {}
                })
                .await;
            collected.absorb(messages);
            debug!(chunk = index, pages = size, peak_buffers = gauge.peak(), "Chunk finished");
        }

        run.reporter.stage(ProgressStage::Aggregating, None);
        let summary = RunSummary {
            run_id,
            fingerprint: run.fingerprint.to_string(),
            class,
            options: run.options,
            total,
            planned,
            cancelled: run.cancel.is_cancelled(),
            peak_buffers: gauge.peak(),
        };
        Ok(aggregate(collected, &summary, self.config.tables.merge_threshold))
    }

    /// Estimate native-text density from a spread sample of pages.
    #[instrument(skip_all, fields(planned = planned))]
    async fn classify(&self, source: &Arc<dyn DocumentSource>, planned: u32, gauge: &BufferGauge) -> DocumentClass {
        let sample = sample_pages(planned, self.config.classification_sample);
        if sample.is_empty() {
            return DocumentClass::Mixed;
        }
        let source = Arc::clone(source);
        let gauge = gauge.clone();
        let min_chars = self.config.min_native_chars;

        let counted = tokio::task::spawn_blocking(move || {
            let mut with_text = 0usize;
            for &page in &sample {
                let _buffer = gauge.acquire();
                match source.load_page(page) {
                    Ok(content) if content.char_count() >= min_chars => with_text += 1,
                    Ok(_) => {}
                    Err(err) => debug!(page, error = %err, "Sample page unreadable"),
                }
            }
            (with_text, sample.len())
        })
        .await;

        let class = match counted {
            Ok((with_text, sampled)) => classify_ratio(with_text as f32 / sampled as f32),
            Err(err) => {
                warn!(error = %err, "Classification failed");
                DocumentClass::Mixed
            }
        };
        info!(?class, "Document classified");
        class
    }
}

/// Borrowed inputs of one extraction call.
struct Run<'a> {
    document: &'a Document,
    options: &'a ResolvedOptions,
    fingerprint: &'a Fingerprint,
    cancel: &'a CancellationToken,
    reporter: &'a ProgressReporter,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Pages 1..=planned split into consecutive chunks.
pub fn plan_chunks(planned: u32, chunk_size: usize) -> Vec<Vec<PageTask>> {
    let pages: Vec<u32> = (1..=planned).collect();
    pages
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, chunk)| {
            chunk
                .iter()
                .map(|&page| PageTask::new(page, index as u32))
                .collect()
        })
        .collect()
}

/// Up to `count` pages spread evenly over 1..=planned.
pub fn sample_pages(planned: u32, count: usize) -> Vec<u32> {
    if planned == 0 || count == 0 {
        return Vec::new();
    }
    let count = count as u32;
    if planned <= count {
        return (1..=planned).collect();
    }
    if count == 1 {
        return vec![1];
    }
    let mut pages: Vec<u32> = (0..count)
        .map(|i| 1 + i * (planned - 1) / (count - 1))
        .collect();
    pages.dedup();
    pages
}

pub fn classify_ratio(native_share: f32) -> DocumentClass {
    if native_share >= NATIVE_RATIO {
        DocumentClass::Native
    } else if native_share <= SCANNED_RATIO {
        DocumentClass::Scanned
    } else {
        DocumentClass::Mixed
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Collected {
    pages: Vec<PageResult>,
    warnings: Vec<Warning>,
    ocr_unavailable: Option<String>,
    skipped: usize,
}

impl Collected {
    fn absorb(&mut self, messages: Vec<PageMessage>) {
        for message in messages {
            match message {
                PageMessage::Completed(report) => {
                    self.warnings.extend(report.warnings);
                    if self.ocr_unavailable.is_none() {
                        self.ocr_unavailable = report.ocr_unavailable;
                    }
                    self.pages.push(report.result);
                }
                PageMessage::Failed(failure) => {
                    self.warnings.push(page_failure_warning(&failure.error));
                    self.pages.push(PageResult::failed(failure.error, failure.attempts));
                }
                PageMessage::Skipped(_) => self.skipped += 1,
            }
        }
    }
}

struct RunSummary<'a> {
    run_id: RunId,
    fingerprint: String,
    class: DocumentClass,
    options: &'a ResolvedOptions,
    total: u32,
    planned: u32,
    cancelled: bool,
    peak_buffers: usize,
}

fn aggregate(mut collected: Collected, summary: &RunSummary<'_>, merge_threshold: f32) -> ExtractionOutcome {
    collected.pages.sort_by_key(|page| page.page);
    let pages = collected.pages;
    let processed = pages.len() as u32;
    let succeeded: Vec<&PageResult> = pages.iter().filter(|p| p.succeeded()).collect();

    let text = succeeded
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let page_tables: Vec<Table> = pages.iter().flat_map(|p| p.tables.iter().cloned()).collect();
    let tables = merge_continuations(page_tables, merge_threshold);

    let mut warnings = collected.warnings;
    for table in tables.iter().filter(|t| t.pages.len() > 1) {
        if let Some(merge_confidence) = table.merge_confidence {
            warnings.push(table_merge_warning(&table.pages, merge_confidence));
        }
    }
    if let Some(reason) = &collected.ocr_unavailable {
        warnings.push(ocr_unavailable_warning(reason));
    }
    if summary.planned < summary.total {
        warnings.push(page_limit_warning(summary.planned, summary.total));
    }
    // Cancellation after the last page was taken changes nothing.
    let truncated = summary.cancelled && processed < summary.planned;
    if truncated {
        warnings.push(truncation_warning(processed, summary.planned));
    }

    let status = if truncated {
        RunStatus::Cancelled
    } else if succeeded.is_empty() {
        RunStatus::Failed
    } else {
        RunStatus::Done
    };

    let quality = quality_report(&pages, &tables, summary, warnings);
    let errors = pages.iter().flat_map(|p| p.errors.iter().cloned()).collect();
    let metadata = ExtractionMetadata {
        run_id: summary.run_id,
        fingerprint: summary.fingerprint.clone(),
        document_class: summary.class,
        mode: summary.options.mode,
        from_cache: false,
        total_tables: tables.len(),
        text_length: text.chars().count(),
        peak_page_buffers: summary.peak_buffers,
        elapsed_ms: 0,
        extracted_at: Utc::now(),
    };
    debug!(
        processed,
        succeeded = pages.iter().filter(|p| p.succeeded()).count(),
        skipped = collected.skipped,
        tables = tables.len(),
        "Aggregated run"
    );

    ExtractionOutcome {
        status,
        text,
        pages,
        tables,
        quality,
        errors,
        metadata,
    }
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0, 0u32), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f32)
}

/// Mean page confidence scaled by page coverage, blended with table
/// accuracy when tables were found.
fn quality_report(pages: &[PageResult], tables: &[Table], summary: &RunSummary<'_>, warnings: Vec<Warning>) -> QualityReport {
    let done = || pages.iter().filter(|p| p.succeeded());
    let text_quality = mean(done().map(|p| p.confidence)).unwrap_or(0.0);
    let ocr_quality = mean(
        done()
            .filter(|p| p.method == ExtractionMethod::Ocr)
            .map(|p| p.confidence),
    );
    let table_accuracy = mean(tables.iter().map(|t| t.confidence));

    let coverage = if summary.planned == 0 {
        0.0
    } else {
        done().count() as f32 / summary.planned as f32
    };
    let base = match table_accuracy {
        Some(accuracy) => (1.0 - TABLE_WEIGHT) * text_quality + TABLE_WEIGHT * accuracy,
        None => text_quality,
    };

    QualityReport {
        overall: (base * coverage).clamp(0.0, 1.0),
        text_quality,
        ocr_quality,
        table_accuracy,
        pages_processed: pages.len() as u32,
        total_pages: summary.total,
        warnings,
    }
}

/// Only complete, reproducible outcomes are cached.
fn is_cacheable(outcome: &ExtractionOutcome) -> bool {
    outcome.status == RunStatus::Done
        && !outcome.errors.iter().any(|e| e.is_transient())
        && !outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::OcrUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr_pool::fixtures::fixed_factory;
    use crate::testing::ScriptedSource;
    use image::{DynamicImage, GrayImage, Luma};
    use lesewerk_core::error::PageErrorKind;
    use lesewerk_core::types::{
        BoundingBox, ExtractionMode, LineSegment, ProgressUpdate, TaskState, TextRun,
    };
    use lesewerk_document::{MemoryPage, MemorySource};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            workers: 4,
            retry_base_delay_ms: 1,
            ..EngineConfig::default()
        }
    }

    fn engine() -> Orchestrator {
        Orchestrator::with_recognizers(config(), None).expect("valid config")
    }

    fn full(chunk_size: usize) -> ExtractionOptions {
        ExtractionOptions::new(ExtractionMode::Full).with_chunk_size(chunk_size)
    }

    fn scan() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(60, 80, Luma([235u8])))
    }

    /// A page with a 2-column ruled table: `header` then two data rows.
    fn table_page(header: [&str; 2], rows: [[&str; 2]; 2]) -> MemoryPage {
        let xs = [100.0, 200.0, 300.0];
        let ys = [200.0, 220.0, 240.0, 260.0];
        let mut page = MemoryPage::blank();
        for y in ys {
            page = page.with_segment(LineSegment::new(xs[0], y, xs[2], y));
        }
        for x in xs {
            page = page.with_segment(LineSegment::new(x, ys[0], x, ys[3]));
        }
        let cells = std::iter::once(header).chain(rows);
        for (r, row) in cells.enumerate() {
            for (c, text) in row.iter().enumerate() {
                let (x, y) = (xs[c], ys[r]);
                page = page.with_run(TextRun {
                    text: text.to_string(),
                    bbox: BoundingBox::new(x + 5.0, y + 5.0, x + 60.0, y + 15.0),
                    font_size: 10.0,
                });
            }
        }
        page
    }

    fn recorder() -> (Arc<Mutex<Vec<ProgressUpdate>>>, impl Fn(ProgressUpdate) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |update| sink.lock().expect("lock").push(update))
    }

    // -- Planning ------------------------------------------------------------

    #[test]
    fn twenty_five_pages_in_chunks_of_ten() {
        let chunks = plan_chunks(25, 10);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(chunks[2][0].page, 21);
        assert_eq!(chunks[2][0].chunk, 2);
        assert!(chunks.iter().flatten().all(|t| t.state == TaskState::Pending));
    }

    #[test]
    fn samples_spread_over_document() {
        assert_eq!(sample_pages(3, 5), vec![1, 2, 3]);
        assert_eq!(sample_pages(100, 5), vec![1, 25, 50, 75, 100]);
        assert_eq!(sample_pages(100, 1), vec![1]);
        assert!(sample_pages(10, 0).is_empty());
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify_ratio(1.0), DocumentClass::Native);
        assert_eq!(classify_ratio(0.9), DocumentClass::Native);
        assert_eq!(classify_ratio(0.5), DocumentClass::Mixed);
        assert_eq!(classify_ratio(0.0), DocumentClass::Scanned);
    }

    // -- Runs ----------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pages_come_back_in_order() {
        let engine = engine();
        let document = Document::new(MemorySource::new(b"ordered".to_vec()).with_text_pages(25));
        let outcome = engine.extract(&document, full(10)).await.expect("extracts");

        assert_eq!(outcome.status, RunStatus::Done);
        let pages: Vec<u32> = outcome.pages.iter().map(|p| p.page).collect();
        assert_eq!(pages, (1..=25).collect::<Vec<_>>());
        assert!(outcome.text.starts_with("page 1 carries"));
        assert!(outcome.text.ends_with("page 25 carries enough embedded text to skip recognition"));
        assert_eq!(outcome.metadata.document_class, DocumentClass::Native);
        assert!(outcome.quality.overall > 0.5);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn peak_buffers_stay_within_chunk() {
        let engine = Orchestrator::with_recognizers(
            EngineConfig {
                workers: 8,
                ..config()
            },
            None,
        )
        .expect("valid config");
        let source = ScriptedSource::text_pages(b"bounded", 12).with_delay(Duration::from_millis(10));
        let outcome = engine
            .extract(&Document::new(source), full(3))
            .await
            .expect("extracts");

        assert_eq!(outcome.pages.len(), 12);
        assert!(outcome.metadata.peak_page_buffers >= 1);
        assert!(outcome.metadata.peak_page_buffers <= 3);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ocr_only_runs_below_floor() {
        let (factory, _, calls) = fixed_factory("text recognised from the scan");
        let engine = Orchestrator::with_recognizers(config(), Some(factory)).expect("valid config");
        let source = MemorySource::new(b"mixed".to_vec())
            .with_text_pages(2)
            .with_page(MemoryPage::blank().with_image(scan()))
            .with_page(MemoryPage::blank().with_text("short").with_image(scan()));
        let outcome = engine
            .extract(&Document::new(source), full(10))
            .await
            .expect("extracts");

        let floor = engine.config().native_confidence_floor;
        for page in &outcome.pages {
            if page.method == ExtractionMethod::Ocr {
                assert!(page.native_confidence < floor, "page {} escalated", page.page);
            }
        }
        let ocr_pages: Vec<u32> = outcome
            .pages
            .iter()
            .filter(|p| p.method == ExtractionMethod::Ocr)
            .map(|p| p.page)
            .collect();
        assert_eq!(ocr_pages, vec![3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.metadata.document_class, DocumentClass::Mixed);
        assert!(outcome.quality.ocr_quality.is_some());
        assert!(matches!(engine.ocr_status(), OcrStatus::Ready { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn blank_page_without_ocr_is_degraded() {
        let engine = engine();
        let source = MemorySource::new(b"degraded".to_vec())
            .with_text_pages(1)
            .with_page(MemoryPage::blank());
        let options = ExtractionOptions::default().with_ocr(false);
        let outcome = engine
            .extract(&Document::new(source), options)
            .await
            .expect("extracts");

        assert_eq!(outcome.status, RunStatus::Done);
        let blank = &outcome.pages[1];
        assert_eq!(blank.method, ExtractionMethod::Native);
        assert_eq!(blank.confidence, engine.config().confidence_floor);
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::DegradedPage && w.page == Some(2)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn missing_ocr_backend_warns_once_and_is_not_cached() {
        let engine = engine();
        let source = MemorySource::new(b"scanned".to_vec())
            .with_page(MemoryPage::blank().with_image(scan()))
            .with_page(MemoryPage::blank().with_image(scan()));
        let outcome = engine
            .extract(&Document::new(source), ExtractionOptions::default())
            .await
            .expect("extracts");

        assert_eq!(outcome.metadata.document_class, DocumentClass::Scanned);
        let unavailable = outcome
            .quality
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::OcrUnavailable)
            .count();
        assert_eq!(unavailable, 1);
        assert!(matches!(engine.ocr_status(), OcrStatus::Unavailable { .. }));
        assert_eq!(engine.cache_stats().entries, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn all_pages_failing_is_failed_not_error() {
        let engine = engine();
        let source = MemorySource::new(b"broken".to_vec())
            .with_page(MemoryPage::blank().failing(PageErrorKind::Parse, "bad stream"))
            .with_page(MemoryPage::blank().failing(PageErrorKind::Parse, "bad stream"));
        let outcome = engine
            .extract(&Document::new(source), full(5))
            .await
            .expect("page failures are not fatal");

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.quality.overall, 0.0);
        assert_eq!(engine.cache_stats().entries, 0);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_page_does_not_abort_run() {
        let engine = engine();
        let source = ScriptedSource::text_pages(b"panics", 3).panicking_on(2);
        let outcome = engine
            .extract(&Document::new(source), full(10))
            .await
            .expect("extracts");

        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.succeeded_pages(), 2);
        assert_eq!(outcome.pages[1].state, TaskState::Failed);
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PageFailed && w.page == Some(2)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn empty_document_is_fatal() {
        let engine = engine();
        let err = engine
            .extract(&Document::new(MemorySource::new(b"empty".to_vec())), full(5))
            .await
            .expect_err("no pages");
        assert!(matches!(err, LesewerkError::FatalDocument(_)));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_any_work() {
        let engine = engine();
        let source = ScriptedSource::text_pages(b"invalid", 3);
        let loads = source.loads();
        let err = engine
            .extract(&Document::new(source), full(0))
            .await
            .expect_err("chunk size 0");
        assert!(matches!(err, LesewerkError::InvalidOptions(_)));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preview_caps_pages_with_warning() {
        let engine = engine();
        let document = Document::new(MemorySource::new(b"long".to_vec()).with_text_pages(8));
        let outcome = engine
            .extract(&document, ExtractionOptions::new(ExtractionMode::Preview))
            .await
            .expect("extracts");

        assert_eq!(outcome.pages.len(), 5);
        assert_eq!(outcome.quality.total_pages, 8);
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PageLimit));
        engine.shutdown().await;
    }

    // -- Tables --------------------------------------------------------------

    #[tokio::test]
    async fn matching_headers_merge_across_pages() {
        let engine = engine();
        let source = MemorySource::new(b"invoice".to_vec())
            .with_page(table_page(["Item", "Amount"], [["Paper", "12"], ["Toner", "80"]]))
            .with_page(table_page(["Item", "Amount"], [["Staples", "3"], ["Folders", "9"]]));
        let outcome = engine
            .extract(&Document::new(source), full(10).with_ocr(false))
            .await
            .expect("extracts");

        assert_eq!(outcome.tables.len(), 1);
        let table = &outcome.tables[0];
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.pages, vec![1, 2]);
        assert_eq!(outcome.pages[0].tables.len(), 1);
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::TableMerged));
        assert!(outcome.quality.table_accuracy.is_some());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn differing_headers_stay_separate() {
        let engine = engine();
        let source = MemorySource::new(b"ledger".to_vec())
            .with_page(table_page(["Item", "Amount"], [["Paper", "12"], ["Toner", "80"]]))
            .with_page(table_page(["Date", "Reference"], [["May", "A1"], ["June", "B2"]]));
        let outcome = engine
            .extract(&Document::new(source), full(10).with_ocr(false))
            .await
            .expect("extracts");

        assert_eq!(outcome.tables.len(), 2);
        assert!(outcome.tables.iter().all(|t| t.merge_confidence.is_none()));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_tables_are_not_detected() {
        let engine = engine();
        let source = MemorySource::new(b"no-tables".to_vec())
            .with_page(table_page(["Item", "Amount"], [["Paper", "12"], ["Toner", "80"]]));
        let outcome = engine
            .extract(&Document::new(source), full(10).with_tables(false))
            .await
            .expect("extracts");
        assert!(outcome.tables.is_empty());
        engine.shutdown().await;
    }

    // -- Cache ---------------------------------------------------------------

    #[tokio::test]
    async fn second_identical_call_is_a_single_hit() {
        let engine = engine();
        let document = Document::new(MemorySource::new(b"cached".to_vec()).with_text_pages(3));

        let first = engine.extract(&document, full(2)).await.expect("extracts");
        assert!(!first.metadata.from_cache);
        let before = engine.cache_stats();

        let (seen, callback) = recorder();
        let second = engine
            .extract(&document, full(2).on_progress(callback))
            .await
            .expect("extracts");
        let after = engine.cache_stats();

        assert!(second.metadata.from_cache);
        assert_eq!(second.text, first.text);
        assert_eq!(second.metadata.fingerprint, first.metadata.fingerprint);
        assert_eq!(after.hits, before.hits + 1);
        assert_eq!(after.misses, before.misses);

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].stage, ProgressStage::Done);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn cache_can_be_bypassed() {
        let engine = engine();
        let document = Document::new(MemorySource::new(b"uncached".to_vec()).with_text_pages(2));
        for _ in 0..2 {
            let outcome = engine
                .extract(&document, full(2).with_cache(false))
                .await
                .expect("extracts");
            assert!(!outcome.metadata.from_cache);
        }
        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (0, 0, 0));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_requests_compute_once() {
        let scripted = || ScriptedSource::text_pages(b"shared", 6).with_delay(Duration::from_millis(20));

        let baseline_source = scripted();
        let baseline_loads = baseline_source.loads();
        let baseline = engine();
        baseline
            .extract(&Document::new(baseline_source), full(3))
            .await
            .expect("extracts");
        let one_run = baseline_loads.load(Ordering::SeqCst);
        baseline.shutdown().await;

        let source = scripted();
        let loads = source.loads();
        let document = Document::new(source);
        let engine = Arc::new(engine());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = Arc::clone(&engine);
            let document = document.clone();
            handles.push(tokio::spawn(async move {
                engine.extract(&document, full(3)).await.expect("extracts")
            }));
        }
        let mut texts = Vec::new();
        for handle in handles {
            texts.push(handle.await.expect("join").text);
        }

        assert!(texts.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(loads.load(Ordering::SeqCst), one_run);
        let stats = engine.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 4);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uncacheable_requests_compute_once() {
        let scanned = || {
            ScriptedSource::new(
                MemorySource::new(b"scanned-shared".to_vec())
                    .with_page(MemoryPage::blank().with_image(scan()))
                    .with_page(MemoryPage::blank().with_image(scan())),
            )
            .with_delay(Duration::from_millis(30))
        };

        let baseline_source = scanned();
        let baseline_loads = baseline_source.loads();
        let baseline = engine();
        baseline
            .extract(&Document::new(baseline_source), full(2))
            .await
            .expect("extracts");
        let one_run = baseline_loads.load(Ordering::SeqCst);
        baseline.shutdown().await;

        let source = scanned();
        let loads = source.loads();
        let document = Document::new(source);
        let engine = Arc::new(engine());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = Arc::clone(&engine);
            let document = document.clone();
            handles.push(tokio::spawn(async move {
                engine.extract(&document, full(2)).await.expect("extracts")
            }));
        }
        for handle in handles {
            let outcome = handle.await.expect("join");
            assert!(outcome
                .quality
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::OcrUnavailable));
        }

        assert_eq!(loads.load(Ordering::SeqCst), one_run);
        let stats = engine.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 4);
        assert_eq!(stats.entries, 0);
        engine.shutdown().await;
    }

    // -- Progress and cancellation -------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn progress_covers_every_page_and_stage() {
        let engine = engine();
        let (seen, callback) = recorder();
        let document = Document::new(MemorySource::new(b"progress".to_vec()).with_text_pages(6));
        engine
            .extract(&document, full(4).on_progress(callback))
            .await
            .expect("extracts");

        let seen = seen.lock().expect("lock");
        let mut pages: Vec<u32> = seen.iter().filter_map(|u| u.current_page).collect();
        pages.sort_unstable();
        assert_eq!(pages, (1..=6).collect::<Vec<_>>());

        let stages: Vec<ProgressStage> = seen
            .iter()
            .filter(|u| u.current_page.is_none())
            .map(|u| u.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                ProgressStage::Classifying,
                ProgressStage::Extracting,
                ProgressStage::Aggregating,
                ProgressStage::Done
            ]
        );
        assert_eq!(seen.last().map(|u| u.pages_done), Some(6));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_stops_at_chunk_boundary() {
        let engine = Orchestrator::with_recognizers(
            EngineConfig {
                classification_sample: 1,
                ..config()
            },
            None,
        )
        .expect("valid config");
        let token = CancellationToken::new();
        let source = ScriptedSource::text_pages(b"cancelled", 20).cancelling_on(5, token.clone());
        let options = full(5).with_cancellation(token);

        let outcome = engine
            .extract(&Document::new(source), options)
            .await
            .expect("partial outcome");

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(outcome.is_partial());
        let pages: Vec<u32> = outcome.pages.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::Truncated && w.message.contains("after 5 of 20 pages")));
        assert_eq!(engine.cache_stats().entries, 0);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_inside_chunk_finishes_started_pages() {
        let engine = Orchestrator::with_recognizers(
            EngineConfig {
                workers: 2,
                classification_sample: 1,
                ..config()
            },
            None,
        )
        .expect("valid config");
        let token = CancellationToken::new();
        let source = ScriptedSource::text_pages(b"in-chunk", 10)
            .stalling_on(1, Duration::from_millis(100))
            .cancelling_on(2, token.clone());
        let options = full(10).with_cancellation(token);

        let outcome = engine
            .extract(&Document::new(source), options)
            .await
            .expect("partial outcome");

        assert_eq!(outcome.status, RunStatus::Cancelled);
        let pages: Vec<u32> = outcome.pages.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2]);
        assert!(outcome.pages.iter().all(|p| p.state == TaskState::Done));
        assert!(outcome
            .quality
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::Truncated && w.message.contains("after 2 of 10 pages")));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_before_start_processes_nothing() {
        let engine = engine();
        let token = CancellationToken::new();
        token.cancel();
        let document = Document::new(MemorySource::new(b"early".to_vec()).with_text_pages(4));
        let outcome = engine
            .extract(&document, full(2).with_cancellation(token))
            .await
            .expect("partial outcome");
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(outcome.pages.is_empty());
        engine.shutdown().await;
    }
}

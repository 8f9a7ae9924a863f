// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-engine — Extraction orchestration for Lesewerk.
//
// Plans a document into bounded chunks of page tasks, runs them on a shared
// worker pool with per-page timeouts and retries, routes weak pages to a
// pooled OCR backend, and caches finished outcomes by content fingerprint.

pub mod cache;
pub mod fingerprint;
pub mod ocr_pool;
pub mod options;
pub mod orchestrator;
pub mod page;
pub mod pool;
pub mod progress;
pub mod render;
pub mod retry;

#[cfg(test)]
mod testing;

pub use cache::{CacheManager, CacheStats};
pub use fingerprint::Fingerprint;
pub use ocr_pool::{OcrPool, OcrStatus, RecognizerFactory};
pub use options::ExtractionOptions;
pub use orchestrator::Orchestrator;
pub use progress::{CancellationToken, ProgressCallback, ProgressReporter};

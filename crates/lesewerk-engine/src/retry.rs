// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page retry policy with exponential backoff + jitter.
//
// Classifies errors into Transient (auto-retry), UserAction (caller must
// change something), and Permanent (give up). Only transient page failures
// are retried, and only a bounded number of times.

use std::time::Duration;

use lesewerk_core::config::EngineConfig;
use lesewerk_core::error::{PageErrorKind, PageExtractionError};
use lesewerk_core::types::ErrorClass;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_page_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            ..Self::default()
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry; the error is permanent or needs the caller.
    GiveUp(ErrorClass),
    /// Maximum retries exhausted.
    Exhausted,
}

/// Classify a page failure.
pub fn classify_page_error(kind: PageErrorKind) -> ErrorClass {
    match kind {
        PageErrorKind::Load | PageErrorKind::Timeout => ErrorClass::Transient,
        PageErrorKind::Ocr => ErrorClass::UserAction,
        PageErrorKind::Parse | PageErrorKind::Panicked | PageErrorKind::Cancelled => {
            ErrorClass::Permanent
        }
    }
}

/// Decide whether to retry a page after `attempt` failed attempts.
pub fn should_retry(err: &PageExtractionError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_page_error(err.kind) {
        ErrorClass::Transient => {
            if attempt > config.max_retries {
                warn!(page = err.page, attempt, max = config.max_retries, "Page retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config);
                debug!(page = err.page, attempt, delay_ms = delay.as_millis() as u64, "Scheduling page retry");
                RetryDecision::RetryAfter(delay)
            }
        }
        class => RetryDecision::GiveUp(class),
    }
}

/// delay = min(base * 2^(attempt-1) + jitter, max_delay), jitter in [0, base).
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

/// Deterministic spread over [0, base) from the attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-run extraction options and their resolution against the engine
// configuration.

use std::fmt;
use std::sync::Arc;

use lesewerk_core::config::EngineConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::types::{ExtractionMode, ProgressUpdate};

use crate::progress::{CancellationToken, ProgressCallback};

/// Default number of pages per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1024;

/// What the caller asks of one extraction run.
#[derive(Clone)]
pub struct ExtractionOptions {
    pub mode: ExtractionMode,
    /// Page cap. `None` or `Some(0)` means "whatever the mode allows".
    pub max_pages: Option<u32>,
    pub enable_ocr: bool,
    pub enable_tables: bool,
    /// Pages processed per chunk; bounds how many pages are in memory.
    pub chunk_size: usize,
    pub cache_enabled: bool,
    pub on_progress: Option<ProgressCallback>,
    pub cancellation: Option<CancellationToken>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Standard,
            max_pages: None,
            enable_ocr: true,
            enable_tables: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_enabled: true,
            on_progress: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for ExtractionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionOptions")
            .field("mode", &self.mode)
            .field("max_pages", &self.max_pages)
            .field("enable_ocr", &self.enable_ocr)
            .field("enable_tables", &self.enable_tables)
            .field("chunk_size", &self.chunk_size)
            .field("cache_enabled", &self.cache_enabled)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl ExtractionOptions {
    pub fn new(mode: ExtractionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_ocr(mut self, enabled: bool) -> Self {
        self.enable_ocr = enabled;
        self
    }

    pub fn with_tables(mut self, enabled: bool) -> Self {
        self.enable_tables = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Apply the mode preset and validate.
    ///
    /// Preview caps pages at `preview_max_pages` and never runs OCR. Standard
    /// caps at `standard_max_pages`. Full has no cap of its own. In every
    /// mode a non-zero `max_pages` can only lower the cap; Custom takes
    /// `max_pages` as given.
    pub fn resolve(&self, config: &EngineConfig) -> Result<ResolvedOptions> {
        if self.chunk_size == 0 {
            return Err(LesewerkError::InvalidOptions(
                "chunk_size must be at least 1".into(),
            ));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(LesewerkError::InvalidOptions(format!(
                "chunk_size {} exceeds the maximum of {MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }

        let requested = self.max_pages.filter(|&n| n > 0);
        let mode_cap = match self.mode {
            ExtractionMode::Preview => Some(clamp_u32(config.preview_max_pages)),
            ExtractionMode::Standard => Some(clamp_u32(config.standard_max_pages)),
            ExtractionMode::Full | ExtractionMode::Custom => None,
        };
        let page_cap = match (mode_cap, requested) {
            (Some(cap), Some(req)) => Some(cap.min(req)),
            (cap, req) => cap.or(req),
        };

        Ok(ResolvedOptions {
            mode: self.mode,
            page_cap,
            enable_ocr: self.enable_ocr && self.mode != ExtractionMode::Preview,
            enable_tables: self.enable_tables,
            chunk_size: self.chunk_size,
            cache_enabled: self.cache_enabled,
        })
    }
}

fn clamp_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Options after the mode preset has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub mode: ExtractionMode,
    /// `None` processes every page.
    pub page_cap: Option<u32>,
    pub enable_ocr: bool,
    pub enable_tables: bool,
    pub chunk_size: usize,
    pub cache_enabled: bool,
}

impl ResolvedOptions {
    /// Pages a run over a `total`-page document will plan.
    pub fn planned_pages(&self, total: u32) -> u32 {
        self.page_cap.map_or(total, |cap| cap.min(total))
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted document source and run fixtures shared by the engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::DynamicImage;
use lesewerk_core::config::TableConfig;
use lesewerk_core::error::Result;
use lesewerk_document::{DocumentSource, MemorySource, NativeExtractor, PageContent, TableExtractor};

use crate::page::RunContext;
use crate::pool::BufferGauge;
use crate::progress::CancellationToken;
use crate::retry::RetryConfig;

/// A [`MemorySource`] with per-page misbehaviour.
pub struct ScriptedSource {
    inner: MemorySource,
    loads: Arc<AtomicUsize>,
    delay: Duration,
    panic_on: Option<u32>,
    stall_on: Option<(u32, Duration)>,
    cancel_on: Option<(u32, CancellationToken)>,
}

impl ScriptedSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            loads: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            panic_on: None,
            stall_on: None,
            cancel_on: None,
        }
    }

    /// `count` text pages identified by `bytes`.
    pub fn text_pages(bytes: &[u8], count: u32) -> Self {
        Self::new(MemorySource::new(bytes.to_vec()).with_text_pages(count))
    }

    /// Sleep this long in every load.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn panicking_on(mut self, page: u32) -> Self {
        self.panic_on = Some(page);
        self
    }

    pub fn stalling_on(mut self, page: u32, stall: Duration) -> Self {
        self.stall_on = Some((page, stall));
        self
    }

    /// Cancel `token` while loading `page`.
    pub fn cancelling_on(mut self, page: u32, token: CancellationToken) -> Self {
        self.cancel_on = Some((page, token));
        self
    }

    /// Shared counter of `load_page` calls.
    pub fn loads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl DocumentSource for ScriptedSource {
    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn bytes(&self) -> &[u8] {
        self.inner.bytes()
    }

    fn load_page(&self, page: u32) -> Result<PageContent> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_on == Some(page) {
            panic!("scripted panic on page {page}");
        }
        if let Some((stall_page, stall)) = self.stall_on {
            if stall_page == page {
                std::thread::sleep(stall);
            }
        }
        if let Some((cancel_page, token)) = &self.cancel_on {
            if *cancel_page == page {
                token.cancel();
            }
        }
        self.inner.load_page(page)
    }

    fn render_page(&self, page: u32) -> Result<Option<DynamicImage>> {
        self.inner.render_page(page)
    }
}

/// A run context over `source` with no OCR and quick retries.
pub fn run_context(source: impl DocumentSource + 'static, cancel: CancellationToken) -> RunContext {
    RunContext {
        source: Arc::new(source),
        native: NativeExtractor::new(20, 0.5),
        tables: Some(TableExtractor::new(TableConfig::default())),
        ocr: None,
        confidence_floor: 0.1,
        page_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        gauge: BufferGauge::default(),
        cancel,
    }
}

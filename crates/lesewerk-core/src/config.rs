// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.
//
// Loaded from TOML or JSON, then optionally overridden by `LESEWERK_*`
// environment variables. Every field has a default so partial files work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LesewerkError, Result};

/// Tunables for the whole extraction engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Page workers. 0 means "available parallelism".
    pub workers: usize,
    /// OCR workers; kept small because recognisers are memory-heavy.
    pub ocr_workers: usize,
    /// Per-page timeout in milliseconds.
    pub page_timeout_ms: u64,
    /// Retries after a transient page failure (timeout, flaky read).
    pub max_page_retries: u32,
    /// Base delay for retry backoff in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Native text shorter than this escalates to OCR.
    pub min_native_chars: usize,
    /// Native confidence below this escalates to OCR.
    pub native_confidence_floor: f32,
    /// Confidence reported for pages that stayed degraded.
    pub confidence_floor: f32,
    /// Pages sampled when classifying a document.
    pub classification_sample: usize,
    /// Page cap applied in preview mode.
    pub preview_max_pages: usize,
    /// Page cap applied in standard mode.
    pub standard_max_pages: usize,
    pub cache: CacheConfig,
    pub tables: TableConfig,
    pub ocr: OcrSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            ocr_workers: 2,
            page_timeout_ms: 30_000,
            max_page_retries: 1,
            retry_base_delay_ms: 50,
            min_native_chars: 20,
            native_confidence_floor: 0.5,
            confidence_floor: 0.1,
            classification_sample: 5,
            preview_max_pages: 5,
            standard_max_pages: 50,
            cache: CacheConfig::default(),
            tables: TableConfig::default(),
            ocr: OcrSettings::default(),
        }
    }
}

/// Result cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on resident payload bytes.
    pub capacity_bytes: usize,
    /// Time-to-live for new entries, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024,
            ttl_secs: 3600,
        }
    }
}

/// Geometric tolerances for table detection and continuation merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Max orthogonal delta for a segment to count as horizontal/vertical.
    pub axis_tolerance: f32,
    /// Ruling positions closer than this collapse into one boundary.
    pub snap_tolerance: f32,
    /// Gaps smaller than this are treated as double rules, not cells.
    pub min_cell_size: f32,
    /// Relative deviation from the median gap still counted as consistent.
    pub spacing_tolerance: f32,
    /// Header similarity required to merge a continuation, 0.0..=1.0.
    pub merge_threshold: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            axis_tolerance: 1.0,
            snap_tolerance: 2.0,
            min_cell_size: 4.0,
            spacing_tolerance: 0.35,
            merge_threshold: 0.9,
        }
    }
}

/// Where OCR models live.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Directory holding `text-detection.rten` and `text-recognition.rten`.
    /// `None` uses the recogniser's default cache directory.
    pub model_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| LesewerkError::Config(format!("{}: {e}", path.display())))?,
            _ => {
                return Err(LesewerkError::Config(format!(
                    "unsupported config format for {}; use .toml or .json",
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LesewerkError::Config(e.to_string()))
    }

    /// Apply `LESEWERK_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| LesewerkError::Config(format!("{key}: cannot parse {raw:?}")))
        }

        if let Some(v) = lookup("LESEWERK_WORKERS") {
            self.workers = parse("LESEWERK_WORKERS", v)?;
        }
        if let Some(v) = lookup("LESEWERK_OCR_WORKERS") {
            self.ocr_workers = parse("LESEWERK_OCR_WORKERS", v)?;
        }
        if let Some(v) = lookup("LESEWERK_PAGE_TIMEOUT_MS") {
            self.page_timeout_ms = parse("LESEWERK_PAGE_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("LESEWERK_CACHE_CAPACITY_BYTES") {
            self.cache.capacity_bytes = parse("LESEWERK_CACHE_CAPACITY_BYTES", v)?;
        }
        if let Some(v) = lookup("LESEWERK_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse("LESEWERK_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("LESEWERK_OCR_MODEL_DIR") {
            self.ocr.model_dir = Some(PathBuf::from(v));
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(LesewerkError::Config(format!("{name} must be within 0..=1, got {v}")))
            }
        };
        unit("native_confidence_floor", self.native_confidence_floor)?;
        unit("confidence_floor", self.confidence_floor)?;
        unit("tables.merge_threshold", self.tables.merge_threshold)?;

        if self.ocr_workers == 0 {
            return Err(LesewerkError::Config("ocr_workers must be at least 1".into()));
        }
        if self.page_timeout_ms == 0 {
            return Err(LesewerkError::Config("page_timeout_ms must be positive".into()));
        }
        if self.tables.axis_tolerance < 0.0 || self.tables.snap_tolerance < 0.0 {
            return Err(LesewerkError::Config("table tolerances must not be negative".into()));
        }
        Ok(())
    }

    /// Page workers after resolving `0` to the machine's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

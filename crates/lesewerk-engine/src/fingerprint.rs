// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document fingerprints — SHA-256 over the normalised document bytes plus
// every option and engine setting that changes the outcome.

use std::fmt;

use lesewerk_core::config::EngineConfig;
use sha2::{Digest, Sha256};

use crate::options::ResolvedOptions;

/// Bumped whenever the outcome format changes, so old cache entries miss.
const FINGERPRINT_VERSION: &[u8] = b"lesewerk-outcome-v1";

/// Cache key for one (document, options) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip trailing whitespace and NUL padding.
///
/// Writers pad files differently after `%%EOF`; the padding carries no
/// content and must not split the cache.
pub fn normalize(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Fingerprint `bytes` under the effective run options and the engine
/// settings that shape the outcome.
///
/// Chunk size, worker counts, timeouts and the cache switch do not affect
/// the outcome and are not part of the key.
pub fn fingerprint(bytes: &[u8], options: &ResolvedOptions, config: &EngineConfig) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION);
    hasher.update([0]);
    hasher.update(normalize(bytes));
    hasher.update([0]);
    hasher.update(options.mode.as_str().as_bytes());
    hasher.update([options.enable_ocr as u8, options.enable_tables as u8]);
    // 0 stands for "no cap".
    hasher.update(options.page_cap.unwrap_or(0).to_le_bytes());
    hash_settings(&mut hasher, config);
    Fingerprint(hex::encode(hasher.finalize()))
}

fn hash_settings(hasher: &mut Sha256, config: &EngineConfig) {
    hasher.update((config.min_native_chars as u64).to_le_bytes());
    let tables = &config.tables;
    for value in [
        config.native_confidence_floor,
        config.confidence_floor,
        tables.axis_tolerance,
        tables.snap_tolerance,
        tables.min_cell_size,
        tables.spacing_tolerance,
        tables.merge_threshold,
    ] {
        hasher.update(value.to_bits().to_le_bytes());
    }
    if let Some(dir) = &config.ocr.model_dir {
        hasher.update(dir.to_string_lossy().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_core::types::ExtractionMode;

    fn keyed(bytes: &[u8], options: &ResolvedOptions) -> Fingerprint {
        fingerprint(bytes, options, &EngineConfig::default())
    }

    fn options(mode: ExtractionMode, enable_ocr: bool, page_cap: Option<u32>) -> ResolvedOptions {
        ResolvedOptions {
            mode,
            page_cap,
            enable_ocr,
            enable_tables: true,
            chunk_size: 10,
            cache_enabled: true,
        }
    }

    #[test]
    fn trailing_padding_is_ignored() {
        assert_eq!(normalize(b"%PDF-1.7\n%%EOF\r\n\0\0 "), b"%PDF-1.7\n%%EOF");
        assert_eq!(normalize(b"\n\0 "), b"");

        let opts = options(ExtractionMode::Standard, true, Some(50));
        assert_eq!(
            keyed(b"%PDF body%%EOF", &opts),
            keyed(b"%PDF body%%EOF\n\n\0", &opts)
        );
    }

    #[test]
    fn same_inputs_give_same_fingerprint() {
        let opts = options(ExtractionMode::Full, true, None);
        let a = keyed(b"document", &opts);
        let b = keyed(b"document", &opts.clone());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn outcome_relevant_options_change_fingerprint() {
        let base = options(ExtractionMode::Standard, true, Some(50));
        let key = keyed(b"document", &base);

        assert_ne!(key, keyed(b"document!", &base));
        assert_ne!(key, keyed(b"document", &options(ExtractionMode::Full, true, Some(50))));
        assert_ne!(key, keyed(b"document", &options(ExtractionMode::Standard, false, Some(50))));
        assert_ne!(key, keyed(b"document", &options(ExtractionMode::Standard, true, Some(5))));

        let mut no_tables = base.clone();
        no_tables.enable_tables = false;
        assert_ne!(key, keyed(b"document", &no_tables));
    }

    #[test]
    fn chunk_size_and_cache_switch_do_not_change_fingerprint() {
        let base = options(ExtractionMode::Standard, true, Some(50));
        let mut other = base.clone();
        other.chunk_size = 3;
        other.cache_enabled = false;
        assert_eq!(keyed(b"document", &base), keyed(b"document", &other));
    }

    #[test]
    fn outcome_relevant_settings_change_fingerprint() {
        let opts = options(ExtractionMode::Standard, true, Some(50));
        let base = EngineConfig::default();
        let reference = fingerprint(b"document", &opts, &base);

        let variants = [
            EngineConfig { min_native_chars: 40, ..base.clone() },
            EngineConfig { native_confidence_floor: 0.6, ..base.clone() },
            EngineConfig { confidence_floor: 0.2, ..base.clone() },
        ];
        for config in &variants {
            assert_ne!(reference, fingerprint(b"document", &opts, config));
        }

        let mut stricter_merge = base.clone();
        stricter_merge.tables.merge_threshold = 0.99;
        assert_ne!(reference, fingerprint(b"document", &opts, &stricter_merge));

        let tuning_only = EngineConfig {
            workers: 16,
            page_timeout_ms: 1_000,
            ..base.clone()
        };
        assert_eq!(reference, fingerprint(b"document", &opts, &tuning_only));
    }
}

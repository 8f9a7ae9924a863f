// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native text extraction — reading-order reconstruction from positioned runs
// and the confidence score that decides whether a page needs OCR.

use lesewerk_core::config::EngineConfig;
use lesewerk_core::types::TextRun;
use tracing::debug;

use crate::source::PageContent;

/// Text recovered from a page's embedded content.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeText {
    pub text: String,
    /// Non-whitespace characters in `text`.
    pub char_count: usize,
    /// Share of meaningful characters, 0.0..=1.0.
    pub quality: f32,
    /// Confidence used for OCR routing, 0.0..=1.0.
    pub confidence: f32,
}

/// Builds [`NativeText`] and decides OCR escalation.
#[derive(Debug, Clone, Copy)]
pub struct NativeExtractor {
    min_chars: usize,
    confidence_floor: f32,
}

impl NativeExtractor {
    pub fn new(min_chars: usize, confidence_floor: f32) -> Self {
        Self {
            min_chars,
            confidence_floor,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.min_native_chars, config.native_confidence_floor)
    }

    pub fn extract(&self, page: &PageContent) -> NativeText {
        let text = reading_order(&page.text_runs);
        let char_count = text.chars().filter(|c| !c.is_whitespace()).count();
        let quality = text_quality(&text);
        let confidence = self.confidence(char_count, quality);
        debug!(page = page.number, char_count, quality, confidence, "Native text extracted");
        NativeText {
            text,
            char_count,
            quality,
            confidence,
        }
    }

    /// Quality, scaled strictly below the floor when the text is too short.
    fn confidence(&self, char_count: usize, quality: f32) -> f32 {
        if char_count >= self.min_chars {
            return quality;
        }
        let coverage = char_count as f32 / self.min_chars as f32;
        // Strictly below the floor even at full quality.
        self.confidence_floor * coverage * quality * 0.99
    }

    /// Whether the native result is too weak to keep without recognition.
    pub fn needs_ocr(&self, native: &NativeText) -> bool {
        native.char_count < self.min_chars || native.confidence < self.confidence_floor
    }
}

/// Join runs into lines top to bottom, left to right within a line.
///
/// Runs whose vertical extents overlap by at least half the smaller height
/// share a line.
pub fn reading_order(runs: &[TextRun]) -> String {
    let mut sorted: Vec<&TextRun> = runs.iter().filter(|r| !r.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0).then(a.bbox.x0.total_cmp(&b.bbox.x0)));

    let mut lines: Vec<Vec<&TextRun>> = Vec::new();
    for run in sorted {
        match lines.last_mut() {
            Some(line) if same_line(line[0], run) => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            line.iter()
                .map(|r| r.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn same_line(anchor: &TextRun, run: &TextRun) -> bool {
    let overlap = anchor.bbox.y1.min(run.bbox.y1) - anchor.bbox.y0.max(run.bbox.y0);
    let smaller = anchor.bbox.height().min(run.bbox.height()).max(f32::EPSILON);
    overlap >= smaller * 0.5
}

/// Ratio of meaningful characters, penalising symbol soup.
///
/// Letters, digits, and whitespace count as meaningful. Up to half the score
/// is lost to punctuation and symbols.
pub fn text_quality(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let total = total as f32;
    let meaningful = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count() as f32;
    let replacement = text.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count() as f32;
    let special = total - meaningful;

    let quality = (meaningful - replacement).max(0.0) / total * (1.0 - (special / total).min(0.5));
    quality.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_core::types::BoundingBox;

    fn run(text: &str, x: f32, y: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            bbox: BoundingBox::new(x, y, x + text.len() as f32 * 5.0, y + 10.0),
            font_size: 10.0,
        }
    }

    #[test]
    fn runs_are_ordered_by_line_then_x() {
        let runs = vec![
            run("world", 80.0, 100.0),
            run("second", 10.0, 130.0),
            run("hello", 10.0, 101.0),
        ];
        assert_eq!(reading_order(&runs), "hello world\nsecond");
    }

    #[test]
    fn quality_prefers_prose_over_symbols() {
        assert_eq!(text_quality(""), 0.0);
        assert_eq!(text_quality("plain words 2024"), 1.0);
        assert!(text_quality("%%$#@!&*") < 0.1);
        assert!(text_quality("Total: 12.50") > 0.6);
    }

    #[test]
    fn short_text_scores_below_floor() {
        let extractor = NativeExtractor::new(20, 0.5);
        let page = PageContent {
            text_runs: vec![run("Page 7", 10.0, 10.0)],
            ..PageContent::new(7, 612.0, 792.0)
        };
        let native = extractor.extract(&page);
        assert_eq!(native.char_count, 5);
        assert!(native.confidence < 0.5);
        assert!(extractor.needs_ocr(&native));
    }

    #[test]
    fn long_clean_text_stays_native() {
        let extractor = NativeExtractor::new(20, 0.5);
        let page = PageContent {
            text_runs: vec![run("The quarterly report covers every region in detail", 10.0, 10.0)],
            ..PageContent::new(1, 612.0, 792.0)
        };
        let native = extractor.extract(&page);
        assert_eq!(native.confidence, 1.0);
        assert!(!extractor.needs_ocr(&native));
    }

    #[test]
    fn empty_page_has_zero_confidence() {
        let extractor = NativeExtractor::new(20, 0.5);
        let native = extractor.extract(&PageContent::new(3, 612.0, 792.0));
        assert_eq!(native.text, "");
        assert_eq!(native.confidence, 0.0);
        assert!(extractor.needs_ocr(&native));
    }
}

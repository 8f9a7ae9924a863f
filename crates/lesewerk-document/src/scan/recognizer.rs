// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The recognition seam between the engine and OCR backends.

use image::DynamicImage;
use lesewerk_core::error::Result;
use lesewerk_core::types::Recognition;

use crate::native::text_quality;

/// Turns a page image into text.
///
/// Instances are expensive to build (model loading) and are reused across
/// pages, one page at a time.
pub trait Recognizer: Send {
    /// Short backend name for logs and metadata.
    fn name(&self) -> &str;

    fn recognize(&self, image: &DynamicImage) -> Result<Recognition>;
}

/// Confidence for recognised text when the backend reports none.
///
/// Recognised text is never treated as certain.
pub fn estimate_confidence(text: &str) -> f32 {
    text_quality(text).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_confidence_is_capped() {
        assert_eq!(estimate_confidence(""), 0.0);
        assert_eq!(estimate_confidence("clean recognised words"), 0.95);
        assert!(estimate_confidence("~~##||") < 0.1);
    }
}

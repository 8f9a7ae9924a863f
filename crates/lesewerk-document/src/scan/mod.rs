// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanned-page pipeline — image enhancement and optical character
// recognition (OCR).

pub mod enhance;
pub mod recognizer;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use enhance::{Binarization, OcrPreprocessing, ScanEnhancer};
pub use recognizer::{Recognizer, estimate_confidence};

#[cfg(feature = "ocr")]
pub use ocr::{OcrConfig, OcrsRecognizer};

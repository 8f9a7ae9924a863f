// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `ocrs` recognition backend.
//
// A pure-Rust OCR engine backed by neural network models executed via `rten`.
//
// # Feature Gate
//
// Only available with the `ocr` feature:
//
// ```toml
// lesewerk-document = { path = "crates/lesewerk-document", features = ["ocr"] }
// ```
//
// # Model Setup
//
// Two model files are required, `text-detection.rten` and
// `text-recognition.rten`. Running `ocrs-cli` once downloads them to
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`), which is the default
// model directory here.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::types::{BoundingBox, Recognition, WordBox};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use rten_imageproc::RotatedRect;
use tracing::{debug, info, instrument};

use super::recognizer::{Recognizer, estimate_confidence};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Where to find the detection and recognition models.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrConfig {
    /// Expects `text-detection.rten` and `text-recognition.rten` in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Use `dir` when given, the default cache directory otherwise.
    pub fn resolve(dir: Option<&Path>) -> Self {
        dir.map(Self::from_dir).unwrap_or_default()
    }

    /// Both model files must exist.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(LesewerkError::OcrUnavailable(format!(
                    "model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Recognizer backed by an `ocrs` engine.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    /// Load both models. This is the expensive step; reuse the recognizer.
    ///
    /// `ocrs` and `rten` should be compiled in release mode; debug builds are
    /// 10-100x slower.
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: &OcrConfig) -> Result<Self> {
        config.validate()?;

        info!("Loading OCR models");
        let load = |path: &Path| {
            Model::load_file(path).map_err(|err| {
                LesewerkError::OcrUnavailable(format!(
                    "failed to load model from {}: {err}",
                    path.display()
                ))
            })
        };
        let detection_model = load(&config.detection_model_path)?;
        let recognition_model = load(&config.recognition_model_path)?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| LesewerkError::OcrUnavailable(format!("failed to initialise OCR engine: {err}")))?;

        info!("OCR engine initialised");
        Ok(Self { engine })
    }
}

impl Recognizer for OcrsRecognizer {
    fn name(&self) -> &str {
        "ocrs"
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            LesewerkError::Ocr(format!("failed to create image source ({width}x{height}): {err}"))
        })?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| LesewerkError::Ocr(format!("OCR preprocessing failed: {err}")))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| LesewerkError::Ocr(format!("word detection failed: {err}")))?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        let lines = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| LesewerkError::Ocr(format!("line recognition failed: {err}")))?;

        let mut text_lines = Vec::with_capacity(lines.len());
        let mut word_boxes = Vec::new();
        for line in lines.iter().flatten() {
            let text = line.to_string();
            if text.trim().is_empty() {
                continue;
            }
            for word in line.words() {
                word_boxes.push(WordBox {
                    text: word.to_string(),
                    bbox: bounding_box(&word.rotated_rect()),
                });
            }
            text_lines.push(text);
        }

        let text = text_lines.join("\n");
        debug!(lines = text_lines.len(), words = word_boxes.len(), "OCR recognition complete");
        Ok(Recognition {
            confidence: estimate_confidence(&text),
            text,
            word_boxes,
        })
    }
}

fn bounding_box(rect: &RotatedRect) -> BoundingBox {
    let r = rect.bounding_rect();
    BoundingBox::new(r.left(), r.top(), r.right(), r.bottom())
}

/// Whether both model files exist in the default cache location.
pub fn models_available() -> bool {
    OcrConfig::default().validate().is_ok()
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded pool of OCR recognisers.
//
// Recognisers are expensive (model loading), so the pool builds them once,
// on first use or on an explicit warm-up, and checks them out one page at a
// time. A semaphore caps concurrent recognitions at the number of instances.
// Initialisation failure is remembered and reported as "unavailable"; the
// engine then degrades pages instead of failing them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use lesewerk_core::config::EngineConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::types::Recognition;
use lesewerk_document::scan::{OcrPreprocessing, Recognizer, ScanEnhancer};
use serde::Serialize;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{info, instrument, warn};

use crate::pool::PageWork;

/// Builds one recogniser. Called on the blocking pool.
pub type RecognizerFactory = Arc<dyn Fn() -> Result<Box<dyn Recognizer>> + Send + Sync>;

/// Pool state as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OcrStatus {
    /// Nothing has asked for OCR yet.
    Uninitialized,
    Ready { backend: String, workers: usize },
    Unavailable { reason: String },
}

type FreeList = Arc<Mutex<Vec<Box<dyn Recognizer>>>>;

struct Loaded {
    backend: String,
    instances: usize,
    free: FreeList,
    permits: Arc<Semaphore>,
}

fn lock(free: &FreeList) -> MutexGuard<'_, Vec<Box<dyn Recognizer>>> {
    free.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct OcrPool {
    factory: Option<RecognizerFactory>,
    workers: usize,
    preprocessing: OcrPreprocessing,
    loaded: OnceCell<std::result::Result<Loaded, String>>,
}

impl OcrPool {
    /// `workers` is clamped to at least one.
    pub fn new(factory: Option<RecognizerFactory>, workers: usize, preprocessing: OcrPreprocessing) -> Self {
        Self {
            factory,
            workers: workers.max(1),
            preprocessing,
            loaded: OnceCell::new(),
        }
    }

    pub fn status(&self) -> OcrStatus {
        match self.loaded.get() {
            None => OcrStatus::Uninitialized,
            Some(Err(reason)) => OcrStatus::Unavailable {
                reason: reason.clone(),
            },
            Some(Ok(loaded)) if loaded.permits.is_closed() => OcrStatus::Unavailable {
                reason: "OCR pool is shut down".into(),
            },
            Some(Ok(loaded)) => OcrStatus::Ready {
                backend: loaded.backend.clone(),
                workers: loaded.instances,
            },
        }
    }

    /// Build the recognisers now rather than on the first scanned page.
    pub async fn warm(&self) -> Result<()> {
        self.loaded().await.map(|_| ())
    }

    async fn loaded(&self) -> Result<&Loaded> {
        let state = self.loaded.get_or_init(|| self.initialise()).await;
        state
            .as_ref()
            .map_err(|reason| LesewerkError::OcrUnavailable(reason.clone()))
    }

    #[instrument(skip_all, fields(workers = self.workers))]
    async fn initialise(&self) -> std::result::Result<Loaded, String> {
        let Some(factory) = self.factory.clone() else {
            return Err("no OCR backend is configured; build with the `ocr` feature".into());
        };
        let workers = self.workers;

        let built = tokio::task::spawn_blocking(move || {
            let mut instances: Vec<Box<dyn Recognizer>> = Vec::with_capacity(workers);
            for _ in 0..workers {
                match factory() {
                    Ok(recognizer) => instances.push(recognizer),
                    Err(err) if instances.is_empty() => return Err(err.to_string()),
                    Err(err) => {
                        warn!(error = %err, built = instances.len(), "Could not build every OCR worker");
                        break;
                    }
                }
            }
            Ok(instances)
        })
        .await;

        let instances = match built {
            Ok(Ok(instances)) => instances,
            Ok(Err(reason)) => {
                warn!(%reason, "OCR unavailable");
                return Err(reason);
            }
            Err(err) => return Err(format!("OCR initialisation panicked: {err}")),
        };

        let backend = instances
            .first()
            .map(|r| r.name().to_string())
            .unwrap_or_default();
        let count = instances.len();
        info!(%backend, workers = count, "OCR pool ready");
        Ok(Loaded {
            backend,
            instances: count,
            free: Arc::new(Mutex::new(instances)),
            permits: Arc::new(Semaphore::new(count)),
        })
    }

    /// Enhance and recognise one page image.
    ///
    /// The checked-out recogniser is returned to the pool by the blocking
    /// task itself, so a caller that times out does not leak it. A
    /// recogniser that panics is retired together with its permit. The
    /// blocking task is tracked by `work`.
    pub async fn recognize(&self, image: DynamicImage, work: &PageWork) -> Result<Recognition> {
        let loaded = self.loaded().await?;
        let permit = Arc::clone(&loaded.permits)
            .acquire_owned()
            .await
            .map_err(|_| LesewerkError::OcrUnavailable("OCR pool is shut down".into()))?;
        let Some(recognizer) = lock(&loaded.free).pop() else {
            return Err(LesewerkError::OcrUnavailable("no OCR worker is left".into()));
        };

        let free = Arc::clone(&loaded.free);
        let preprocessing = self.preprocessing;
        let task = work.spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let prepared = ScanEnhancer::from_dynamic(image)
                    .prepare(&preprocessing)
                    .into_dynamic();
                recognizer.recognize(&prepared)
            }));
            match outcome {
                Ok(result) => {
                    lock(&free).push(recognizer);
                    drop(permit);
                    result
                }
                Err(_) => {
                    permit.forget();
                    Err(LesewerkError::Ocr("recogniser panicked and was retired".into()))
                }
            }
        });
        task.await
            .map_err(|err| LesewerkError::Ocr(format!("OCR task failed: {err}")))?
    }

    /// Refuse further work and drop idle recognisers.
    pub fn shutdown(&self) {
        if let Some(Ok(loaded)) = self.loaded.get() {
            loaded.permits.close();
            lock(&loaded.free).clear();
        }
    }
}

/// The recogniser factory compiled into this build, if any.
#[cfg(feature = "ocr")]
pub fn default_factory(config: &EngineConfig) -> Option<RecognizerFactory> {
    use lesewerk_document::scan::{OcrConfig, OcrsRecognizer};

    let dir = config.ocr.model_dir.clone();
    Some(Arc::new(move || {
        let recognizer = OcrsRecognizer::new(&OcrConfig::resolve(dir.as_deref()))?;
        Ok(Box::new(recognizer) as Box<dyn Recognizer>)
    }))
}

/// The recogniser factory compiled into this build, if any.
#[cfg(not(feature = "ocr"))]
pub fn default_factory(_config: &EngineConfig) -> Option<RecognizerFactory> {
    None
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recognises every image as a fixed sentence.
    pub struct FixedRecognizer {
        pub text: &'static str,
        pub calls: Arc<AtomicUsize>,
    }

    impl Recognizer for FixedRecognizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, _image: &DynamicImage) -> Result<Recognition> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.text.is_empty() {
                return Err(LesewerkError::Ocr("nothing recognised".into()));
            }
            Ok(Recognition {
                text: self.text.to_string(),
                confidence: 0.9,
                word_boxes: Vec::new(),
            })
        }
    }

    /// Factory counting both builds and recognitions.
    pub fn fixed_factory(text: &'static str) -> (RecognizerFactory, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let factory: RecognizerFactory = {
            let builds = Arc::clone(&builds);
            let calls = Arc::clone(&calls);
            Arc::new(move || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FixedRecognizer {
                    text,
                    calls: Arc::clone(&calls),
                }) as Box<dyn Recognizer>)
            })
        };
        (factory, builds, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::fixed_factory;
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::atomic::Ordering;

    fn page_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([200u8])))
    }

    #[tokio::test]
    async fn initialises_lazily_and_once() {
        let (factory, builds, calls) = fixed_factory("recognised words");
        let pool = OcrPool::new(Some(factory), 2, OcrPreprocessing::default());
        assert_eq!(pool.status(), OcrStatus::Uninitialized);
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            let recognition = pool.recognize(page_image(), &PageWork::default()).await.expect("recognised");
            assert_eq!(recognition.text, "recognised words");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            pool.status(),
            OcrStatus::Ready {
                backend: "fixed".into(),
                workers: 2
            }
        );
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable() {
        let pool = OcrPool::new(None, 2, OcrPreprocessing::default());
        assert!(matches!(pool.warm().await, Err(LesewerkError::OcrUnavailable(_))));
        assert!(matches!(
            pool.recognize(page_image(), &PageWork::default()).await,
            Err(LesewerkError::OcrUnavailable(_))
        ));
        assert!(matches!(pool.status(), OcrStatus::Unavailable { .. }));
    }

    #[tokio::test]
    async fn failing_factory_is_remembered() {
        let factory: RecognizerFactory =
            Arc::new(|| Err(LesewerkError::OcrUnavailable("models missing".into())));
        let pool = OcrPool::new(Some(factory), 1, OcrPreprocessing::default());
        assert!(pool.warm().await.is_err());
        match pool.status() {
            OcrStatus::Unavailable { reason } => assert!(reason.contains("models missing")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn recognition_errors_return_the_worker() {
        let (factory, _, calls) = fixed_factory("");
        let pool = OcrPool::new(Some(factory), 1, OcrPreprocessing::default());
        for _ in 0..2 {
            assert!(matches!(pool.recognize(page_image(), &PageWork::default()).await, Err(LesewerkError::Ocr(_))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_refuses_work() {
        let (factory, _, _) = fixed_factory("words");
        let pool = OcrPool::new(Some(factory), 1, OcrPreprocessing::default());
        pool.warm().await.expect("warm");
        pool.shutdown();
        assert!(matches!(pool.status(), OcrStatus::Unavailable { .. }));
        assert!(pool.recognize(page_image(), &PageWork::default()).await.is_err());
    }
}

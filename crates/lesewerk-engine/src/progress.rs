// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Progress reporting and cooperative cancellation.
//
// Progress updates go through an unbounded channel to a dispatcher task that
// invokes the caller's callback, so neither the controller nor the page
// workers ever wait on caller code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lesewerk_core::types::{ProgressStage, ProgressUpdate};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

/// Caller-supplied progress sink.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag shared between the caller and a run.
///
/// Cloning yields a handle to the same flag. Cancellation is sticky.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            self.state.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Emits [`ProgressUpdate`]s for one run.
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    dispatcher: Option<JoinHandle<()>>,
    pages_total: u32,
    pages_done: AtomicU32,
}

impl ProgressReporter {
    /// Spawns the dispatcher when a callback is present.
    pub fn new(callback: Option<ProgressCallback>, pages_total: u32) -> Self {
        let Some(callback) = callback else {
            return Self::disabled(pages_total);
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let dispatcher = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                callback(update);
            }
        });
        Self {
            tx: Some(tx),
            dispatcher: Some(dispatcher),
            pages_total,
            pages_done: AtomicU32::new(0),
        }
    }

    /// A reporter that drops every update.
    pub fn disabled(pages_total: u32) -> Self {
        Self {
            tx: None,
            dispatcher: None,
            pages_total,
            pages_done: AtomicU32::new(0),
        }
    }

    pub fn pages_done(&self) -> u32 {
        self.pages_done.load(Ordering::SeqCst)
    }

    /// Stage transition.
    pub fn stage(&self, stage: ProgressStage, message: Option<String>) {
        self.emit(ProgressUpdate {
            stage,
            pages_done: self.pages_done(),
            pages_total: self.pages_total,
            current_page: None,
            message,
        });
    }

    /// One page reached a terminal state.
    pub fn page_done(&self, page: u32, stage: ProgressStage) {
        let done = self.pages_done.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ProgressUpdate {
            stage,
            pages_done: done,
            pages_total: self.pages_total,
            current_page: Some(page),
            message: None,
        });
    }

    fn emit(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            // The dispatcher only exits once every sender is gone.
            let _ = tx.send(update);
        }
    }

    /// Close the channel and wait until the callback has seen every update.
    pub async fn finish(mut self) {
        self.tx.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                warn!(error = %err, "Progress callback panicked; later updates were dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |update| {
            sink.lock().expect("lock").push(update);
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn updates_arrive_in_order() {
        let (callback, seen) = recording();
        let reporter = ProgressReporter::new(Some(callback), 2);
        reporter.stage(ProgressStage::Extracting, None);
        reporter.page_done(1, ProgressStage::Extracting);
        reporter.page_done(2, ProgressStage::Ocr);
        reporter.stage(ProgressStage::Done, Some("finished".into()));
        reporter.finish().await;

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1].current_page, Some(1));
        assert_eq!(seen[2].pages_done, 2);
        assert_eq!(seen[2].stage, ProgressStage::Ocr);
        assert_eq!(seen[3].stage, ProgressStage::Done);
        assert!(seen.iter().all(|u| u.pages_total == 2));
    }

    #[tokio::test]
    async fn slow_callback_does_not_block_emitter() {
        let callback: ProgressCallback = Arc::new(|_| std::thread::sleep(Duration::from_millis(50)));
        let reporter = ProgressReporter::new(Some(callback), 10);

        let started = std::time::Instant::now();
        for page in 1..=10 {
            reporter.page_done(page, ProgressStage::Extracting);
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(reporter.pages_done(), 10);
        reporter.finish().await;
    }

    #[tokio::test]
    async fn disabled_reporter_still_counts() {
        let reporter = ProgressReporter::disabled(3);
        reporter.page_done(1, ProgressStage::Extracting);
        assert_eq!(reporter.pages_done(), 1);
        reporter.finish().await;
    }

    #[tokio::test]
    async fn cancellation_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("join");
        assert!(token.is_cancelled());

        // Already cancelled: resolves immediately.
        token.cancelled().await;
    }
}

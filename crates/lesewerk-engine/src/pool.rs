// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent page worker pool.
//
// Workers are long-lived tasks pulling page jobs from one shared FIFO queue.
// The controller submits one chunk at a time and collects exactly one
// message per submitted page before it moves on, so at most one chunk of
// pages is ever held in memory. Cancellation is checked under the queue lock
// as each job is taken: pages taken before the cancel are finished, pages
// still queued are reported as skipped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lesewerk_core::error::{PageErrorKind, PageExtractionError};
use lesewerk_core::types::{PageTask, TaskState};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::page::{PageFailure, PageReport, RunContext, join_error, process_page};

// ---------------------------------------------------------------------------
// Buffer accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GaugeState {
    live: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts page buffers currently held and the most ever held at once.
#[derive(Debug, Clone, Default)]
pub struct BufferGauge {
    state: Arc<GaugeState>,
}

impl BufferGauge {
    pub fn acquire(&self) -> BufferLease {
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(live, Ordering::SeqCst);
        BufferLease {
            state: Arc::clone(&self.state),
        }
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct BufferLease {
    state: Arc<GaugeState>,
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct WorkState {
    active: AtomicUsize,
    idle: Notify,
}

/// Blocking tasks started by one page attempt.
///
/// Dropping the attempt does not stop them, so a timed-out page waits on
/// [`settled`](Self::settled) before it retries or reports.
#[derive(Debug, Clone, Default)]
pub struct PageWork {
    state: Arc<WorkState>,
}

struct WorkGuard(Arc<WorkState>);

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl PageWork {
    /// `tokio::task::spawn_blocking`, tracked until `f` returns or unwinds.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.state.active.fetch_add(1, Ordering::SeqCst);
        let guard = WorkGuard(Arc::clone(&self.state));
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f()
        })
    }

    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Resolves once no tracked task is running.
    pub async fn settled(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// What a worker reports for one submitted page.
#[derive(Debug, Clone)]
pub enum PageMessage {
    Completed(PageReport),
    Failed(PageFailure),
    /// Taken from the queue after the run was cancelled; never started.
    Skipped(u32),
}

impl PageMessage {
    pub fn page(&self) -> u32 {
        match self {
            Self::Completed(report) => report.result.page,
            Self::Failed(failure) => failure.error.page,
            Self::Skipped(page) => *page,
        }
    }
}

struct Job {
    task: PageTask,
    ctx: Arc<RunContext>,
    reply: mpsc::UnboundedSender<PageMessage>,
}

enum Next {
    Run(Job),
    Skip(Job),
    Idle,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    stopping: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> Next {
        let mut queue = self.queue();
        match queue.pop_front() {
            Some(job) if job.ctx.cancel.is_cancelled() => Next::Skip(job),
            Some(job) => Next::Run(job),
            None => Next::Idle,
        }
    }
}

/// Fixed-size pool of page workers, started and stopped explicitly.
pub struct WorkerPool {
    size: usize,
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// `size` is clamped to at least one worker.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        !self.handles().is_empty()
    }

    /// Spawn the workers. Does nothing when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut handles = self.handles();
        if !handles.is_empty() {
            return;
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        for id in 0..self.size {
            handles.push(tokio::spawn(worker_loop(id, Arc::clone(&self.shared))));
        }
        info!(workers = self.size, "Worker pool started");
    }

    /// Let workers drain the queue, then stop them.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles());
        if handles.is_empty() {
            return;
        }
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        for handle in handles {
            // A worker only ends early by panicking outside a page task.
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }

    /// Submit one chunk and wait for a message per page.
    ///
    /// Messages arrive in completion order; `on_message` sees each as it
    /// lands.
    #[instrument(skip_all, fields(pages = tasks.len()))]
    pub(crate) async fn run_chunk(
        &self,
        ctx: &Arc<RunContext>,
        tasks: Vec<PageTask>,
        mut on_message: impl FnMut(&PageMessage),
    ) -> Vec<PageMessage> {
        self.start();
        let expected = tasks.len();
        let submitted: Vec<u32> = tasks.iter().map(|t| t.page).collect();
        let (reply, mut replies) = mpsc::unbounded_channel();
        {
            let mut queue = self.shared.queue();
            for task in tasks {
                queue.push_back(Job {
                    task,
                    ctx: Arc::clone(ctx),
                    reply: reply.clone(),
                });
            }
        }
        drop(reply);
        for _ in 0..expected.min(self.size) {
            self.shared.notify.notify_one();
        }

        // Every job owns a sender, so the channel closes once each page has
        // been answered.
        let mut messages = Vec::with_capacity(expected);
        while let Some(message) = replies.recv().await {
            on_message(&message);
            messages.push(message);
        }

        if messages.len() < expected {
            for page in submitted {
                if !messages.iter().any(|m| m.page() == page) {
                    let message = lost_page(page);
                    on_message(&message);
                    messages.push(message);
                }
            }
        }
        messages
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let notified = shared.notify.notified();
        match shared.next() {
            Next::Run(job) => run_job(id, job).await,
            Next::Skip(job) => {
                debug!(worker = id, page = job.task.page, "Skipping page after cancellation");
                let _ = job.reply.send(PageMessage::Skipped(job.task.page));
            }
            Next::Idle => {
                if shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        }
    }
}

async fn run_job(worker: usize, job: Job) {
    let Job { mut task, ctx, reply } = job;
    let page = task.page;
    task.state = TaskState::Running;

    // A separate task, so a panic outside the blocking pool is still caught.
    let handle = tokio::spawn(async move { process_page(&ctx, page).await });
    let message = match handle.await {
        Ok(Ok(report)) => PageMessage::Completed(report),
        Ok(Err(failure)) => PageMessage::Failed(failure),
        Err(err) => PageMessage::Failed(PageFailure {
            error: join_error(page, err),
            attempts: 1,
        }),
    };

    task.state = match message {
        PageMessage::Completed(_) => TaskState::Done,
        _ => TaskState::Failed,
    };
    debug!(worker, page, chunk = task.chunk, state = ?task.state, "Page finished");
    let _ = reply.send(message);
}

/// Stand-in for a page whose worker died without answering.
fn lost_page(page: u32) -> PageMessage {
    PageMessage::Failed(PageFailure {
        error: PageExtractionError::new(page, PageErrorKind::Cancelled, "page worker stopped"),
        attempts: 0,
    })
}

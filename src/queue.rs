//! Chat job queue and worker pool.
//!
//! Callers [`submit`](ChatQueue::submit) `(session_id, input)` and get a
//! [`JobHandle`] back. Jobs wait in one shared FIFO queue and a fixed set of
//! long-lived workers takes them off the front, one at a time each. Every
//! worker is bound to a [`GenerationSerializer`] (worker `i` uses serializer
//! `i % serializers.len()`), so each backend instance runs at most one
//! generation at a time no matter how many workers share it.
//!
//! # Ordering
//!
//! Dequeue order is submission order. With more than one worker, jobs
//! complete in no particular order, including two jobs of the same session:
//! there is no session affinity. A caller that needs its turns in order must
//! await one handle before submitting the next job for that session.
//!
//! # Failures
//!
//! A job runs in its own task. Errors and panics become that job's result;
//! the worker moves on to the next job.
//!
//! # Shutdown
//!
//! [`shutdown`](ChatQueue::shutdown):
//!
//! 1. rejects new submissions with [`QaError::ShuttingDown`];
//! 2. cancels workers through a [`CancellationToken`]; an in-flight job is
//!    aborted (releasing its serializer) and resolved with `ShuttingDown`;
//! 3. waits up to `shutdown_grace` for workers to stop, then aborts the rest
//!    (a job held by an aborted worker resolves with `ShuttingDown` and is
//!    counted as failed);
//! 4. resolves every job still queued with `ShuttingDown`.
//!
//! Every handle therefore resolves exactly once.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docqa_core::models::{validate_session_id, ChatReply};
use docqa_core::{QaError, QaResult};

use crate::chat::ChatEngine;
use crate::generation::GenerationSerializer;

/// What `submit` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Fail immediately with [`QaError::QueueFull`].
    #[default]
    Reject,
    /// Wait for a free slot.
    Block,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    /// `None` = unbounded.
    pub capacity: Option<usize>,
    pub backpressure: Backpressure,
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            capacity: None,
            backpressure: Backpressure::Reject,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Counters reported by [`ChatQueue::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs a worker is currently processing.
    pub in_flight: usize,
}

struct Job {
    session_id: String,
    input: String,
    reply: oneshot::Sender<QaResult<ChatReply>>,
}

enum JobSender {
    Unbounded(mpsc::UnboundedSender<Job>),
    Bounded(mpsc::Sender<Job>),
}

enum JobReceiver {
    Unbounded(mpsc::UnboundedReceiver<Job>),
    Bounded(mpsc::Receiver<Job>),
}

impl JobReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Unbounded(rx) => rx.recv().await,
            JobReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Unbounded(rx) => rx.try_recv().ok(),
            JobReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// One job a worker is processing. Dropped without [`settle`](Self::settle)
/// (the worker was aborted), the job counts as failed.
struct InFlight<'a> {
    counters: &'a Counters,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn begin(counters: &'a Counters) -> Self {
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            counters,
            settled: false,
        }
    }

    fn settle(mut self, ok: bool) {
        let counter = if ok {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.settled {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Resolves to the job's result exactly once.
///
/// If the queue drops the job without answering, the handle resolves with
/// [`QaError::ShuttingDown`].
#[derive(Debug)]
#[must_use = "a JobHandle does nothing unless awaited"]
pub struct JobHandle {
    rx: oneshot::Receiver<QaResult<ChatReply>>,
}

impl Future for JobHandle {
    type Output = QaResult<ChatReply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(QaError::ShuttingDown)))
    }
}

/// Aborts the wrapped task when dropped, so a cancelled worker never leaves
/// its job running in the background.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fixed worker pool over one shared FIFO queue.
pub struct ChatQueue {
    sender: RwLock<Option<JobSender>>,
    receiver: Arc<Mutex<JobReceiver>>,
    backpressure: Backpressure,
    shutdown_grace: Duration,
    token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl ChatQueue {
    /// Spawn `config.workers` workers on the current tokio runtime.
    pub fn start(
        engine: Arc<ChatEngine>,
        serializers: Vec<Arc<GenerationSerializer>>,
        config: QueueConfig,
    ) -> QaResult<Self> {
        if config.workers == 0 || serializers.is_empty() {
            return Err(QaError::validation(
                "a chat queue needs at least one worker and one generation backend",
            ));
        }

        let (sender, receiver) = match config.capacity {
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
            }
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (JobSender::Bounded(tx), JobReceiver::Bounded(rx))
            }
        };
        let receiver = Arc::new(Mutex::new(receiver));
        let token = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers)
            .map(|id| {
                let serializer = serializers[id % serializers.len()].clone();
                tokio::spawn(worker_loop(
                    id,
                    engine.clone(),
                    serializer,
                    receiver.clone(),
                    token.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            backends = serializers.len(),
            capacity = ?config.capacity,
            "chat queue started"
        );

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            backpressure: config.backpressure,
            shutdown_grace: config.shutdown_grace,
            token,
            workers: Mutex::new(workers),
            counters,
        })
    }

    /// Validate and enqueue a chat job.
    ///
    /// Fails with `Validation` for a malformed session id or blank input,
    /// `QueueFull` when a bounded queue rejects the job, and `ShuttingDown`
    /// once [`shutdown`](Self::shutdown) has started.
    pub async fn submit(&self, session_id: &str, input: &str) -> QaResult<JobHandle> {
        validate_session_id(session_id)?;
        if input.trim().is_empty() {
            return Err(QaError::validation("input must not be empty"));
        }
        if self.token.is_cancelled() {
            return Err(QaError::ShuttingDown);
        }

        let (reply, rx) = oneshot::channel();
        let job = Job {
            session_id: session_id.to_string(),
            input: input.to_string(),
            reply,
        };

        // Counted before sending so a fast worker never sees a negative depth.
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.enqueue(job).await {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        debug!(session = %session_id, "chat job queued");

        Ok(JobHandle { rx })
    }

    async fn enqueue(&self, job: Job) -> QaResult<()> {
        let guard = self.sender.read().await;
        let sender = guard.as_ref().ok_or(QaError::ShuttingDown)?;
        match sender {
            JobSender::Unbounded(tx) => tx.send(job).map_err(|_| QaError::ShuttingDown),
            JobSender::Bounded(tx) => match self.backpressure {
                Backpressure::Reject => tx.try_send(job).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => QaError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => QaError::ShuttingDown,
                }),
                Backpressure::Block => {
                    let permit = tokio::select! {
                        permit = tx.reserve() => permit.map_err(|_| QaError::ShuttingDown)?,
                        _ = self.token.cancelled() => return Err(QaError::ShuttingDown),
                    };
                    permit.send(job);
                    Ok(())
                }
            },
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop the pool. See the module docs. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.sender.write().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        for mut handle in workers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("worker did not stop within the grace period; aborting");
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut drained = 0usize;
        let mut receiver = self.receiver.lock().await;
        while let Some(job) = receiver.try_recv() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            let _ = job.reply.send(Err(QaError::ShuttingDown));
            drained += 1;
        }

        info!(drained, "chat queue stopped");
    }
}

async fn next_job(receiver: &Mutex<JobReceiver>) -> Option<Job> {
    receiver.lock().await.recv().await
}

async fn worker_loop(
    id: usize,
    engine: Arc<ChatEngine>,
    serializer: Arc<GenerationSerializer>,
    receiver: Arc<Mutex<JobReceiver>>,
    token: CancellationToken,
    counters: Arc<Counters>,
) {
    debug!(worker = id, "worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = next_job(&receiver) => match job {
                Some(job) => job,
                None => break,
            },
        };
        let in_flight = InFlight::begin(&counters);

        let Job {
            session_id,
            input,
            reply,
        } = job;

        let task = {
            let engine = engine.clone();
            let serializer = serializer.clone();
            let session_id = session_id.clone();
            AbortOnDrop(tokio::spawn(async move {
                engine.respond(&serializer, &session_id, &input).await
            }))
        };
        let result = run_job(task, &token).await;

        if let Err(e) = &result {
            warn!(worker = id, session = %session_id, error = %e, "chat job failed");
        }
        in_flight.settle(result.is_ok());
        // The caller may have dropped its handle.
        let _ = reply.send(result);
    }
    debug!(worker = id, "worker stopped");
}

async fn run_job(
    mut task: AbortOnDrop<QaResult<ChatReply>>,
    token: &CancellationToken,
) -> QaResult<ChatReply> {
    tokio::select! {
        joined = &mut task.0 => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(QaError::Internal("chat job panicked".to_string())),
            Err(_) => Err(QaError::ShuttingDown),
        },
        _ = token.cancelled() => {
            task.0.abort();
            let _ = (&mut task.0).await;
            Err(QaError::ShuttingDown)
        }
    }
}

#![deny(warnings)]

//! Background execution of Monte Carlo risk jobs.
//!
//! Requests go through a bounded queue to a pool of workers; each job runs on
//! the blocking thread pool and answers over its own oneshot channel. Jobs
//! either deliver a complete summary or fail. A raised cancel flag stops a
//! running job between trial blocks, and a job whose caller dropped its handle
//! before it started is skipped.

use agro_core::{EngineConfig, EngineError, MonteCarloRequest, MonteCarloSummary, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifier assigned to a job at submission, unique per queue.
pub type JobId = u64;

/// Worker pool sizing.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Number of concurrent jobs.
    pub workers: usize,
    /// Pending jobs accepted before `submit` waits for room.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 64,
        }
    }
}

/// Job failures, reported through the job's own channel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
    /// Request failed validation; no trial was run.
    #[error("job rejected: {0}")]
    Rejected(#[from] ValidationError),
    #[error("job failed: {0}")]
    Failed(EngineError),
    #[error("job cancelled")]
    Cancelled,
    #[error("job queue is closed")]
    QueueClosed,
    /// The worker died or dropped the reply.
    #[error("worker lost: {0}")]
    WorkerLost(String),
}

/// Completed job with timing information.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub summary: MonteCarloSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

struct Job {
    id: JobId,
    request: MonteCarloRequest,
    cancel: Arc<AtomicBool>,
    reply: oneshot::Sender<Result<JobReport, JobError>>,
}

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: Arc<AtomicBool>,
    reply: oneshot::Receiver<Result<JobReport, JobError>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Ask the worker to stop; the job then fails with [`JobError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait for the job outcome.
    pub async fn wait(self) -> Result<JobReport, JobError> {
        match self.reply.await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::WorkerLost("reply channel closed".to_string())),
        }
    }
}

/// Lifetime counters of a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs a worker began running.
    pub started: u64,
    /// Jobs dropped because their handle was gone before they started.
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    skipped: AtomicU64,
}

/// Monte Carlo job queue with a fixed worker pool.
pub struct MonteCarloQueue {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    engine: Arc<EngineConfig>,
    counters: Arc<Counters>,
}

impl MonteCarloQueue {
    /// Spawn the workers on the current tokio runtime.
    pub fn start(cfg: QueueConfig, engine: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let engine = Arc::new(engine);
        let counters = Arc::new(Counters::default());
        let n_workers = cfg.workers.max(1);
        let workers = (0..n_workers)
            .map(|w| {
                tokio::spawn(worker_loop(
                    w,
                    Arc::clone(&rx),
                    Arc::clone(&engine),
                    Arc::clone(&counters),
                ))
            })
            .collect();
        info!(workers = n_workers, capacity = cfg.capacity, "monte carlo queue started");
        Self {
            tx,
            workers,
            next_id: AtomicU64::new(1),
            engine,
            counters,
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            started: self.counters.started.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Validate and enqueue a request.
    ///
    /// Invalid requests (e.g. `iterations <= 0`) are rejected here, before
    /// anything is queued.
    pub async fn submit(&self, request: MonteCarloRequest) -> Result<JobHandle, JobError> {
        request.validate(self.engine.monte_carlo.max_iterations)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            id,
            request,
            cancel: Arc::clone(&cancel),
            reply: reply_tx,
        };
        self.tx.send(job).await.map_err(|_| JobError::QueueClosed)?;
        debug!(job_id = id, "job queued");
        Ok(JobHandle {
            id,
            cancel,
            reply: reply_rx,
        })
    }

    /// Enqueue an opaque key-value payload (see [`MonteCarloRequest::from_payload`]).
    pub async fn submit_payload(&self, payload: &Map<String, Value>) -> Result<JobHandle, JobError> {
        let request = MonteCarloRequest::from_payload(payload)?;
        self.submit(request).await
    }

    /// Submit and wait in one call.
    pub async fn run(&self, request: MonteCarloRequest) -> Result<JobReport, JobError> {
        self.submit(request).await?.wait().await
    }

    /// Close the queue and wait for workers to drain pending jobs.
    pub async fn shutdown(self) {
        drop(self.tx);
        for w in self.workers {
            if let Err(e) = w.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }
        info!("monte carlo queue stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    engine: Arc<EngineConfig>,
    counters: Arc<Counters>,
) {
    loop {
        let next = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = next else { break };
        run_job(worker, job, &engine, &counters).await;
    }
    debug!(worker, "worker stopped");
}

async fn run_job(worker: usize, job: Job, engine: &Arc<EngineConfig>, counters: &Counters) {
    let Job {
        id,
        request,
        cancel,
        reply,
    } = job;
    if reply.is_closed() {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        info!(job_id = id, "caller went away before start, skipping job");
        return;
    }
    counters.started.fetch_add(1, Ordering::Relaxed);
    info!(job_id = id, worker, iterations = request.iterations, "job started");
    let started_at = Utc::now();
    let clock = Instant::now();
    let cfg = Arc::clone(engine);
    let outcome = tokio::task::spawn_blocking(move || {
        agro_econ::run_cancellable(&request, &cfg, &cancel)
    })
    .await;
    let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

    let result = match outcome {
        Ok(Ok(summary)) => Ok(JobReport {
            job_id: id,
            summary,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
        }),
        Ok(Err(EngineError::Cancelled)) => Err(JobError::Cancelled),
        Ok(Err(e)) => Err(JobError::Failed(e)),
        Err(e) => Err(JobError::WorkerLost(e.to_string())),
    };
    match &result {
        Ok(_) => info!(job_id = id, elapsed_ms, "job finished"),
        Err(e) => warn!(job_id = id, elapsed_ms, error = %e, "job failed"),
    }
    if reply.send(result).is_err() {
        debug!(job_id = id, "caller dropped handle, result discarded");
    }
}

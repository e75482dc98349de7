//! Scoring worker pool shared by every running job
//!
//! The pool owns `capacity` slots. A submission waits (FIFO, across all
//! jobs) for a free slot, then the frame is scored on a blocking thread and
//! the result comes back over a oneshot channel. At most `capacity` tasks are
//! ever in flight.

use crate::frame::Frame;
use crate::scorer::{ScoreError, SharpnessScorer};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;
use uuid::Uuid;

/// A scoring request for one frame
#[derive(Debug, Clone)]
pub struct ScoreTask {
    pub job: Uuid,
    pub block: usize,
    /// Shared read-only with the requesting job
    pub frame: Arc<Frame>,
}

/// The outcome of one scoring request
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub job: Uuid,
    pub block: usize,
    /// Stream position of the scored frame
    pub position: u64,
    pub outcome: Result<f64, ScoreError>,
}

/// Pending result of a submitted task
#[derive(Debug)]
pub struct ScoreHandle {
    job: Uuid,
    block: usize,
    position: u64,
    rx: Option<oneshot::Receiver<Result<f64, ScoreError>>>,
    failed: Option<ScoreError>,
}

impl ScoreHandle {
    /// Wait for the worker to finish
    pub async fn resolve(self) -> ScoreResult {
        let outcome = match (self.rx, self.failed) {
            (_, Some(err)) => Err(err),
            (Some(rx), None) => rx.await.unwrap_or(Err(ScoreError::WorkerLost)),
            (None, None) => Err(ScoreError::WorkerLost),
        };
        ScoreResult {
            job: self.job,
            block: self.block,
            position: self.position,
            outcome,
        }
    }
}

/// Fixed-capacity pool of scoring workers
#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    scorer: Arc<dyn SharpnessScorer>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool with `capacity` workers (at least one)
    pub fn new(capacity: usize, scorer: Arc<dyn SharpnessScorer>) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            scorer,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently being scored
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    /// Total number of tasks that finished, successfully or not
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Submit a frame for scoring.
    ///
    /// Suspends the caller until a worker slot is free. Slots are handed out
    /// in submission order. The returned handle resolves once the frame has
    /// been scored; a failing or panicking scorer only fails that task.
    pub async fn submit(&self, task: ScoreTask) -> ScoreHandle {
        let position = task.frame.position;
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ScoreHandle {
                    job: task.job,
                    block: task.block,
                    position,
                    rx: None,
                    failed: Some(ScoreError::PoolClosed),
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        let scorer = self.scorer.clone();
        let completed = self.completed.clone();
        let frame = task.frame;

        tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| scorer.score(&frame)))
                .unwrap_or(Err(ScoreError::WorkerPanicked))
                .and_then(|score| {
                    if score.is_finite() && score >= 0.0 {
                        Ok(score)
                    } else {
                        Err(ScoreError::InvalidScore(score))
                    }
                });
            drop(frame);
            // Free the slot before the submitter sees the result
            drop(permit);
            completed.fetch_add(1, Ordering::Relaxed);
            if tx.send(outcome).is_err() {
                debug!(position, "score result discarded, requester is gone");
            }
        });

        ScoreHandle {
            job: task.job,
            block: task.block,
            position,
            rx: Some(rx),
            failed: None,
        }
    }

    /// Stop accepting new work. Tasks already in flight still complete.
    pub fn shutdown(&self) {
        self.slots.close();
    }
}

//! Job scheduler
//!
//! Runs up to `jobs` videos at once over a shared worker pool and memory
//! budget. Every video is inspected up front so a configuration whose minimum
//! buffering can never fit the memory limit aborts the run before any output
//! is written.

use crate::budget::{BudgetError, MemoryBudget};
use crate::config::{ConfigError, ExtractConfig};
use crate::decode::VideoDecoder;
use crate::job::{min_footprint, JobContext, JobReport, JobStatus, VideoJob};
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::output::FrameWriter;
use crate::scorer::SharpnessScorer;
use crate::worker_pool::WorkerPool;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A video can never be processed within the memory limit
    #[error("{}: {source}", .path.display())]
    Budget {
        path: PathBuf,
        #[source]
        source: BudgetError,
    },
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every job completed clean
    Success,
    /// Some jobs were degraded or failed
    Partial,
    /// Every job failed
    Failure,
}

impl RunOutcome {
    pub fn from_jobs(jobs: &[JobReport]) -> Self {
        if jobs.iter().all(|j| j.status == JobStatus::Completed) {
            RunOutcome::Success
        } else if jobs.iter().all(|j| j.status == JobStatus::Failed) {
            RunOutcome::Failure
        } else {
            RunOutcome::Partial
        }
    }

    /// Process exit code: 0 success, 2 partial, 1 failure
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Partial => 2,
            RunOutcome::Failure => 1,
        }
    }
}

/// Final report of a run, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub jobs: Vec<JobReport>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn files_written(&self) -> usize {
        self.jobs.iter().map(|j| j.written_blocks.len()).sum()
    }
}

/// Admits video jobs and aggregates their reports
pub struct Scheduler {
    config: ExtractConfig,
    ctx: JobContext,
    slots: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        config: ExtractConfig,
        decoder: Arc<dyn VideoDecoder>,
        writer: Arc<dyn FrameWriter>,
        scorer: Arc<dyn SharpnessScorer>,
    ) -> Self {
        let ctx = JobContext {
            decoder,
            writer,
            pool: WorkerPool::new(config.workers.max(1) as usize, scorer),
            budget: MemoryBudget::new(config.memory_limit_bytes),
            metrics: new_shared_metrics(),
        };
        let slots = Arc::new(Semaphore::new(config.jobs.max(1) as usize));
        Self { config, ctx, slots }
    }

    /// Publish progress into `metrics` instead of a private snapshot
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.ctx.metrics = metrics;
        self
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Inspect every video and check its minimum footprint against the limit.
    ///
    /// Videos that cannot be inspected or planned are still queued; their job
    /// fails on its own without affecting the others.
    async fn preflight(&self) -> Result<Vec<VideoJob>, RunError> {
        let mut queue = Vec::with_capacity(self.config.video_paths.len());

        for path in &self.config.video_paths {
            let output_dir = self.config.output_dir_for(path);
            let mut job = VideoJob::new(path.clone(), output_dir, self.config.mode);

            let decoder = self.ctx.decoder.clone();
            let inspect_path = path.clone();
            let inspected = tokio::task::spawn_blocking(move || decoder.inspect(&inspect_path)).await;

            match inspected {
                Ok(Ok(info)) => {
                    if let Ok(footprint) = min_footprint(&info, self.config.mode) {
                        self.ctx
                            .budget
                            .check_fits(footprint)
                            .map_err(|source| RunError::Budget {
                                path: path.clone(),
                                source,
                            })?;
                        debug!(path = %path.display(), footprint, "preflight ok");
                    }
                    job = job.with_info(info);
                }
                Ok(Err(e)) => warn!(path = %path.display(), "preflight inspection failed: {}", e),
                Err(e) => warn!(path = %path.display(), "preflight inspection panicked: {}", e),
            }
            queue.push(job);
        }

        Ok(queue)
    }

    /// Run every video to a terminal state
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        self.config.validate()?;
        let queue = self.preflight().await?;

        info!(
            videos = queue.len(),
            jobs = self.config.jobs,
            workers = self.config.workers,
            memory_limit_bytes = self.config.memory_limit_bytes,
            mode = %self.config.mode,
            "run started"
        );
        self.ctx.metrics.write().await.queue_len = queue.len();

        let mut running: JoinSet<(usize, JobReport)> = JoinSet::new();
        for (index, job) in queue.into_iter().enumerate() {
            // Admission waits for a free slot before the job is spawned
            let permit = match self.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            {
                let mut snapshot = self.ctx.metrics.write().await;
                snapshot.queue_len = snapshot.queue_len.saturating_sub(1);
                snapshot.running_jobs += 1;
            }

            let ctx = self.ctx.clone();
            running.spawn(async move {
                let (id, input_path, output_dir) =
                    (job.id, job.input_path.clone(), job.output_dir.clone());
                let metrics = ctx.metrics.clone();

                let report = match tokio::spawn(job.run(ctx)).await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(path = %input_path.display(), "job task ended abnormally: {}", e);
                        JobReport::failed(id, input_path, output_dir, format!("job task ended abnormally: {}", e))
                    }
                };
                record_finished(&metrics, &report).await;
                drop(permit);
                (index, report)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(e) => warn!("job slot task lost: {}", e),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        let jobs: Vec<JobReport> = reports.into_iter().map(|(_, report)| report).collect();

        let report = RunReport {
            outcome: RunOutcome::from_jobs(&jobs),
            jobs,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            outcome = ?report.outcome,
            files = report.files_written(),
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        Ok(report)
    }
}

async fn record_finished(metrics: &SharedMetrics, report: &JobReport) {
    let mut snapshot = metrics.write().await;
    snapshot.running_jobs = snapshot.running_jobs.saturating_sub(1);
    snapshot.files_written += report.written_blocks.len() as u64;
    match report.status {
        JobStatus::Completed => snapshot.completed_jobs += 1,
        JobStatus::Degraded => snapshot.degraded_jobs += 1,
        JobStatus::Failed => snapshot.failed_jobs += 1,
    }
}

//! Live run metrics
//!
//! One [`MetricsSnapshot`] is shared by the scheduler, every job and the
//! periodic updater. It serializes to the JSON served at `GET /metrics`.

use crate::budget::MemoryBudget;
use crate::worker_pool::WorkerPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Per-job progress
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub input_path: String,
    pub stage: String,
    pub blocks_total: u64,
    pub blocks_done: u64,
    pub frames_decoded: u64,
    pub frames_scored: u64,
    pub frames_failed: u64,
    pub files_written: u64,
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Occupancy of the shared memory budget and worker pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineMetrics {
    pub memory_limit_bytes: u64,
    pub memory_outstanding_bytes: u64,
    pub memory_peak_bytes: u64,
    pub worker_capacity: usize,
    pub workers_in_flight: usize,
    pub frames_scored: u64,
}

impl PipelineMetrics {
    pub fn sample(budget: &MemoryBudget, pool: &WorkerPool) -> Self {
        Self {
            memory_limit_bytes: budget.limit(),
            memory_outstanding_bytes: budget.outstanding(),
            memory_peak_bytes: budget.peak_outstanding(),
            worker_capacity: pool.capacity(),
            workers_in_flight: pool.in_flight(),
            frames_scored: pool.completed(),
        }
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub system: SystemMetrics,
    pub pipeline: PipelineMetrics,
    pub queue_len: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub degraded_jobs: u64,
    pub failed_jobs: u64,
    pub files_written: u64,
}

impl MetricsSnapshot {
    /// Insert or replace the entry for `job.id`
    pub fn upsert_job(&mut self, job: JobMetrics) {
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
    }
}

/// Shared metrics state for concurrent access across run components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Milliseconds since the Unix epoch
pub fn timestamp_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let mem_usage = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };
    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

/// Periodically refresh system and pipeline metrics until aborted
pub fn spawn_metrics_updater(
    metrics: SharedMetrics,
    budget: MemoryBudget,
    pool: WorkerPool,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let system = tokio::task::spawn_blocking(collect_system_metrics)
                .await
                .unwrap_or_default();
            {
                let mut snapshot = metrics.write().await;
                snapshot.system = system;
                snapshot.pipeline = PipelineMetrics::sample(&budget, &pool);
                snapshot.timestamp_unix_ms = timestamp_unix_ms();
            }
            tokio::time::sleep(interval).await;
        }
    })
}

//! Sharp Frame Extractor
//!
//! Splits videos into blocks and keeps the sharpest frame of each block.
//! Jobs share one scoring worker pool and one memory budget.

pub mod budget;
pub mod concurrency;
pub mod decode;
pub mod frame;
pub mod job;
pub mod metrics;
pub mod metrics_server;
pub mod output;
pub mod planner;
pub mod scan;
pub mod scheduler;
pub mod scorer;
pub mod startup;
pub mod worker_pool;

pub use sharp_frame_extractor_config as config;
pub use sharp_frame_extractor_config::{ExtractConfig, SamplingMode, Settings};
pub use budget::{BudgetError, BudgetToken, JobBudget, MemoryBudget};
pub use concurrency::{HostResources, ResourcePlan};
pub use decode::{DecodeError, FfmpegDecoder, FrameSource, VideoDecoder};
pub use frame::{Frame, VideoInfo};
pub use job::{JobContext, JobError, JobReport, JobState, JobStatus, VideoJob};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, spawn_metrics_updater, JobMetrics,
    MetricsSnapshot, PipelineMetrics, SharedMetrics, SystemMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use output::{frame_file_name, FrameWriter, ImageFrameWriter, WriteError};
pub use planner::{plan, Block, PlanError};
pub use scan::{expand_inputs, scan_directory};
pub use scheduler::{RunError, RunOutcome, RunReport, Scheduler};
pub use scorer::{ScoreError, SharpnessScorer, TenengradScorer};
pub use startup::{run_startup_checks, StartupError};
pub use worker_pool::{ScoreHandle, ScoreResult, ScoreTask, WorkerPool};

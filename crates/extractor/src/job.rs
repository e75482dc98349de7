//! Per-video job
//!
//! A job inspects its video, plans blocks, registers with the memory budget and
//! then runs two halves concurrently:
//!
//! - a decode pump on a blocking thread, which takes a budget token for each
//!   frame *before* reading it and hands frames over a channel of depth one,
//!   so lookahead is bounded by what the budget grants;
//! - the block loop, which submits every frame of the current block to the
//!   shared worker pool, keeps the best-scoring frame and drops the rest (and
//!   their tokens) as soon as their scores are known, then writes the winner.
//!
//! Blocks are finished strictly in order. Scoring failures and write failures
//! degrade the job; a decode error fails it, keeping files already written.

use crate::budget::{BudgetError, BudgetToken, JobBudget, MemoryBudget};
use crate::config::SamplingMode;
use crate::decode::{DecodeError, VideoDecoder};
use crate::frame::{Frame, VideoInfo};
use crate::metrics::{JobMetrics, SharedMetrics};
use crate::output::{frame_file_name, FrameWriter};
use crate::planner::{min_buffered_frames, plan, Block, PlanError};
use crate::scorer::ScoreError;
use crate::worker_pool::{ScoreResult, ScoreTask, WorkerPool};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Error type for a job that could not finish
#[derive(Debug, Error)]
pub enum JobError {
    /// The video could not be inspected
    #[error("Inspection failed: {0}")]
    Inspect(#[source] DecodeError),

    /// No block plan could be made for the stream
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    /// The job's minimum buffering exceeds the memory limit
    #[error("Memory budget error: {0}")]
    Budget(#[from] BudgetError),

    /// The output directory could not be created
    #[error("Failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Decoding stopped with an error
    #[error("Decode failed: {0}")]
    Decode(#[source] DecodeError),

    /// A blocking task of the job panicked
    #[error("Job task panicked: {0}")]
    Panicked(String),
}

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Decoding,
    Buffering,
    Scoring,
    Selecting,
    Writing,
    Completed,
    /// Finished, but skipped blocks or failed to write some
    Degraded,
    Failed(String),
}

impl JobState {
    /// Convert state to string for metrics
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Decoding => "decoding",
            JobState::Buffering => "buffering",
            JobState::Scoring => "scoring",
            JobState::Selecting => "selecting",
            JobState::Writing => "writing",
            JobState::Completed => "completed",
            JobState::Degraded => "degraded",
            JobState::Failed(_) => "failed",
        }
    }
}

/// Terminal status as reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Degraded,
    Failed,
}

/// What happened to one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub status: JobStatus,
    pub blocks_planned: usize,
    /// Block indices with a written file, ascending
    pub written_blocks: Vec<usize>,
    /// Blocks where every frame failed scoring
    pub skipped_blocks: Vec<usize>,
    /// Blocks whose winner could not be written
    pub write_failed_blocks: Vec<usize>,
    pub frames_decoded: u64,
    pub frames_scored: u64,
    pub frames_failed: u64,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl JobReport {
    fn new(job: &VideoJob) -> Self {
        Self {
            id: job.id,
            input_path: job.input_path.clone(),
            output_dir: job.output_dir.clone(),
            status: JobStatus::Completed,
            blocks_planned: 0,
            written_blocks: Vec::new(),
            skipped_blocks: Vec::new(),
            write_failed_blocks: Vec::new(),
            frames_decoded: 0,
            frames_scored: 0,
            frames_failed: 0,
            warnings: Vec::new(),
            error: None,
            elapsed_ms: 0,
        }
    }

    /// Report for a job that never got to run its own pipeline
    pub fn failed(id: Uuid, input_path: PathBuf, output_dir: PathBuf, error: String) -> Self {
        Self {
            id,
            input_path,
            output_dir,
            status: JobStatus::Failed,
            blocks_planned: 0,
            written_blocks: Vec::new(),
            skipped_blocks: Vec::new(),
            write_failed_blocks: Vec::new(),
            frames_decoded: 0,
            frames_scored: 0,
            frames_failed: 0,
            warnings: Vec::new(),
            error: Some(error),
            elapsed_ms: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.skipped_blocks.is_empty() || !self.write_failed_blocks.is_empty()
    }
}

/// Collaborators shared by every job of a run
#[derive(Clone)]
pub struct JobContext {
    pub decoder: Arc<dyn VideoDecoder>,
    pub writer: Arc<dyn FrameWriter>,
    pub pool: WorkerPool,
    pub budget: MemoryBudget,
    pub metrics: SharedMetrics,
}

/// Bytes a job must be able to buffer at once: an incumbent and a challenger
pub fn min_footprint(info: &VideoInfo, mode: SamplingMode) -> Result<u64, PlanError> {
    let blocks = plan(info.total_frames, info.fps, mode)?;
    Ok(min_buffered_frames(&blocks) * info.frame_bytes())
}

/// A decoded frame together with the budget it occupies
#[derive(Debug)]
pub struct BufferedFrame {
    pub frame: Arc<Frame>,
    _token: BudgetToken,
}

impl BufferedFrame {
    pub fn position(&self) -> u64 {
        self.frame.position
    }
}

/// Best frame of a block seen so far
#[derive(Debug)]
pub struct BlockSelection {
    block: Block,
    best: Option<(f64, BufferedFrame)>,
    frames_seen: u64,
    scored: u64,
    failed: u64,
}

impl BlockSelection {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            best: None,
            frames_seen: 0,
            scored: 0,
            failed: 0,
        }
    }

    /// Offer a scored frame. The strictly greater score wins; equal scores
    /// keep the earlier position. Losers are dropped on the spot.
    pub fn offer(&mut self, frame: BufferedFrame, outcome: Result<f64, ScoreError>) {
        self.frames_seen += 1;
        let score = match outcome {
            Ok(score) => score,
            Err(e) => {
                self.failed += 1;
                debug!(
                    block = self.block.index,
                    position = frame.position(),
                    "frame excluded from block: {}",
                    e
                );
                return;
            }
        };
        self.scored += 1;

        let replace = match &self.best {
            None => true,
            Some((best_score, best)) => {
                score > *best_score || (score == *best_score && frame.position() < best.position())
            }
        };
        if replace {
            self.best = Some((score, frame));
        }
    }

    /// Count a frame that was lost without a score
    pub fn lost(&mut self) {
        self.frames_seen += 1;
        self.failed += 1;
    }

    pub fn winner(&self) -> Option<(f64, u64)> {
        self.best.as_ref().map(|(score, f)| (*score, f.position()))
    }

    fn into_winner(self) -> Option<BufferedFrame> {
        self.best.map(|(_, frame)| frame)
    }
}

type PumpItem = Result<BufferedFrame, JobError>;

/// One video to process
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub mode: SamplingMode,
    pub state: JobState,
    info: Option<VideoInfo>,
}

impl VideoJob {
    pub fn new(input_path: PathBuf, output_dir: PathBuf, mode: SamplingMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            output_dir,
            mode,
            state: JobState::Queued,
            info: None,
        }
    }

    /// Use already inspected stream properties instead of inspecting again
    pub fn with_info(mut self, info: VideoInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Run the job to a terminal state. Never panics on job errors; every
    /// outcome ends up in the returned report.
    pub async fn run(mut self, ctx: JobContext) -> JobReport {
        let span = info_span!("job", path = %self.input_path.display());
        async move {
            let started = Instant::now();
            let mut report = JobReport::new(&self);
            info!("job started");

            match self.execute(&ctx, &mut report).await {
                Ok(()) if report.is_degraded() => {
                    self.state = JobState::Degraded;
                    report.status = JobStatus::Degraded;
                    warn!(
                        skipped = report.skipped_blocks.len(),
                        write_failed = report.write_failed_blocks.len(),
                        "job completed degraded"
                    );
                }
                Ok(()) => {
                    self.state = JobState::Completed;
                    info!(files = report.written_blocks.len(), "job completed");
                }
                Err(e) => {
                    warn!(files = report.written_blocks.len(), "job failed: {}", e);
                    self.state = JobState::Failed(e.to_string());
                    report.status = JobStatus::Failed;
                    report.error = Some(e.to_string());
                }
            }

            report.elapsed_ms = started.elapsed().as_millis() as u64;
            self.publish(&ctx.metrics, &report).await;
            report
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self, ctx: &JobContext, report: &mut JobReport) -> Result<(), JobError> {
        self.enter(JobState::Decoding, &ctx.metrics, report).await;

        let info = match self.info.clone() {
            Some(info) => info,
            None => {
                let decoder = ctx.decoder.clone();
                let path = self.input_path.clone();
                tokio::task::spawn_blocking(move || decoder.inspect(&path))
                    .await
                    .map_err(|e| JobError::Panicked(e.to_string()))?
                    .map_err(JobError::Inspect)?
            }
        };

        let blocks = plan(info.total_frames, info.fps, self.mode)?;
        report.blocks_planned = blocks.len();
        debug!(
            frames = info.total_frames,
            fps = info.fps,
            blocks = blocks.len(),
            "block plan ready"
        );
        if blocks.is_empty() {
            return Ok(());
        }

        let reserve = min_buffered_frames(&blocks) * info.frame_bytes();
        let lease = Arc::new(ctx.budget.register(reserve).await?);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| JobError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;

        let (tx, mut frames) = mpsc::channel::<PumpItem>(1);
        {
            let decoder = ctx.decoder.clone();
            let path = self.input_path.clone();
            let info = info.clone();
            let lease = lease.clone();
            let handle = Handle::current();
            tokio::task::spawn_blocking(move || decode_pump(decoder, path, info, lease, tx, handle));
        }

        let mut carry: Option<BufferedFrame> = None;
        let mut stream_ended = false;
        let mut unreached = 0usize;

        for (i, block) in blocks.iter().enumerate() {
            let last = i + 1 == blocks.len();
            let mut selection = BlockSelection::new(*block);
            let mut in_flight: JoinSet<(BufferedFrame, ScoreResult)> = JoinSet::new();
            let mut receiving = !stream_ended;

            debug!(block = block.index, frames = block.frame_count(), "block started");
            self.enter(JobState::Buffering, &ctx.metrics, report).await;
            if let Some(frame) = carry.take() {
                if !last && frame.position() + 1 >= block.end {
                    receiving = false;
                }
                self.submit(ctx, *block, frame, &mut in_flight).await;
            }

            loop {
                tokio::select! {
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        match joined {
                            Ok((frame, result)) => selection.offer(frame, result.outcome),
                            Err(e) => {
                                warn!(block = block.index, "scoring task lost: {}", e);
                                selection.lost();
                            }
                        }
                    }
                    received = frames.recv(), if receiving => {
                        match received {
                            Some(Ok(frame)) => {
                                report.frames_decoded += 1;
                                if !last && !block.contains(frame.position()) {
                                    carry = Some(frame);
                                    receiving = false;
                                    continue;
                                }
                                if !last && frame.position() + 1 >= block.end {
                                    receiving = false;
                                }
                                self.enter(JobState::Scoring, &ctx.metrics, report).await;
                                self.submit(ctx, *block, frame, &mut in_flight).await;
                            }
                            Some(Err(e)) => return Err(e),
                            None => {
                                stream_ended = true;
                                receiving = false;
                            }
                        }
                    }
                    else => break,
                }
            }

            self.enter(JobState::Selecting, &ctx.metrics, report).await;
            report.frames_scored += selection.scored;
            report.frames_failed += selection.failed;

            if selection.frames_seen == 0 {
                unreached += 1;
                continue;
            }

            let winner = selection.winner();
            match selection.into_winner() {
                Some(frame) => {
                    self.enter(JobState::Writing, &ctx.metrics, report).await;
                    if let Some((score, position)) = winner {
                        debug!(block = block.index, position, score, "block winner selected");
                    }
                    self.write_winner(ctx, block.index, frame, report).await;
                }
                None => {
                    let message = format!(
                        "block {} skipped: all frames failed scoring",
                        block.index
                    );
                    warn!("{}", message);
                    report.skipped_blocks.push(block.index);
                    report.warnings.push(message);
                }
            }
            self.publish(&ctx.metrics, report).await;
        }

        if unreached > 0 {
            let message = format!(
                "stream ended early: {} of {} blocks had no frames",
                unreached,
                blocks.len()
            );
            warn!("{}", message);
            report.warnings.push(message);
        }

        Ok(())
    }

    async fn submit(
        &self,
        ctx: &JobContext,
        block: Block,
        frame: BufferedFrame,
        in_flight: &mut JoinSet<(BufferedFrame, ScoreResult)>,
    ) {
        let handle = ctx
            .pool
            .submit(ScoreTask {
                job: self.id,
                block: block.index,
                frame: frame.frame.clone(),
            })
            .await;
        in_flight.spawn(async move {
            let result = handle.resolve().await;
            (frame, result)
        });
    }

    async fn write_winner(
        &self,
        ctx: &JobContext,
        block_index: usize,
        frame: BufferedFrame,
        report: &mut JobReport,
    ) {
        let dest = frame_file_name(&self.output_dir, block_index, ctx.writer.extension());
        let writer = ctx.writer.clone();
        let pixels = frame.frame.clone();
        let target = dest.clone();
        let written = tokio::task::spawn_blocking(move || writer.write(&pixels, &target)).await;
        // The winner's budget is released only once it is on disk
        drop(frame);

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("writer panicked: {}", e)),
        };
        match failure {
            None => {
                debug!(block = block_index, dest = %dest.display(), "frame written");
                report.written_blocks.push(block_index);
            }
            Some(e) => {
                let message = format!("block {}: failed to write {}: {}", block_index, dest.display(), e);
                warn!("{}", message);
                report.write_failed_blocks.push(block_index);
                report.warnings.push(message);
            }
        }
    }

    /// Move to `state`, publishing the change
    async fn enter(&mut self, state: JobState, metrics: &SharedMetrics, report: &JobReport) {
        if self.state != state {
            self.state = state;
            self.publish(metrics, report).await;
        }
    }

    async fn publish(&self, metrics: &SharedMetrics, report: &JobReport) {
        let job_metrics = JobMetrics {
            id: self.id.to_string(),
            input_path: self.input_path.to_string_lossy().to_string(),
            stage: self.state.as_str().to_string(),
            blocks_total: report.blocks_planned as u64,
            blocks_done: (report.written_blocks.len()
                + report.skipped_blocks.len()
                + report.write_failed_blocks.len()) as u64,
            frames_decoded: report.frames_decoded,
            frames_scored: report.frames_scored,
            frames_failed: report.frames_failed,
            files_written: report.written_blocks.len() as u64,
        };
        metrics.write().await.upsert_job(job_metrics);
    }
}

/// Decode frames in order, taking a budget token before each read.
///
/// Runs on a blocking thread. Stops at end of stream, on the first error, or
/// once the job stops listening.
fn decode_pump(
    decoder: Arc<dyn VideoDecoder>,
    path: PathBuf,
    info: VideoInfo,
    lease: Arc<JobBudget>,
    tx: mpsc::Sender<PumpItem>,
    handle: Handle,
) {
    let mut source = match decoder.open(&path, &info) {
        Ok(source) => source,
        Err(e) => {
            let _ = tx.blocking_send(Err(JobError::Decode(e)));
            return;
        }
    };
    let frame_bytes = info.frame_bytes();

    loop {
        let granted = handle.block_on(async {
            tokio::select! {
                token = lease.acquire(frame_bytes) => Some(token),
                _ = tx.closed() => None,
            }
        });
        let token = match granted {
            Some(Ok(token)) => token,
            Some(Err(e)) => {
                let _ = tx.blocking_send(Err(JobError::Budget(e)));
                return;
            }
            None => return,
        };

        match source.next_frame() {
            Ok(Some(frame)) => {
                let buffered = BufferedFrame {
                    frame: Arc::new(frame),
                    _token: token,
                };
                if tx.blocking_send(Ok(buffered)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(Err(JobError::Decode(e)));
                return;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::metrics::new_shared_metrics;
    use std::time::Duration;
    use tempfile::TempDir;

    fn run_single(
        video: SyntheticVideo,
        mode: SamplingMode,
        writer: Arc<RecordingWriter>,
        memory_frames: u64,
    ) -> (JobReport, JobContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        let ctx = context(
            SyntheticDecoder::default().with(input.clone(), video),
            writer,
            Arc::new(ByteScorer::new(Duration::ZERO)),
            2,
            memory_frames * FRAME_BYTES,
        );
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let job = VideoJob::new(input.clone(), dir.path().join("out").join("clip"), mode);
        let report = runtime
            .block_on(async { tokio::time::timeout(Duration::from_secs(20), job.run(ctx.clone())).await })
            .expect("job should reach a terminal state");
        (report, ctx, dir)
    }

    // Single-frame blocks and a stream running past the reported count: the
    // last block needs an incumbent and a challenger
    #[test]
    fn test_long_stream_with_single_frame_blocks_needs_two_frames() {
        let writer = Arc::new(RecordingWriter::default());
        let mut video = SyntheticVideo::new(5, 10.0, Arc::new(|p| Some(p as u8)));
        video.frames = 8;

        assert_eq!(
            min_footprint(&video.info, SamplingMode::Count(10)).unwrap(),
            2 * FRAME_BYTES
        );

        let (report, ctx, _dir) =
            run_single(video.clone(), SamplingMode::Count(10), writer.clone(), 1);
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error.unwrap().contains("Memory budget error"));
        assert!(writer.writes.lock().unwrap().is_empty());
        assert_eq!(ctx.budget.active_jobs(), 0);

        let (report, ctx, _dir) = run_single(video, SamplingMode::Count(10), writer.clone(), 2);
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.frames_decoded, 8);
        assert_eq!(writer.positions_for("clip"), vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 7)]);
        assert!(ctx.budget.peak_outstanding() <= 2 * FRAME_BYTES);
    }

    #[test]
    fn test_stage_is_published_on_each_transition() {
        let metrics = new_shared_metrics();
        let writer = Arc::new(RecordingWriter {
            metrics: Some(metrics.clone()),
            ..RecordingWriter::default()
        });
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        let mut ctx = context(
            SyntheticDecoder::default().with(input.clone(), SyntheticVideo::new(30, 10.0, Arc::new(|p| Some(p as u8)))),
            writer.clone(),
            Arc::new(ByteScorer::new(Duration::ZERO)),
            2,
            8 * FRAME_BYTES,
        );
        ctx.metrics = metrics.clone();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let mut job = VideoJob::new(input.clone(), dir.path().join("clip"), SamplingMode::Every(1.0));
            let report = JobReport::new(&job);
            job.enter(JobState::Scoring, &metrics, &report).await;
            assert_eq!(metrics.read().await.jobs[0].stage, "scoring");
            job.enter(JobState::Selecting, &metrics, &report).await;
            assert_eq!(metrics.read().await.jobs[0].stage, "selecting");

            let report = VideoJob::new(input.clone(), dir.path().join("clip"), SamplingMode::Every(1.0))
                .run(ctx.clone())
                .await;
            assert_eq!(report.status, JobStatus::Completed);
        });

        let stages = writer.stages.lock().unwrap();
        // The first job above stays in "selecting"; the running job shows "writing"
        assert_eq!(stages.len(), 3 * 2);
        assert!(stages.iter().filter(|s| *s == "writing").count() == 3);
        assert!(stages.iter().all(|s| s == "writing" || s == "selecting"));
    }

    // 100 frames at 10 fps, one per second
    #[test]
    fn test_every_second_writes_one_file_per_block() {
        let writer = Arc::new(RecordingWriter::default());
        let video = SyntheticVideo::new(100, 10.0, Arc::new(|p| Some(((p * 7) % 10) as u8)));
        let (report, ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 64);

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.blocks_planned, 10);
        assert_eq!(report.written_blocks, (0..10).collect::<Vec<_>>());
        assert_eq!(report.frames_decoded, 100);
        assert_eq!(report.frames_scored, 100);

        // (p * 7) % 10 peaks at p % 10 == 7
        let writes = writer.positions_for("clip");
        let expected: Vec<(usize, u64)> = (0..10).map(|b| (b, b as u64 * 10 + 7)).collect();
        assert_eq!(writes, expected);

        assert_eq!(ctx.budget.outstanding(), 0);
        assert_eq!(ctx.budget.committed(), 0);
    }

    #[test]
    fn test_equal_scores_keep_earliest_frame() {
        let writer = Arc::new(RecordingWriter::default());
        let video = SyntheticVideo::new(33, 25.0, Arc::new(|_| Some(5)));
        let (report, _ctx, _dir) =
            run_single(video, SamplingMode::Count(10), writer.clone(), 8);

        assert_eq!(report.status, JobStatus::Completed);
        let blocks = plan(33, 25.0, SamplingMode::Count(10)).unwrap();
        let expected: Vec<(usize, u64)> = blocks.iter().map(|b| (b.index, b.start)).collect();
        assert_eq!(writer.positions_for("clip"), expected);
    }

    #[test]
    fn test_block_with_all_frames_failing_is_skipped() {
        let writer = Arc::new(RecordingWriter::default());
        // Block 2 (positions 20..30) fails entirely, block 4 partially
        let video = SyntheticVideo::new(
            50,
            10.0,
            Arc::new(|p| match p {
                20..=29 => None,
                40..=44 => None,
                _ => Some((p % 10) as u8),
            }),
        );
        let (report, _ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 16);

        assert_eq!(report.status, JobStatus::Degraded);
        assert_eq!(report.skipped_blocks, vec![2]);
        assert_eq!(report.written_blocks, vec![0, 1, 3, 4]);
        assert_eq!(report.frames_failed, 15);
        assert_eq!(writer.positions_for("clip").last(), Some(&(4, 49)));
        assert!(report.warnings.iter().any(|w| w.contains("block 2")));
    }

    #[test]
    fn test_write_failure_degrades_and_continues() {
        let writer = Arc::new(RecordingWriter {
            fail_blocks: vec![1],
            ..RecordingWriter::default()
        });
        let video = SyntheticVideo::new(30, 10.0, Arc::new(|p| Some(p as u8)));
        let (report, ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 16);

        assert_eq!(report.status, JobStatus::Degraded);
        assert_eq!(report.write_failed_blocks, vec![1]);
        assert_eq!(report.written_blocks, vec![0, 2]);
        assert_eq!(ctx.budget.outstanding(), 0);
    }

    #[test]
    fn test_decode_error_fails_job_and_keeps_written_files() {
        let writer = Arc::new(RecordingWriter::default());
        let mut video = SyntheticVideo::new(100, 10.0, Arc::new(|p| Some(p as u8)));
        video.fail_at = Some(35);
        let (report, ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 16);

        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error.as_deref().unwrap_or_default().contains("Decode failed"));
        assert_eq!(report.written_blocks, vec![0, 1, 2]);
        assert_eq!(writer.positions_for("clip").len(), 3);

        // Tokens of abandoned frames come back
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctx.budget.outstanding(), 0);
    }

    // The budget holds three frames, blocks hold ten
    #[test]
    fn test_blocks_larger_than_budget_score_incrementally() {
        let writer = Arc::new(RecordingWriter::default());
        let video = SyntheticVideo::new(40, 10.0, Arc::new(|p| Some(((p * 3) % 10) as u8)));
        let (report, ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 3);

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.written_blocks, vec![0, 1, 2, 3]);
        assert!(ctx.budget.peak_outstanding() <= 3 * FRAME_BYTES);
        // (p * 3) % 10 peaks at p % 10 == 3
        assert_eq!(writer.positions_for("clip")[0], (0, 3));
    }

    #[test]
    fn test_short_stream_completes_with_warning() {
        let writer = Arc::new(RecordingWriter::default());
        let mut video = SyntheticVideo::new(100, 10.0, Arc::new(|p| Some(p as u8)));
        video.frames = 45;
        let (report, _ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 16);

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.written_blocks, vec![0, 1, 2, 3, 4]);
        assert_eq!(writer.positions_for("clip").last(), Some(&(4, 44)));
        assert!(report.warnings.iter().any(|w| w.contains("5 of 10")));
    }

    #[test]
    fn test_long_stream_extends_last_block() {
        let writer = Arc::new(RecordingWriter::default());
        let mut video = SyntheticVideo::new(20, 10.0, Arc::new(|p| Some(p as u8)));
        video.frames = 26;
        let (report, _ctx, _dir) =
            run_single(video, SamplingMode::Every(1.0), writer.clone(), 16);

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.frames_decoded, 26);
        assert_eq!(writer.positions_for("clip"), vec![(0, 9), (1, 25)]);
    }

    #[test]
    fn test_empty_stream_completes_without_output() {
        let writer = Arc::new(RecordingWriter::default());
        let video = SyntheticVideo::new(0, 30.0, Arc::new(|_| Some(1)));
        let (report, _ctx, dir) =
            run_single(video, SamplingMode::Count(5), writer.clone(), 4);

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.blocks_planned, 0);
        assert!(report.written_blocks.is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_inspection_failure_fails_job() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            SyntheticDecoder::default(),
            Arc::new(RecordingWriter::default()),
            Arc::new(ByteScorer::new(Duration::ZERO)),
            1,
            1024,
        );
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let job = VideoJob::new(dir.path().join("nope.mp4"), dir.path().join("nope"), SamplingMode::Count(3));
        let report = runtime.block_on(job.run(ctx));
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error.unwrap().contains("Inspection failed"));
    }

    #[test]
    fn test_selection_prefers_higher_then_earlier() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let budget = MemoryBudget::new(100);
            let lease = budget.register(0).await.unwrap();
            let buffered = |position: u64| BufferedFrame {
                frame: Arc::new(Frame::new(position, 1, 1, vec![0, 0, 0])),
                _token: lease.try_acquire(3).unwrap(),
            };

            let mut selection = BlockSelection::new(Block { index: 0, start: 0, end: 5 });
            selection.offer(buffered(1), Ok(2.0));
            selection.offer(buffered(2), Ok(5.0));
            selection.offer(buffered(3), Err(ScoreError::WorkerPanicked));
            selection.offer(buffered(0), Ok(5.0));
            selection.offer(buffered(4), Ok(4.0));

            assert_eq!(selection.winner(), Some((5.0, 0)));
            assert_eq!(selection.failed, 1);
            // Only the winner still holds budget
            assert_eq!(budget.outstanding(), 3);
        });
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Scoring.as_str(), "scoring");
        assert_eq!(JobState::Failed("x".into()).as_str(), "failed");
    }
}

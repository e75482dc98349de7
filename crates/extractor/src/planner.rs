//! Block planning
//!
//! Splits a stream of `total_frames` frames into contiguous, non-overlapping
//! blocks. One frame is selected from each block.

use crate::config::SamplingMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for block planning
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    /// The stream reported a frame rate that cannot be used for `every`
    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    /// The sampling mode carried a non-positive value
    #[error("Invalid sampling value: {0}")]
    InvalidValue(String),
}

/// A contiguous run of frames `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Zero-based block index, also the output file index
    pub index: usize,
    pub start: u64,
    /// Exclusive
    pub end: u64,
}

impl Block {
    /// Planned frames; the stream may deliver more into the last block
    pub fn frame_count(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Compute the block plan for a stream.
///
/// - `Every(seconds)`: stride of `max(1, round(seconds * fps))` frames, the
///   last block holds the remainder.
/// - `Count(n)`: `min(n, total_frames)` blocks whose lengths differ by at most
///   one frame.
///
/// An empty stream yields an empty plan.
pub fn plan(total_frames: u64, fps: f64, mode: SamplingMode) -> Result<Vec<Block>, PlanError> {
    match mode {
        SamplingMode::Every(seconds) => {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(PlanError::InvalidValue(format!("every={}", seconds)));
            }
            if !fps.is_finite() || fps <= 0.0 {
                return Err(PlanError::InvalidFrameRate(fps));
            }
            let stride = stride_for_interval(seconds, fps);
            Ok(plan_by_stride(total_frames, stride))
        }
        SamplingMode::Count(0) => Err(PlanError::InvalidValue("count=0".to_string())),
        SamplingMode::Count(count) => Ok(plan_by_count(total_frames, count as u64)),
    }
}

/// Block length in frames for an interval in seconds
pub fn stride_for_interval(seconds: f64, fps: f64) -> u64 {
    let frames = (seconds * fps).round();
    if frames < 1.0 {
        1
    } else {
        frames as u64
    }
}

fn plan_by_stride(total_frames: u64, stride: u64) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(total_frames.div_ceil(stride) as usize);
    let mut start = 0;
    while start < total_frames {
        let end = (start + stride).min(total_frames);
        blocks.push(Block {
            index: blocks.len(),
            start,
            end,
        });
        start = end;
    }
    blocks
}

fn plan_by_count(total_frames: u64, count: u64) -> Vec<Block> {
    let blocks = count.min(total_frames);
    // Boundaries at floor(i * T / N) spread the remainder evenly
    (0..blocks)
        .map(|i| Block {
            index: i as usize,
            start: boundary(i, total_frames, blocks),
            end: boundary(i + 1, total_frames, blocks),
        })
        .collect()
}

fn boundary(i: u64, total_frames: u64, blocks: u64) -> u64 {
    ((i as u128 * total_frames as u128) / blocks as u128) as u64
}

/// Frames a job must be able to hold at once to select from its blocks: an
/// incumbent and a challenger.
///
/// Two even when every planned block has one frame, since the last block
/// takes whatever the stream delivers past the reported frame count.
pub fn min_buffered_frames(blocks: &[Block]) -> u64 {
    if blocks.is_empty() {
        0
    } else {
        2
    }
}

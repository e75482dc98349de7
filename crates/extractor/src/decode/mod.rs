//! Video decoding
//!
//! A decoder inspects a video for the properties needed to plan and budget a
//! job, then opens it as a blocking, ordered source of RGB24 frames.

pub mod ffmpeg;

use crate::frame::{Frame, VideoInfo};
use std::path::Path;
use thiserror::Error;

pub use ffmpeg::{parse_stream_info, parse_rational, FfmpegDecoder, RawFrameReader};

/// Error type for probing and decoding a video
#[derive(Debug, Error)]
pub enum DecodeError {
    /// ffprobe or ffmpeg could not be run, or exited with an error
    #[error("{tool} failed: {message}")]
    ToolFailed { tool: &'static str, message: String },

    /// Failed to parse ffprobe JSON output
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The container has no video stream
    #[error("No video stream found")]
    NoVideoStream,

    /// The video stream reports unusable properties
    #[error("Invalid video stream: {0}")]
    InvalidStream(String),

    /// The stream ended in the middle of a frame
    #[error("Truncated frame at position {position}: got {actual} of {expected} bytes")]
    Truncated {
        position: u64,
        expected: u64,
        actual: u64,
    },

    /// IO error while reading decoded data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered, finite sequence of decoded frames
///
/// `Ok(None)` signals end of stream. Calls block until a frame is available.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;
}

/// Opens videos as frame sources
pub trait VideoDecoder: Send + Sync {
    /// Read stream properties without decoding frames
    fn inspect(&self, path: &Path) -> Result<VideoInfo, DecodeError>;

    /// Start decoding. Frames come back in stream order with positions 0, 1, 2, ...
    fn open(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>, DecodeError>;
}

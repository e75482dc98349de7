//! Decoded frames and the stream properties they come from

use serde::{Deserialize, Serialize};

/// Bytes per pixel of the decoded RGB24 frames
pub const BYTES_PER_PIXEL: u64 = 3;

/// Properties of a video stream needed to plan and budget a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    pub duration_secs: f64,
    /// Frame count reported (or estimated) by the container
    pub total_frames: u64,
}

impl VideoInfo {
    /// Size in bytes of one decoded frame
    pub fn frame_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * BYTES_PER_PIXEL
    }
}

/// One decoded frame, packed RGB24, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Zero-based position in the source stream
    pub position: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(position: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            position,
            width,
            height,
            data,
        }
    }

    /// Memory footprint of the pixel buffer
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }
}

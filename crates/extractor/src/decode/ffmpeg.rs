//! ffprobe/ffmpeg backed decoder
//!
//! Inspection runs `ffprobe -v quiet -print_format json -show_streams -show_format`.
//! Decoding pipes `ffmpeg -f rawvideo -pix_fmt rgb24` output and cuts it into
//! frames of exactly `width * height * 3` bytes.

use super::{DecodeError, FrameSource, VideoDecoder};
use crate::frame::{Frame, VideoInfo, BYTES_PER_PIXEL};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::debug;

/// Raw ffprobe JSON structures
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub nb_frames: Option<String>,
        pub duration: Option<String>,
        pub tags: Option<StreamTags>,
        pub side_data_list: Option<Vec<SideData>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct StreamTags {
        pub rotate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub rotation: Option<f64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parse an ffprobe rational such as `30000/1001` or a plain number.
///
/// Returns `None` for `0/0` and anything that is not a positive, finite rate.
pub fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Display rotation of a stream in degrees, normalized to `0..360`.
///
/// Newer ffprobe reports it as display matrix side data, older builds as a
/// `rotate` tag.
fn stream_rotation(stream: &ffprobe_json::Stream) -> u32 {
    let degrees = stream
        .side_data_list
        .iter()
        .flatten()
        .find_map(|side| side.rotation)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.trim().parse::<f64>().ok())
        })
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    (degrees.round() as i64).rem_euclid(360) as u32
}

/// Build [`VideoInfo`] from ffprobe JSON output, using the first video stream.
///
/// Dimensions are those of the decoded output: ffmpeg applies the display
/// rotation, so quarter turns swap width and height.
pub fn parse_stream_info(json_str: &str) -> Result<VideoInfo, DecodeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| DecodeError::ParseError(e.to_string()))?;

    let stream = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(DecodeError::NoVideoStream)?;

    let (mut width, mut height) = (stream.width.unwrap_or(0), stream.height.unwrap_or(0));
    if matches!(stream_rotation(&stream), 90 | 270) {
        std::mem::swap(&mut width, &mut height);
    }
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidStream(format!(
            "bad dimensions {}x{}",
            width, height
        )));
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
        .ok_or_else(|| DecodeError::InvalidStream("no usable frame rate".to_string()))?;

    let duration_secs = stream
        .duration
        .as_deref()
        .or(ffprobe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| (duration_secs * fps).ceil() as u64);

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration_secs,
        total_frames,
    })
}

/// Cuts a byte stream of packed RGB24 pixels into frames
pub struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    frame_bytes: usize,
    next_position: u64,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        let frame_bytes = width as usize * height as usize * BYTES_PER_PIXEL as usize;
        Self {
            reader,
            width,
            height,
            frame_bytes,
            next_position: 0,
        }
    }

    /// Read the next frame. A clean end at a frame boundary is `Ok(None)`.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let mut data = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < data.len() {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < data.len() {
            return Err(DecodeError::Truncated {
                position: self.next_position,
                expected: self.frame_bytes as u64,
                actual: filled as u64,
            });
        }

        let frame = Frame::new(self.next_position, self.width, self.height, data);
        self.next_position += 1;
        Ok(Some(frame))
    }
}

/// Frames piped from a running ffmpeg process
struct FfmpegSource {
    child: Child,
    frames: RawFrameReader<BufReader<ChildStdout>>,
    finished: bool,
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        match self.frames.read_frame()? {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.finished = true;
                let status = self.child.wait()?;
                if status.success() {
                    Ok(None)
                } else {
                    Err(DecodeError::ToolFailed {
                        tool: "ffmpeg",
                        message: format!("exited with {}", status),
                    })
                }
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The job stopped reading early; don't leave ffmpeg running
        if let Err(e) = self.child.kill() {
            debug!("failed to kill ffmpeg: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// [`VideoDecoder`] using the ffprobe and ffmpeg binaries on `PATH`
#[derive(Debug, Clone, Default)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn inspect(&self, path: &Path) -> Result<VideoInfo, DecodeError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::ToolFailed {
                tool: "ffprobe",
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_stream_info(&stdout)
    }

    fn open(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSource>, DecodeError> {
        let mut child = Command::new("ffmpeg")
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| DecodeError::ToolFailed {
            tool: "ffmpeg",
            message: "unable to access stdout".to_string(),
        })?;

        debug!(path = %path.display(), width = info.width, height = info.height, "ffmpeg decoder started");
        Ok(Box::new(FfmpegSource {
            child,
            frames: RawFrameReader::new(BufReader::new(stdout), info.width, info.height),
            finished: false,
        }))
    }
}

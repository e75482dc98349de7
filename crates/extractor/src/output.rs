//! Writing selected frames to image files
//!
//! Output files are named after the block index, not the stream position:
//! `frame-00000.png`, `frame-00001.png`, ...

use crate::config::ImageFormat;
use crate::frame::Frame;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for writing one selected frame
#[derive(Debug, Error)]
pub enum WriteError {
    /// The frame buffer does not match its dimensions
    #[error("Frame at position {position} has a malformed pixel buffer")]
    MalformedFrame { position: u64 },

    /// Image encoding failed
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// IO error while writing or moving the file into place
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a frame into an image file
///
/// A writer is never called concurrently for the same destination.
pub trait FrameWriter: Send + Sync {
    /// File extension of the written images, without the dot
    fn extension(&self) -> &str;

    /// Write `frame` to `dest`, replacing any existing file
    fn write(&self, frame: &Frame, dest: &Path) -> Result<(), WriteError>;
}

/// Output file path for a block: `<dir>/frame-<index:05>.<ext>`
pub fn frame_file_name(dir: &Path, block_index: usize, extension: &str) -> PathBuf {
    dir.join(format!("frame-{:05}.{}", block_index, extension))
}

/// [`FrameWriter`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFrameWriter {
    format: ImageFormat,
}

impl ImageFrameWriter {
    pub fn new(format: ImageFormat) -> Self {
        Self { format }
    }

    fn image_format(&self) -> image::ImageFormat {
        match self.format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl FrameWriter for ImageFrameWriter {
    fn extension(&self) -> &str {
        self.format.extension()
    }

    fn write(&self, frame: &Frame, dest: &Path) -> Result<(), WriteError> {
        let expected = frame.width as u64 * frame.height as u64 * 3;
        if frame.byte_size() != expected || expected == 0 {
            return Err(WriteError::MalformedFrame {
                position: frame.position,
            });
        }

        // Encode next to the destination, then move it into place so a
        // failed write never leaves a partial image behind
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let encoded = image::save_buffer_with_format(
            &partial,
            &frame.data,
            frame.width,
            frame.height,
            image::ColorType::Rgb8,
            self.image_format(),
        );
        if let Err(e) = encoded {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&partial, dest) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gradient(position: u64) -> Frame {
        let (w, h) = (8u32, 6u32);
        let data = (0..w * h)
            .flat_map(|i| [(i * 5) as u8, (i * 3) as u8, 200])
            .collect();
        Frame::new(position, w, h, data)
    }

    #[test]
    fn test_frame_file_name() {
        let dir = Path::new("/out/clip");
        assert_eq!(
            frame_file_name(dir, 0, "png"),
            PathBuf::from("/out/clip/frame-00000.png")
        );
        assert_eq!(
            frame_file_name(dir, 123, "jpg"),
            PathBuf::from("/out/clip/frame-00123.jpg")
        );
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let dir = TempDir::new().unwrap();
        let writer = ImageFrameWriter::new(ImageFormat::Png);
        let frame = gradient(4);
        let dest = frame_file_name(dir.path(), 0, writer.extension());

        writer.write(&frame, &dest).unwrap();

        let img = image::open(&dest).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.into_raw(), frame.data);
        assert!(!dir.path().join("frame-00000.png.partial").exists());
    }

    #[test]
    fn test_jpeg_writes_file() {
        let dir = TempDir::new().unwrap();
        let writer = ImageFrameWriter::new(ImageFormat::Jpeg);
        assert_eq!(writer.extension(), "jpg");

        let dest = frame_file_name(dir.path(), 2, writer.extension());
        writer.write(&gradient(0), &dest).unwrap();
        assert!(fs::metadata(&dest).unwrap().len() > 0);
    }

    #[test]
    fn test_existing_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let writer = ImageFrameWriter::default();
        let dest = frame_file_name(dir.path(), 0, writer.extension());
        fs::write(&dest, b"stale").unwrap();

        writer.write(&gradient(0), &dest).unwrap();
        assert!(image::open(&dest).is_ok());
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = ImageFrameWriter::default();
        let frame = Frame::new(9, 4, 4, vec![0; 5]);
        let err = writer
            .write(&frame, &dir.path().join("frame-00000.png"))
            .unwrap_err();
        assert!(matches!(err, WriteError::MalformedFrame { position: 9 }));
    }

    #[test]
    fn test_missing_directory_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let writer = ImageFrameWriter::default();
        let dest = dir.path().join("missing").join("frame-00000.png");
        assert!(writer.write(&gradient(0), &dest).is_err());
    }
}

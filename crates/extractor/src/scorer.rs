//! Sharpness scoring
//!
//! A scorer maps one frame to a non-negative focus measure. Scorers are pure:
//! identical pixels always give the identical score, and the frame is never
//! modified.

use crate::config::{CenterWeight, ScoringSettings};
use crate::frame::Frame;
use thiserror::Error;

/// Error type for scoring a single frame
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoreError {
    /// The frame buffer does not match its dimensions
    #[error("Malformed frame at position {position}: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        position: u64,
        expected: u64,
        actual: u64,
    },

    /// The scorer produced a negative or non-finite value
    #[error("Invalid score {0}")]
    InvalidScore(f64),

    /// The scorer panicked while processing the frame
    #[error("Scoring worker panicked")]
    WorkerPanicked,

    /// The worker went away before reporting a result
    #[error("Scoring worker dropped the task")]
    WorkerLost,

    /// The pool was shut down
    #[error("Worker pool is closed")]
    PoolClosed,
}

/// Focus measure for one frame
pub trait SharpnessScorer: Send + Sync {
    fn score(&self, frame: &Frame) -> Result<f64, ScoreError>;
}

/// Tenengrad focus measure: mean Sobel gradient energy of the luma plane,
/// optionally weighted towards the frame center.
#[derive(Debug, Clone)]
pub struct TenengradScorer {
    weight: CenterWeight,
    sigma_fraction: f64,
}

impl Default for TenengradScorer {
    fn default() -> Self {
        Self::new(&ScoringSettings::default())
    }
}

impl TenengradScorer {
    pub fn new(settings: &ScoringSettings) -> Self {
        let sigma_fraction = settings.gaussian_sigma_fraction as f64;
        Self {
            weight: settings.center_weight,
            sigma_fraction: if sigma_fraction > 0.0 && sigma_fraction <= 1.0 {
                sigma_fraction
            } else {
                0.22
            },
        }
    }

    /// One-dimensional window over `n` samples, `None` for uniform weighting
    fn window(&self, n: usize) -> Option<Vec<f64>> {
        match self.weight {
            CenterWeight::None => None,
            CenterWeight::Hann => Some(hann(n)),
            CenterWeight::Gaussian => Some(gaussian(n, self.sigma_fraction)),
        }
    }
}

fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

fn gaussian(n: usize, sigma_fraction: f64) -> Vec<f64> {
    let sigma = (n as f64 * sigma_fraction).max(1.0);
    let center = (n as f64 - 1.0) / 2.0;
    (0..n)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect()
}

fn luma(frame: &Frame) -> Vec<f64> {
    frame
        .data
        .chunks_exact(3)
        .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
        .collect()
}

impl SharpnessScorer for TenengradScorer {
    fn score(&self, frame: &Frame) -> Result<f64, ScoreError> {
        let expected = frame.width as u64 * frame.height as u64 * 3;
        if frame.byte_size() != expected {
            return Err(ScoreError::MalformedFrame {
                position: frame.position,
                expected,
                actual: frame.byte_size(),
            });
        }

        let (w, h) = (frame.width as usize, frame.height as usize);
        if w < 3 || h < 3 {
            return Ok(0.0);
        }

        let gray = luma(frame);
        let at = |x: usize, y: usize| gray[y * w + x];
        let wx = self.window(w);
        let wy = self.window(h);

        let mut energy = 0.0;
        let mut total_weight = 0.0;
        for y in 1..h - 1 {
            let row_weight = wy.as_ref().map_or(1.0, |v| v[y]);
            for x in 1..w - 1 {
                let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                    - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
                let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                    - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
                let weight = row_weight * wx.as_ref().map_or(1.0, |v| v[x]);
                energy += weight * (gx * gx + gy * gy);
                total_weight += weight;
            }
        }

        if total_weight <= 0.0 {
            return Ok(0.0);
        }
        Ok(energy / total_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from_gray(position: u64, width: u32, height: u32, gray: impl Fn(u32, u32) -> u8) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = gray(x, y);
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(position, width, height, data)
    }

    fn checkerboard(position: u64) -> Frame {
        frame_from_gray(position, 32, 32, |x, y| if (x / 2 + y / 2) % 2 == 0 { 0 } else { 255 })
    }

    fn smooth_gradient(position: u64) -> Frame {
        frame_from_gray(position, 32, 32, |x, _| (x * 4) as u8)
    }

    #[test]
    fn test_flat_frame_scores_zero() {
        let frame = frame_from_gray(0, 16, 16, |_, _| 128);
        for weight in [CenterWeight::None, CenterWeight::Hann, CenterWeight::Gaussian] {
            let scorer = TenengradScorer::new(&ScoringSettings {
                center_weight: weight,
                ..ScoringSettings::default()
            });
            assert_eq!(scorer.score(&frame).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_sharp_frame_beats_smooth_frame() {
        let scorer = TenengradScorer::default();
        let sharp = scorer.score(&checkerboard(0)).unwrap();
        let smooth = scorer.score(&smooth_gradient(1)).unwrap();
        assert!(sharp > smooth, "sharp {} should beat smooth {}", sharp, smooth);
        assert!(smooth >= 0.0);
    }

    #[test]
    fn test_identical_pixels_identical_scores() {
        let scorer = TenengradScorer::default();
        let a = scorer.score(&checkerboard(3)).unwrap();
        let b = scorer.score(&checkerboard(99)).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    // The same pixels scored concurrently on separate pool workers
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_identical_pixels_identical_scores_across_workers() {
        use crate::worker_pool::{ScoreTask, WorkerPool};
        use std::sync::Arc;

        let textured = |position| {
            frame_from_gray(position, 48, 40, |x, y| ((x * 37 + y * 91 + x * y * 13) % 251) as u8)
        };
        let pool = WorkerPool::new(2, Arc::new(TenengradScorer::default()));
        let job = uuid::Uuid::new_v4();

        for _ in 0..8 {
            let first = pool
                .submit(ScoreTask { job, block: 0, frame: Arc::new(textured(1)) })
                .await;
            let second = pool
                .submit(ScoreTask { job, block: 0, frame: Arc::new(textured(2)) })
                .await;
            let a = first.resolve().await.outcome.unwrap();
            let b = second.resolve().await.outcome.unwrap();
            assert!(a > 0.0);
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_tiny_frame_scores_zero() {
        let scorer = TenengradScorer::default();
        let frame = frame_from_gray(0, 2, 2, |x, _| (x * 200) as u8);
        assert_eq!(scorer.score(&frame).unwrap(), 0.0);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let scorer = TenengradScorer::default();
        let frame = Frame::new(7, 4, 4, vec![0; 10]);
        assert_eq!(
            scorer.score(&frame),
            Err(ScoreError::MalformedFrame {
                position: 7,
                expected: 48,
                actual: 10
            })
        );
    }

    #[test]
    fn test_scoring_does_not_modify_frame() {
        let scorer = TenengradScorer::default();
        let frame = checkerboard(0);
        let before = frame.clone();
        scorer.score(&frame).unwrap();
        assert_eq!(frame, before);
    }

    #[test]
    fn test_windows_are_symmetric() {
        for window in [hann(9), gaussian(9, 0.22)] {
            for i in 0..9 {
                assert!((window[i] - window[8 - i]).abs() < 1e-12);
            }
            assert!(window[4] >= window[0]);
        }
    }
}

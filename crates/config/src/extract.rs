//! Validated run configuration consumed by the extractor core

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a video's frames are grouped into blocks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Aim for this many output frames per video
    Count(u32),
    /// One output frame per this many seconds of video
    Every(f64),
}

impl SamplingMode {
    /// Build a mode from the two mutually exclusive options.
    pub fn from_options(count: Option<u32>, every: Option<f64>) -> Result<Self, ConfigError> {
        let mode = match (count, every) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingModes),
            (None, None) => return Err(ConfigError::MissingMode),
            (Some(n), None) => SamplingMode::Count(n),
            (None, Some(seconds)) => SamplingMode::Every(seconds),
        };
        mode.validate()?;
        Ok(mode)
    }

    /// Reject non-positive mode values
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            SamplingMode::Count(0) => Err(ConfigError::InvalidCount(0)),
            SamplingMode::Count(_) => Ok(()),
            SamplingMode::Every(seconds) if !seconds.is_finite() || seconds <= 0.0 => {
                Err(ConfigError::InvalidInterval(seconds))
            }
            SamplingMode::Every(_) => Ok(()),
        }
    }
}

impl std::fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingMode::Count(n) => write!(f, "count={}", n),
            SamplingMode::Every(seconds) => write!(f, "every={}s", seconds),
        }
    }
}

/// Everything the extractor needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Videos to process, in queue order
    pub video_paths: Vec<PathBuf>,
    /// Base output directory; `None` writes next to each video
    pub output_base: Option<PathBuf>,
    pub mode: SamplingMode,
    /// Maximum number of concurrently running video jobs (J)
    pub jobs: u32,
    /// Number of scoring workers shared by all jobs (W)
    pub workers: u32,
    /// Global budget for buffered frame bytes (M)
    pub memory_limit_bytes: u64,
}

impl ExtractConfig {
    /// Check every invariant of the configuration.
    ///
    /// Only touches the filesystem to check that inputs exist; nothing is
    /// opened or written.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mode.validate()?;

        if self.jobs == 0 {
            return Err(ConfigError::InvalidLimit { name: "jobs" });
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidLimit { name: "workers" });
        }
        if self.memory_limit_bytes == 0 {
            return Err(ConfigError::InvalidLimit {
                name: "memory limit",
            });
        }

        if self.video_paths.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        for path in &self.video_paths {
            if !path.exists() {
                return Err(ConfigError::InputNotFound(path.clone()));
            }
            if !path.is_file() {
                return Err(ConfigError::InputNotAFile(path.clone()));
            }
        }

        Ok(())
    }

    /// Output directory for one video: `<base or parent>/<stem>/`
    pub fn output_dir_for(&self, video: &Path) -> PathBuf {
        let stem = video
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "video".into());
        let base = match &self.output_base {
            Some(base) => base.clone(),
            None => video
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        base.join(stem)
    }
}

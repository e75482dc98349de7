//! Settings file structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the settings file
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Neither `count` nor `every` was given
    #[error("A sampling mode is required: provide either count or every")]
    MissingMode,

    /// Both `count` and `every` were given
    #[error("Sampling modes are mutually exclusive: provide either count or every, not both")]
    ConflictingModes,

    /// `count` must be at least one
    #[error("count must be > 0, got {0}")]
    InvalidCount(u32),

    /// `every` must be a positive, finite number of seconds
    #[error("every must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),

    /// A resource limit (jobs, workers, memory) was zero
    #[error("{name} must be > 0")]
    InvalidLimit { name: &'static str },

    /// No input videos were given
    #[error("At least one input video is required")]
    NoInputs,

    /// An input path does not exist
    #[error("Input video not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// An input path exists but is not a regular file
    #[error("Input is not a file: {}", .0.display())]
    InputNotAFile(PathBuf),
}

/// Resource limits; a zero value means "derive from the host"
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSettings {
    /// Maximum number of videos processed concurrently
    #[serde(default)]
    pub jobs: u32,
    /// Number of scoring workers shared by all videos
    #[serde(default)]
    pub workers: u32,
    /// Memory budget for buffered frames in MiB
    #[serde(default)]
    pub memory_limit_mb: u64,
}

/// Image format used for the selected frames
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension written for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// Output-related settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputSettings {
    #[serde(default)]
    pub image_format: ImageFormat,
}

/// Weighting window applied to the gradient energy before averaging
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CenterWeight {
    None,
    Hann,
    #[default]
    Gaussian,
}

impl CenterWeight {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "none" => Some(CenterWeight::None),
            "hann" => Some(CenterWeight::Hann),
            "gaussian" => Some(CenterWeight::Gaussian),
            _ => None,
        }
    }
}

/// Sharpness scoring settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringSettings {
    #[serde(default)]
    pub center_weight: CenterWeight,
    /// Gaussian sigma as a fraction of the frame side (0, 1]
    #[serde(default = "default_gaussian_sigma_fraction")]
    pub gaussian_sigma_fraction: f32,
}

fn default_gaussian_sigma_fraction() -> f32 {
    0.22
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            center_weight: CenterWeight::default(),
            gaussian_sigma_fraction: default_gaussian_sigma_fraction(),
        }
    }
}

/// Settings file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub resources: ResourceSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply environment variable overrides
    ///
    /// - SFE_JOBS -> resources.jobs
    /// - SFE_WORKERS -> resources.workers
    /// - SFE_MEMORY_LIMIT_MB -> resources.memory_limit_mb
    /// - SFE_IMAGE_FORMAT -> output.image_format
    /// - SFE_CENTER_WEIGHT -> scoring.center_weight
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SFE_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.resources.jobs = jobs;
            }
        }

        if let Ok(val) = env::var("SFE_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.resources.workers = workers;
            }
        }

        if let Ok(val) = env::var("SFE_MEMORY_LIMIT_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                self.resources.memory_limit_mb = mb;
            }
        }

        if let Ok(val) = env::var("SFE_IMAGE_FORMAT") {
            if let Some(format) = ImageFormat::parse(&val) {
                self.output.image_format = format;
            }
        }

        if let Ok(val) = env::var("SFE_CENTER_WEIGHT") {
            if let Some(weight) = CenterWeight::parse(&val) {
                self.scoring.center_weight = weight;
            }
        }
    }

    /// Load settings from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut settings = Self::load_from_file(path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings if the file exists, otherwise start from defaults.
    /// Environment overrides are applied either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut settings = Self::default();
        settings.apply_env_overrides();
        Ok(settings)
    }
}

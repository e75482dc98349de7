//! Configuration for the sharp frame extractor
//!
//! Holds the validated run configuration consumed by the extractor core and the
//! optional settings file (TOML + environment overrides) that supplies defaults.

pub mod config;
pub mod extract;

pub use config::*;
pub use extract::{ExtractConfig, SamplingMode};

//! Resource planning
//!
//! Derives the job limit, worker count and memory budget from the host when
//! the settings leave them at zero.

use crate::config::ResourceSettings;
use serde::Serialize;
use sysinfo::System;

/// Smallest memory budget derived from the host
pub const MIN_DERIVED_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Host capacity the resource plan is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub logical_cores: u32,
    pub available_memory_bytes: u64,
}

impl HostResources {
    /// Detect core count and currently available memory
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            logical_cores: num_cpus::get() as u32,
            available_memory_bytes: system.available_memory(),
        }
    }
}

/// Job limit, worker count and memory budget for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourcePlan {
    /// Concurrently running video jobs (J)
    pub jobs: u32,
    /// Scoring workers shared by all jobs (W)
    pub workers: u32,
    /// Budget for buffered frames (M)
    pub memory_limit_bytes: u64,
}

impl ResourcePlan {
    /// Derive a plan, keeping every explicit (non-zero) setting unchanged.
    ///
    /// - jobs: 1 up to 2 cores, 2 up to 4, 3 up to 8, 4 beyond
    /// - workers: 80% of the cores, at least one
    /// - memory: half of the available memory, at least 256 MiB
    pub fn derive(settings: &ResourceSettings, host: &HostResources) -> Self {
        let jobs = if settings.jobs > 0 {
            settings.jobs
        } else {
            derive_jobs(host.logical_cores)
        };

        let workers = if settings.workers > 0 {
            settings.workers
        } else {
            derive_workers(host.logical_cores)
        };

        let memory_limit_bytes = if settings.memory_limit_mb > 0 {
            settings.memory_limit_mb.saturating_mul(MIB)
        } else {
            derive_memory(host.available_memory_bytes)
        };

        Self {
            jobs,
            workers,
            memory_limit_bytes,
        }
    }
}

fn derive_jobs(cores: u32) -> u32 {
    match cores {
        0..=2 => 1,
        3..=4 => 2,
        5..=8 => 3,
        _ => 4,
    }
}

fn derive_workers(cores: u32) -> u32 {
    ((cores as f64 * 0.8).floor() as u32).max(1)
}

fn derive_memory(available: u64) -> u64 {
    (available / 2).max(MIN_DERIVED_MEMORY_BYTES)
}

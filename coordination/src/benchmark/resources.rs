//! System resource probing via `sysinfo`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Pid, RefreshKind, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Error type for resource probing
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("Resource probing is not supported on this platform")]
    Unsupported,

    #[error("Current process not visible: {0}")]
    ProcessNotFound(String),
}

/// One point-in-time resource reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    /// Resident memory of this process
    pub process_memory_mb: f64,
    /// System memory in use, percent
    pub system_memory_percent: f64,
    /// Global CPU usage, percent
    pub cpu_percent: f64,
    /// GPU usage, percent, when a probe can read it
    pub gpu_percent: Option<f64>,
}

/// Source of resource samples
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> Result<ResourceSample, ProbeError>;
}

/// Probe backed by `sysinfo`. GPU usage is not available.
pub struct SystemProbe {
    system: System,
    pid: Pid,
}

impl SystemProbe {
    pub fn new() -> Result<Self, ProbeError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProbeError::Unsupported);
        }
        let pid = sysinfo::get_current_pid().map_err(|e| ProbeError::ProcessNotFound(e.to_string()))?;
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Ok(Self { system, pid })
    }
}

impl ResourceProbe for SystemProbe {
    /// CPU usage is measured since the previous call, so the first sample
    /// usually reads 0.
    fn sample(&mut self) -> Result<ResourceSample, ProbeError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        if !self.system.refresh_process(self.pid) {
            return Err(ProbeError::ProcessNotFound(self.pid.to_string()));
        }
        let process_memory = self
            .system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or_else(|| ProbeError::ProcessNotFound(self.pid.to_string()))?;

        let total = self.system.total_memory();
        let system_memory_percent = if total > 0 {
            self.system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(ResourceSample {
            timestamp: Utc::now(),
            process_memory_mb: process_memory as f64 / BYTES_PER_MB,
            system_memory_percent,
            cpu_percent: self.system.global_cpu_info().cpu_usage() as f64,
            gpu_percent: None,
        })
    }
}

/// Resident memory of the current process in MB, if readable.
pub fn current_process_memory_mb() -> Option<f64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|p| p.memory() as f64 / BYTES_PER_MB)
}

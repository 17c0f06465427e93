use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::System;

/// Host utilisation at the moment a request was served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

impl SystemLoad {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn clamped(self) -> Self {
        Self {
            cpu_percent: self.cpu_percent.clamp(0.0, 100.0),
            mem_percent: self.mem_percent.clamp(0.0, 100.0),
        }
    }
}

/// Samples global CPU and memory usage. CPU usage needs two refreshes
/// separated by a short delay to be meaningful.
pub fn sample_system_load() -> SystemLoad {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    std::thread::sleep(Duration::from_millis(100).max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
    sys.refresh_cpu_usage();

    let total = sys.total_memory();
    let mem_percent = if total > 0 {
        sys.used_memory() as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    SystemLoad {
        cpu_percent: sys.global_cpu_usage() as f64,
        mem_percent,
    }
    .clamped()
}

// ============================================================
// Layer 6 — Device Reservation
// ============================================================
// Resolves a device-selection request to concrete devices.
//
//   "cpu"            → [Cpu]
//   "gpu:1" | "gpu1" | "1"
//                    → [Gpu(1)]
//   "0,1"            → [Gpu(0), Gpu(1)]
//   "auto" | "auto:N"
//                    → the first N available accelerators
//
// Strict mode never substitutes: any requested device that does
// not exist, or an auto request that cannot be met in full, is a
// DeviceUnavailable error. The runner only supports a single
// device; `reserve_single` turns any other result size into a
// NotImplemented error before weights are allocated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceId {
    Cpu,
    Gpu(u32),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Cpu    => f.write_str("cpu"),
            DeviceId::Gpu(i) => write!(f, "gpu:{i}"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(DeviceId::Cpu);
        }
        let index = s
            .strip_prefix("gpu:")
            .or_else(|| s.strip_prefix("gpu"))
            .or_else(|| s.strip_prefix("cuda:"))
            .unwrap_or(&s);
        index
            .parse::<u32>()
            .map(DeviceId::Gpu)
            .map_err(|_| RunnerError::config(format!("cannot parse device '{s}'")))
    }
}

/// A device-selection request as written in configuration or on the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    Explicit(Vec<DeviceId>),
    Auto { count: usize },
}

impl DeviceSelection {
    /// Number of devices this request resolves to when satisfied.
    pub fn requested(&self) -> usize {
        match self {
            DeviceSelection::Explicit(ids) => ids.len(),
            DeviceSelection::Auto { count } => *count,
        }
    }

    /// The runner's configuration only admits single-device requests.
    pub fn ensure_single(self) -> Result<Self, RunnerError> {
        match self.requested() {
            1 => Ok(self),
            n => Err(RunnerError::NotImplemented(format!(
                "device request '{self}' asks for {n} devices; only single-device execution is supported"
            ))),
        }
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelection::Auto { count } => write!(f, "auto:{count}"),
            DeviceSelection::Explicit(ids) => {
                let parts: Vec<String> = ids.iter().map(|d| d.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl FromStr for DeviceSelection {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(RunnerError::config("empty device request"));
        }
        if let Some(rest) = s.strip_prefix("auto") {
            let count = match rest.trim_start_matches([':', '_']) {
                "" => 1,
                n => n.parse::<usize>().map_err(|_| {
                    RunnerError::config(format!("cannot parse device count in '{s}'"))
                })?,
            };
            return Ok(DeviceSelection::Auto { count });
        }
        let ids = s
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<DeviceId>, _>>()?;
        if ids.is_empty() {
            return Err(RunnerError::config(format!("device request '{s}' names no device")));
        }
        Ok(DeviceSelection::Explicit(ids))
    }
}

/// Devices present on this machine, accelerators first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInventory {
    devices: Vec<DeviceId>,
}

impl DeviceInventory {
    pub fn new(gpus: impl IntoIterator<Item = u32>) -> Self {
        let mut devices: Vec<DeviceId> = gpus.into_iter().map(DeviceId::Gpu).collect();
        devices.push(DeviceId::Cpu);
        Self { devices }
    }

    pub fn cpu_only() -> Self {
        Self::new([])
    }

    /// NVIDIA GPUs listed by the kernel driver, filtered by
    /// CUDA_VISIBLE_DEVICES when it is set; the CPU is always present.
    pub fn detect() -> Self {
        let count = std::fs::read_dir(Path::new("/proc/driver/nvidia/gpus"))
            .map(|entries| entries.filter_map(|e| e.ok()).count() as u32)
            .unwrap_or(0);
        let visible: Option<Vec<u32>> = std::env::var("CUDA_VISIBLE_DEVICES").ok().map(|v| {
            v.split(',')
                .filter_map(|p| p.trim().parse::<u32>().ok())
                .collect()
        });
        let gpus: Vec<u32> = (0..count)
            .filter(|i| visible.as_ref().map_or(true, |vis| vis.contains(i)))
            .collect();
        tracing::debug!("detected {} visible GPU(s)", gpus.len());
        Self::new(gpus)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains(id)
    }

    pub fn accelerators(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.iter().filter(|d| matches!(d, DeviceId::Gpu(_)))
    }
}

/// Resolve `selection` against `inventory`.
pub fn reserve(
    selection: &DeviceSelection,
    inventory: &DeviceInventory,
    strict:    bool,
) -> Result<Vec<DeviceId>, RunnerError> {
    let reserved: Vec<DeviceId> = match selection {
        DeviceSelection::Explicit(ids) => {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !inventory.contains(id))
                .map(|id| id.to_string())
                .collect();
            if strict && !missing.is_empty() {
                return Err(RunnerError::DeviceUnavailable(format!(
                    "requested device(s) {} not present",
                    missing.join(", ")
                )));
            }
            ids.iter().copied().filter(|id| inventory.contains(id)).collect()
        }
        DeviceSelection::Auto { count } => {
            let found: Vec<DeviceId> = inventory.accelerators().take(*count).copied().collect();
            if strict && found.len() < *count {
                return Err(RunnerError::DeviceUnavailable(format!(
                    "auto reservation of {count} accelerator(s) found only {}",
                    found.len()
                )));
            }
            found
        }
    };

    if reserved.is_empty() && !strict {
        tracing::warn!("no requested device available, falling back to cpu");
        return Ok(vec![DeviceId::Cpu]);
    }
    Ok(reserved)
}

/// Strict reservation that must yield exactly one device.
pub fn reserve_single(
    selection: &DeviceSelection,
    inventory: &DeviceInventory,
) -> Result<DeviceId, RunnerError> {
    let devices = reserve(selection, inventory, true)?;
    match devices.as_slice() {
        [one] => {
            tracing::info!("reserved device {one}");
            Ok(*one)
        }
        _ => Err(RunnerError::NotImplemented(format!(
            "{} devices reserved for '{selection}'; multi-device execution is not supported",
            devices.len()
        ))),
    }
}

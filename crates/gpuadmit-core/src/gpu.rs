//! Device descriptors and usage figures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bytes per mebibyte, the unit every memory figure in this crate uses
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// GPU vendor families with a well-known device tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Hygon,
    Ascend,
    Mlu,
    Iluvatar,
    Metax,
    Unknown,
}

impl GpuVendor {
    /// All vendors that have a canonical tag
    pub const KNOWN: [GpuVendor; 7] = [
        GpuVendor::Nvidia,
        GpuVendor::Amd,
        GpuVendor::Hygon,
        GpuVendor::Ascend,
        GpuVendor::Mlu,
        GpuVendor::Iluvatar,
        GpuVendor::Metax,
    ];

    /// Canonical device tag for the vendor
    pub fn tag(&self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Amd => "AMD",
            GpuVendor::Hygon => "HYGON",
            GpuVendor::Ascend => "ASCEND",
            GpuVendor::Mlu => "MLU",
            GpuVendor::Iluvatar => "ILUVATAR",
            GpuVendor::Metax => "METAX",
            GpuVendor::Unknown => "UNKNOWN",
        }
    }

    /// Map a device tag to a vendor. Unrecognized tags map to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        let tag = normalize_vendor_tag(tag);
        GpuVendor::KNOWN
            .into_iter()
            .find(|v| v.tag() == tag)
            .unwrap_or(GpuVendor::Unknown)
    }
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Normalize a vendor tag for registry lookups (trimmed, upper-case)
pub fn normalize_vendor_tag(tag: &str) -> String {
    tag.trim().to_ascii_uppercase()
}

/// One physical device as discovered on a node.
///
/// Immutable for the lifetime of a scheduling attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Inventory identifier of the device
    pub id: String,
    /// Vendor/type tag, e.g. "NVIDIA"
    pub vendor_tag: String,
    /// Stable hardware UUID
    pub uuid: String,
    /// Total device memory in MB
    pub total_memory_mb: u64,
    /// Total compute units (percent of cores, 100 per device by default)
    #[serde(default = "default_compute_units")]
    pub total_compute_units: u32,
    /// Node the device belongs to
    pub node_id: String,
}

fn default_compute_units() -> u32 {
    100
}

impl DeviceDescriptor {
    /// Vendor family of this device
    pub fn vendor(&self) -> GpuVendor {
        GpuVendor::from_tag(&self.vendor_tag)
    }
}

/// Live usage figures for one device, produced by a telemetry provider.
///
/// Lives for a single admission decision and is never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeSnapshot {
    /// Physically used device memory in MB
    pub used_memory_mb: u64,
    /// Compute utilization, 0-100
    pub utilization_percent: u32,
    /// Number of processes running on the device
    pub process_count: u32,
    /// When the figures were read
    pub observed_at: DateTime<Utc>,
}

/// The scheduler's bookkeeping of capacity committed to pods on one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUsage {
    /// Memory committed to scheduled pods, in MB
    pub used_memory_mb: u64,
    /// Compute units committed to scheduled pods
    pub used_compute_units: u32,
    /// Number of pods sharing the device
    pub pod_count: u32,
}

//! Admission policy and verdict types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::GpuAdmitError;

/// Default capacity reserved on every device before admission math, in MB
pub const DEFAULT_SAFETY_MARGIN_MB: u64 = 100;

/// How real-time insufficiency is acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Real-time insufficiency rejects the device
    Strict,
    /// Real-time insufficiency is logged but the device is admitted
    Warning,
    /// Real-time usage is never queried
    Disabled,
}

impl CheckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMode::Strict => "strict",
            CheckMode::Warning => "warning",
            CheckMode::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for CheckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckMode {
    type Err = GpuAdmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(CheckMode::Strict),
            "warning" => Ok(CheckMode::Warning),
            "disabled" => Ok(CheckMode::Disabled),
            _ => Err(GpuAdmitError::ConfigurationInvalid {
                key: "REALTIME_CHECK_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Where the enable/disable decision for a pod came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnablementSource {
    PodAnnotation,
    ProcessDefault,
    BuiltinDefault,
}

/// Policy applied to every device of one scheduling attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    /// Whether real-time usage is queried at all
    pub enabled: bool,
    /// How insufficiency is acted upon
    pub mode: CheckMode,
    /// Capacity reserved before admission math, in MB
    pub safety_margin_mb: u64,
    /// Layer that decided `enabled`
    pub source: EnablementSource,
}

impl EffectivePolicy {
    /// Policy that never queries real-time usage
    pub fn disabled(safety_margin_mb: u64) -> Self {
        Self {
            enabled: false,
            mode: CheckMode::Disabled,
            safety_margin_mb,
            source: EnablementSource::BuiltinDefault,
        }
    }

    /// True when the real-time path must be taken
    pub fn checks_realtime(&self) -> bool {
        self.enabled && self.mode != CheckMode::Disabled
    }

    /// Mode the evaluator applies: `Disabled` whenever checking is off
    pub fn decision_mode(&self) -> CheckMode {
        if self.checks_realtime() {
            self.mode
        } else {
            CheckMode::Disabled
        }
    }
}

/// Why a device was admitted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictReason {
    /// Requested memory fits in the available capacity
    Fits,
    /// Strict mode: real-time usage leaves too little memory
    RealTimeMemoryExceeded,
    /// Warning mode: real-time usage leaves too little memory, admitted anyway
    RealTimeMemoryExceededWarningOnly,
    /// Cached bookkeeping alone admits the request
    CachedCapacityFits,
    /// Cached bookkeeping leaves too little memory
    CachedMemoryExceeded,
    /// Cached bookkeeping leaves too few compute units
    CachedComputeExceeded,
}

impl std::fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerdictReason::Fits => "Fits",
            VerdictReason::RealTimeMemoryExceeded => "RealTimeMemoryExceeded",
            VerdictReason::RealTimeMemoryExceededWarningOnly => {
                "RealTimeMemoryExceededWarningOnly"
            }
            VerdictReason::CachedCapacityFits => "CachedCapacityFits",
            VerdictReason::CachedMemoryExceeded => "CachedMemoryExceeded",
            VerdictReason::CachedComputeExceeded => "CachedComputeExceeded",
        };
        f.write_str(s)
    }
}

/// Admission decision for one (pod, device) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionVerdict {
    pub device_id: String,
    pub admit: bool,
    pub reason: VerdictReason,
    /// The usage figure came from cached bookkeeping after a failed query
    pub used_fallback: bool,
    /// Admitted despite real-time insufficiency; callers must log it
    pub soft_reject: bool,
    pub requested_memory_mb: u64,
    pub used_memory_mb: u64,
    pub total_memory_mb: u64,
    pub safety_margin_mb: u64,
    /// `total - used - margin`, may be negative
    pub available_memory_mb: i64,
}

impl AdmissionVerdict {
    /// Operator-facing explanation of the verdict
    pub fn describe(&self) -> String {
        match self.reason {
            VerdictReason::RealTimeMemoryExceeded
            | VerdictReason::RealTimeMemoryExceededWarningOnly => format!(
                "device {}: requested {} MB exceeds real-time available {} MB \
                 (real-time used {} MB, total {} MB, safety margin {} MB)",
                self.device_id,
                self.requested_memory_mb,
                self.available_memory_mb,
                self.used_memory_mb,
                self.total_memory_mb,
                self.safety_margin_mb
            ),
            VerdictReason::CachedMemoryExceeded => format!(
                "device {}: requested {} MB exceeds cached free memory {} MB \
                 (cached used {} MB, total {} MB)",
                self.device_id,
                self.requested_memory_mb,
                self.total_memory_mb as i64 - self.used_memory_mb as i64,
                self.used_memory_mb,
                self.total_memory_mb
            ),
            VerdictReason::CachedComputeExceeded => {
                format!("device {}: not enough free compute units", self.device_id)
            }
            VerdictReason::Fits | VerdictReason::CachedCapacityFits => format!(
                "device {}: requested {} MB fits (used {} MB, total {} MB)",
                self.device_id, self.requested_memory_mb, self.used_memory_mb, self.total_memory_mb
            ),
        }
    }
}

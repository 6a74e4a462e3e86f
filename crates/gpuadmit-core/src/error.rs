//! Error types for gpuadmit

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for gpuadmit
#[derive(Error, Debug)]
pub enum GpuAdmitError {
    /// Configuration file or value could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration value was present but not recognized
    #[error("Invalid configuration value for {key}: {value:?}")]
    ConfigurationInvalid { key: String, value: String },

    /// Telemetry error
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Device not found in the inventory
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Node not found in the inventory
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// API error
    #[error("API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gpuadmit operations
pub type GpuAdmitResult<T> = Result<T, GpuAdmitError>;

impl From<serde_json::Error> for GpuAdmitError {
    fn from(err: serde_json::Error) -> Self {
        GpuAdmitError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuAdmitError {
    fn from(err: toml::de::Error) -> Self {
        GpuAdmitError::Config(err.to_string())
    }
}

/// Classified failure of a real-time telemetry query.
///
/// Every variant is recovered locally by falling back to cached usage; none of
/// them turns into a scheduling error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryError {
    /// The vendor management library is not loaded or failed to initialise
    #[error("telemetry library uninitialized: {detail}")]
    LibraryUninitialized { detail: String },

    /// The process is not allowed to query the device
    #[error("permission denied querying device {uuid}: {detail}")]
    PermissionDenied { uuid: String, detail: String },

    /// The device UUID could not be resolved to a library handle
    #[error("could not resolve device {uuid}: {detail}")]
    HandleResolutionFailed { uuid: String, detail: String },

    /// One of the memory, utilization or process queries failed
    #[error("query {query} failed for device {uuid}: {detail}")]
    QueryFailed {
        uuid: String,
        query: String,
        detail: String,
    },

    /// The device vendor has no real-time telemetry implementation
    #[error("real-time telemetry not implemented for vendor {vendor}")]
    NotImplemented { vendor: String },

    /// The query did not complete before the scheduling deadline
    #[error("telemetry query for device {uuid} timed out after {elapsed_ms} ms")]
    Timeout { uuid: String, elapsed_ms: u64 },
}

impl TelemetryError {
    /// Stable label for the error class, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryError::LibraryUninitialized { .. } => "LibraryUninitialized",
            TelemetryError::PermissionDenied { .. } => "PermissionDenied",
            TelemetryError::HandleResolutionFailed { .. } => "HandleResolutionFailed",
            TelemetryError::QueryFailed { .. } => "QueryFailed",
            TelemetryError::NotImplemented { .. } => "NotImplemented",
            TelemetryError::Timeout { .. } => "Timeout",
        }
    }
}

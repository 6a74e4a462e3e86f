//! Configuration types for gpuadmit

use serde::{Deserialize, Serialize};

use crate::{DeviceDescriptor, GpuAdmitError, GpuAdmitResult, DEFAULT_SAFETY_MARGIN_MB};

/// Process-wide enablement of real-time checking
pub const ENV_ENABLE_REALTIME_CHECK: &str = "ENABLE_REALTIME_CHECK";
/// Process-wide check mode: strict, warning or disabled
pub const ENV_REALTIME_CHECK_MODE: &str = "REALTIME_CHECK_MODE";
/// Safety margin override in MB
pub const ENV_SAFETY_MARGIN_MB: &str = "REALTIME_CHECK_SAFETY_MARGIN_MB";
/// Telemetry deadline override in milliseconds
pub const ENV_TELEMETRY_TIMEOUT_MS: &str = "REALTIME_CHECK_TIMEOUT_MS";

/// Default deadline for one node's telemetry queries
pub const DEFAULT_TELEMETRY_TIMEOUT_MS: u64 = 50;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Real-time check configuration
    pub realtime: RealtimeCheckConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Static device inventory
    pub devices: Vec<DeviceDescriptor>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> GpuAdmitResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GpuAdmitError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> GpuAdmitResult<Self> {
        toml::from_str(content)
            .map_err(|e| GpuAdmitError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9095,
        }
    }
}

/// Process-wide real-time check settings.
///
/// `mode` is kept as the raw string so an unrecognized value reaches the
/// policy resolver, which disables checking for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeCheckConfig {
    /// Enablement flag; `None` when no layer set it
    pub enabled: Option<bool>,
    /// Check mode; `None` when no layer set it
    pub mode: Option<String>,
    /// Capacity reserved before admission math, in MB
    pub safety_margin_mb: u64,
    /// Deadline for telemetry queries of one node pass, in milliseconds
    pub telemetry_timeout_ms: u64,
}

impl Default for RealtimeCheckConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            mode: None,
            safety_margin_mb: DEFAULT_SAFETY_MARGIN_MB,
            telemetry_timeout_ms: DEFAULT_TELEMETRY_TIMEOUT_MS,
        }
    }
}

impl RealtimeCheckConfig {
    /// Overlay environment values on top of the current settings.
    ///
    /// Values that fail to parse leave the field untouched and are returned so
    /// the caller can log them.
    pub fn overlay_env<F>(&mut self, lookup: F) -> Vec<GpuAdmitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();

        if let Some(value) = lookup(ENV_ENABLE_REALTIME_CHECK) {
            match parse_bool_value(ENV_ENABLE_REALTIME_CHECK, &value) {
                Ok(enabled) => self.enabled = Some(enabled),
                Err(e) => rejected.push(e),
            }
        }

        if let Some(value) = lookup(ENV_REALTIME_CHECK_MODE) {
            self.mode = Some(value);
        }

        if let Some(value) = lookup(ENV_SAFETY_MARGIN_MB) {
            match parse_u64_value(ENV_SAFETY_MARGIN_MB, &value) {
                Ok(margin) => self.safety_margin_mb = margin,
                Err(e) => rejected.push(e),
            }
        }

        if let Some(value) = lookup(ENV_TELEMETRY_TIMEOUT_MS) {
            match parse_u64_value(ENV_TELEMETRY_TIMEOUT_MS, &value) {
                Ok(timeout) => self.telemetry_timeout_ms = timeout,
                Err(e) => rejected.push(e),
            }
        }

        rejected
    }

    /// Overlay the process environment
    pub fn overlay_process_env(&mut self) -> Vec<GpuAdmitError> {
        self.overlay_env(|key| std::env::var(key).ok())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = GpuAdmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(GpuAdmitError::ConfigurationInvalid {
                key: "log format".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Parse a boolean configuration value.
///
/// Accepts true/false, 1/0, yes/no and on/off, case-insensitively.
pub fn parse_bool_value(key: &str, value: &str) -> GpuAdmitResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GpuAdmitError::ConfigurationInvalid {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_u64_value(key: &str, value: &str) -> GpuAdmitResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| GpuAdmitError::ConfigurationInvalid {
            key: key.to_string(),
            value: value.to_string(),
        })
}

//! Telemetry provider trait definitions

use async_trait::async_trait;
use gpuadmit_core::{DeviceDescriptor, RealTimeSnapshot, TelemetryError};

/// Per-vendor source of live device usage
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    /// Read the current usage of a device.
    ///
    /// Callers bound the wait; implementations must not block the async
    /// executor while talking to vendor libraries.
    async fn fetch_usage(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<RealTimeSnapshot, TelemetryError>;

    /// Whether this provider can read live usage at all
    fn supports_realtime_query(&self) -> bool;

    /// Get the provider name
    fn name(&self) -> &'static str;
}

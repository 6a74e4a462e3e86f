//! Provider for vendors without a real-time telemetry implementation

use async_trait::async_trait;
use gpuadmit_core::{DeviceDescriptor, RealTimeSnapshot, TelemetryError};

use crate::traits::TelemetryProvider;

/// Always reports that real-time queries are unsupported
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProvider;

#[async_trait]
impl TelemetryProvider for UnsupportedProvider {
    async fn fetch_usage(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<RealTimeSnapshot, TelemetryError> {
        Err(TelemetryError::NotImplemented {
            vendor: device.vendor_tag.clone(),
        })
    }

    fn supports_realtime_query(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

//! Vendor tag to telemetry provider mapping

use gpuadmit_core::{
    normalize_vendor_tag, DeviceDescriptor, GpuVendor, RealTimeSnapshot, TelemetryError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::nvml::NvmlProvider;
use crate::traits::TelemetryProvider;
use crate::unsupported::UnsupportedProvider;

/// Static mapping from vendor tag to provider.
///
/// Populated at start and read-only afterwards. Unknown tags resolve to the
/// shared unsupported provider, so every device can be treated the same way.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TelemetryProvider>>,
    fallback: Arc<dyn TelemetryProvider>,
}

impl ProviderRegistry {
    /// Create a registry with no vendor entries
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            fallback: Arc::new(UnsupportedProvider),
        }
    }

    /// NVML for NVIDIA, the unsupported provider for every other known vendor
    pub fn with_defaults() -> Self {
        let unsupported: Arc<dyn TelemetryProvider> = Arc::new(UnsupportedProvider);
        let mut registry = Self::new();
        for vendor in GpuVendor::KNOWN {
            let provider: Arc<dyn TelemetryProvider> = match vendor {
                GpuVendor::Nvidia => Arc::new(NvmlProvider::new()),
                _ => Arc::clone(&unsupported),
            };
            registry = registry.register(vendor.tag(), provider);
        }
        registry
    }

    /// Register a provider for a vendor tag, replacing any previous entry
    pub fn register(mut self, vendor_tag: &str, provider: Arc<dyn TelemetryProvider>) -> Self {
        self.providers.insert(normalize_vendor_tag(vendor_tag), provider);
        self
    }

    /// Provider for a vendor tag
    pub fn lookup(&self, vendor_tag: &str) -> Arc<dyn TelemetryProvider> {
        self.providers
            .get(&normalize_vendor_tag(vendor_tag))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Whether devices with this tag can be queried in real time
    pub fn supports_realtime_query(&self, vendor_tag: &str) -> bool {
        self.lookup(vendor_tag).supports_realtime_query()
    }

    /// Registered vendor tags, sorted
    pub fn registered_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.providers.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Query a device's provider, giving up at `deadline`.
    ///
    /// An elapsed deadline is reported as `TelemetryError::Timeout`. The
    /// in-flight vendor call is abandoned, not cancelled.
    pub async fn fetch_within(
        &self,
        device: &DeviceDescriptor,
        deadline: Instant,
    ) -> Result<RealTimeSnapshot, TelemetryError> {
        let provider = self.lookup(&device.vendor_tag);
        let started = Instant::now();

        debug!(
            device_id = %device.id,
            provider = provider.name(),
            "Fetching real-time usage"
        );

        match tokio::time::timeout_at(deadline, provider.fetch_usage(device)).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Timeout {
                uuid: device.uuid.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

//! Mock telemetry provider for testing

use async_trait::async_trait;
use chrono::Utc;
use gpuadmit_core::{DeviceDescriptor, RealTimeSnapshot, TelemetryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::traits::TelemetryProvider;

/// Scripted answer for one device UUID
#[derive(Debug, Clone)]
enum MockResponse {
    Usage {
        used_memory_mb: u64,
        utilization_percent: u32,
        process_count: u32,
    },
    Failure(TelemetryError),
}

/// Provider returning scripted snapshots or failures per device UUID.
///
/// Unscripted UUIDs fail with `HandleResolutionFailed`.
#[derive(Debug, Default)]
pub struct MockProvider {
    responses: RwLock<HashMap<String, MockResponse>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Create a mock provider with no scripted devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script a successful reading for a device
    pub fn set_usage(
        &self,
        uuid: &str,
        used_memory_mb: u64,
        utilization_percent: u32,
        process_count: u32,
    ) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                uuid.to_string(),
                MockResponse::Usage {
                    used_memory_mb,
                    utilization_percent,
                    process_count,
                },
            );
    }

    /// Script a failure for a device
    pub fn set_failure(&self, uuid: &str, error: TelemetryError) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid.to_string(), MockResponse::Failure(error));
    }

    /// Number of `fetch_usage` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryProvider for MockProvider {
    async fn fetch_usage(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<RealTimeSnapshot, TelemetryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let response = self
            .responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.uuid)
            .cloned();

        debug!(uuid = %device.uuid, scripted = response.is_some(), "Mock telemetry query");

        match response {
            Some(MockResponse::Usage {
                used_memory_mb,
                utilization_percent,
                process_count,
            }) => Ok(RealTimeSnapshot {
                used_memory_mb,
                utilization_percent,
                process_count,
                observed_at: Utc::now(),
            }),
            Some(MockResponse::Failure(error)) => Err(error),
            None => Err(TelemetryError::HandleResolutionFailed {
                uuid: device.uuid.clone(),
                detail: "device not scripted in mock provider".to_string(),
            }),
        }
    }

    fn supports_realtime_query(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(uuid: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: format!("dev-{uuid}"),
            vendor_tag: "NVIDIA".to_string(),
            uuid: uuid.to_string(),
            total_memory_mb: 8192,
            total_compute_units: 100,
            node_id: "node-a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_usage() {
        let provider = MockProvider::new();
        provider.set_usage("GPU-0", 2048, 40, 3);

        let snapshot = provider.fetch_usage(&device("GPU-0")).await.unwrap();
        assert_eq!(snapshot.used_memory_mb, 2048);
        assert_eq!(snapshot.utilization_percent, 40);
        assert_eq!(snapshot.process_count, 3);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_and_unknown() {
        let provider = MockProvider::new();
        provider.set_failure(
            "GPU-1",
            TelemetryError::PermissionDenied {
                uuid: "GPU-1".to_string(),
                detail: "denied".to_string(),
            },
        );

        let err = provider.fetch_usage(&device("GPU-1")).await.unwrap_err();
        assert_eq!(err.kind(), "PermissionDenied");

        let err = provider.fetch_usage(&device("GPU-9")).await.unwrap_err();
        assert_eq!(err.kind(), "HandleResolutionFailed");
        assert_eq!(provider.call_count(), 2);
    }
}

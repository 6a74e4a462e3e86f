//! Usage reconciliation
//!
//! The reconciler is the single place where a telemetry failure turns into
//! fallback behaviour. It never owns a timer: the caller passes the deadline
//! of its filtering pass.

use gpuadmit_core::{CachedUsage, DeviceDescriptor, EffectivePolicy, TelemetryError};
use gpuadmit_telemetry::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Where a reconciled usage figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// Checking is off for this attempt; the cached figure is used as is
    Cached,
    /// A successful real-time read replaced the cached figure
    RealTime,
    /// The real-time read failed and the cached figure was used instead
    Fallback,
}

/// Usage figure of one device for one filtering pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledUsage {
    pub device_id: String,
    /// Cached bookkeeping as read at the start of the pass
    pub cached: CachedUsage,
    /// Memory figure the evaluator must use, in MB
    pub used_memory_mb: u64,
    pub source: UsageSource,
    /// Classified failure behind a fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_error: Option<TelemetryError>,
}

impl ReconciledUsage {
    fn cached(device: &DeviceDescriptor, cached: CachedUsage) -> Self {
        Self {
            device_id: device.id.clone(),
            cached,
            used_memory_mb: cached.used_memory_mb,
            source: UsageSource::Cached,
            fallback_error: None,
        }
    }

    /// True when the figure came from cached data after a failed read
    pub fn used_fallback(&self) -> bool {
        self.source == UsageSource::Fallback
    }
}

/// Reconciles cached bookkeeping with live telemetry, one device at a time
#[derive(Clone)]
pub struct UsageReconciler {
    registry: Arc<ProviderRegistry>,
}

impl UsageReconciler {
    /// Create a reconciler over a provider registry
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used to resolve providers
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Produce the usage figure of `device` for one admission decision
    pub async fn reconcile(
        &self,
        device: &DeviceDescriptor,
        cached: CachedUsage,
        policy: &EffectivePolicy,
        deadline: Instant,
    ) -> ReconciledUsage {
        if !policy.checks_realtime() {
            return ReconciledUsage::cached(device, cached);
        }

        match self.registry.fetch_within(device, deadline).await {
            Ok(snapshot) => {
                info!(
                    device_id = %device.id,
                    node_id = %device.node_id,
                    cached_mb = cached.used_memory_mb,
                    realtime_mb = snapshot.used_memory_mb,
                    utilization_percent = snapshot.utilization_percent,
                    process_count = snapshot.process_count,
                    "Updated device usage from real-time telemetry"
                );

                ReconciledUsage {
                    device_id: device.id.clone(),
                    cached,
                    used_memory_mb: snapshot.used_memory_mb,
                    source: UsageSource::RealTime,
                    fallback_error: None,
                }
            }
            Err(error) => {
                if matches!(error, TelemetryError::NotImplemented { .. }) {
                    info!(
                        device_id = %device.id,
                        node_id = %device.node_id,
                        vendor = %device.vendor_tag,
                        error_kind = error.kind(),
                        cached_mb = cached.used_memory_mb,
                        "Real-time telemetry not implemented, using cached usage"
                    );
                } else {
                    warn!(
                        device_id = %device.id,
                        node_id = %device.node_id,
                        error_kind = error.kind(),
                        error = %error,
                        cached_mb = cached.used_memory_mb,
                        "Real-time telemetry failed, falling back to cached usage"
                    );
                }

                ReconciledUsage {
                    device_id: device.id.clone(),
                    cached,
                    used_memory_mb: cached.used_memory_mb,
                    source: UsageSource::Fallback,
                    fallback_error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuadmit_core::{CheckMode, EnablementSource};
    use gpuadmit_telemetry::MockProvider;
    use std::time::Duration;

    fn device(vendor_tag: &str, uuid: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: format!("dev-{uuid}"),
            vendor_tag: vendor_tag.to_string(),
            uuid: uuid.to_string(),
            total_memory_mb: 8192,
            total_compute_units: 100,
            node_id: "node-a".to_string(),
        }
    }

    fn policy(enabled: bool, mode: CheckMode) -> EffectivePolicy {
        EffectivePolicy {
            enabled,
            mode,
            safety_margin_mb: 100,
            source: EnablementSource::ProcessDefault,
        }
    }

    fn cached(mb: u64) -> CachedUsage {
        CachedUsage {
            used_memory_mb: mb,
            used_compute_units: 10,
            pod_count: 1,
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    fn setup() -> (Arc<MockProvider>, UsageReconciler) {
        let mock = Arc::new(MockProvider::new());
        let registry = ProviderRegistry::new().register("NVIDIA", mock.clone());
        (mock, UsageReconciler::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn test_realtime_replaces_cached() {
        let (mock, reconciler) = setup();
        mock.set_usage("GPU-0", 6144, 80, 4);

        let usage = reconciler
            .reconcile(
                &device("NVIDIA", "GPU-0"),
                cached(1024),
                &policy(true, CheckMode::Strict),
                deadline(),
            )
            .await;

        assert_eq!(usage.source, UsageSource::RealTime);
        assert_eq!(usage.used_memory_mb, 6144);
        assert_eq!(usage.cached.used_memory_mb, 1024);
        assert!(!usage.used_fallback());
    }

    #[tokio::test]
    async fn test_disabled_never_queries() {
        let (mock, reconciler) = setup();
        mock.set_usage("GPU-0", 6144, 80, 4);

        for p in [policy(false, CheckMode::Strict), policy(true, CheckMode::Disabled)] {
            let usage = reconciler
                .reconcile(&device("NVIDIA", "GPU-0"), cached(1024), &p, deadline())
                .await;
            assert_eq!(usage.source, UsageSource::Cached);
            assert_eq!(usage.used_memory_mb, 1024);
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_falls_back() {
        let (mock, reconciler) = setup();
        mock.set_failure(
            "GPU-1",
            TelemetryError::QueryFailed {
                uuid: "GPU-1".to_string(),
                query: "memory_info".to_string(),
                detail: "gpu lost".to_string(),
            },
        );

        let usage = reconciler
            .reconcile(
                &device("NVIDIA", "GPU-1"),
                cached(2048),
                &policy(true, CheckMode::Strict),
                deadline(),
            )
            .await;

        assert!(usage.used_fallback());
        assert_eq!(usage.used_memory_mb, 2048);
        assert_eq!(usage.fallback_error.as_ref().map(TelemetryError::kind), Some("QueryFailed"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn records(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_unknown_vendor_falls_back() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_, reconciler) = setup();
        let usage = reconciler
            .reconcile(
                &device("AMD", "GPU-amd"),
                cached(512),
                &policy(true, CheckMode::Strict),
                deadline(),
            )
            .await;

        assert!(usage.used_fallback());
        assert_eq!(usage.used_memory_mb, 512);
        assert_eq!(
            usage.fallback_error.as_ref().map(TelemetryError::kind),
            Some("NotImplemented")
        );

        let records = logs.records();
        let record = records
            .iter()
            .find(|r| r["fields"]["error_kind"] == "NotImplemented")
            .expect("fallback record at INFO");
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["fields"]["device_id"], "dev-GPU-amd");
        assert_eq!(record["fields"]["node_id"], "node-a");
        assert_eq!(record["fields"]["vendor"], "AMD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let mock = Arc::new(MockProvider::new().with_latency(Duration::from_millis(200)));
        mock.set_usage("GPU-slow", 7000, 90, 6);
        let registry = ProviderRegistry::new().register("NVIDIA", mock);
        let reconciler = UsageReconciler::new(Arc::new(registry));

        let usage = reconciler
            .reconcile(
                &device("NVIDIA", "GPU-slow"),
                cached(1024),
                &policy(true, CheckMode::Strict),
                deadline(),
            )
            .await;

        assert!(usage.used_fallback());
        assert_eq!(usage.used_memory_mb, 1024);
        assert_eq!(usage.fallback_error.as_ref().map(TelemetryError::kind), Some("Timeout"));
    }
}

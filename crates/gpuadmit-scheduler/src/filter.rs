//! Scheduling filter
//!
//! Invoked once per pod with its candidate nodes. The policy is resolved once
//! per pod, nodes are filtered concurrently, and the devices of a node are
//! reconciled concurrently under one deadline for that node's pass.

use futures::future::join_all;
use gpuadmit_core::{
    AdmissionVerdict, EffectivePolicy, PodSpec, VerdictReason, DEFAULT_TELEMETRY_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::inventory::DeviceInventory;
use crate::placement::{assign, DeviceBinding, DeviceCandidate, DeviceEvaluation};
use crate::policy::PolicyResolver;
use crate::reconciler::{ReconciledUsage, UsageReconciler};
use crate::usage_store::UsageStore;

/// Filter outcome of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilterResult {
    pub node_id: String,
    pub passed: bool,
    /// Request to device bindings when the node passed
    pub bindings: Vec<DeviceBinding>,
    pub evaluations: Vec<DeviceEvaluation>,
    /// Usage figures the verdicts were computed from
    pub usage: Vec<ReconciledUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NodeFilterResult {
    fn failed(node_id: &str, reason: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            passed: false,
            bindings: Vec::new(),
            evaluations: Vec::new(),
            usage: Vec::new(),
            reason: Some(reason),
        }
    }
}

/// Filter outcome of one pod across its candidate nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    /// `namespace/name` of the pod
    pub pod: String,
    pub policy: EffectivePolicy,
    /// Nodes that passed, in candidate order
    pub node_names: Vec<String>,
    /// Failed nodes and why
    pub failed_nodes: BTreeMap<String, String>,
    pub node_results: Vec<NodeFilterResult>,
}

/// Drives policy resolution, reconciliation and evaluation for each pod
pub struct SchedulingFilter {
    resolver: PolicyResolver,
    reconciler: UsageReconciler,
    inventory: Arc<dyn DeviceInventory>,
    usage: Arc<dyn UsageStore>,
    telemetry_budget: Duration,
}

impl SchedulingFilter {
    /// Create a filter with the default telemetry budget
    pub fn new(
        resolver: PolicyResolver,
        reconciler: UsageReconciler,
        inventory: Arc<dyn DeviceInventory>,
        usage: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            resolver,
            reconciler,
            inventory,
            usage,
            telemetry_budget: Duration::from_millis(DEFAULT_TELEMETRY_TIMEOUT_MS),
        }
    }

    /// Set the time one node pass may wait on telemetry
    pub fn with_telemetry_budget(mut self, budget: Duration) -> Self {
        self.telemetry_budget = budget;
        self
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    pub fn inventory(&self) -> &Arc<dyn DeviceInventory> {
        &self.inventory
    }

    pub fn usage(&self) -> &Arc<dyn UsageStore> {
        &self.usage
    }

    pub fn telemetry_budget(&self) -> Duration {
        self.telemetry_budget
    }

    /// Filter `nodes` for `pod`
    pub async fn filter(&self, pod: &PodSpec, nodes: &[String]) -> FilterResult {
        let policy = self.resolver.resolve(pod);
        let pod_key = pod.key();

        debug!(
            pod = %pod_key,
            nodes = nodes.len(),
            requests = pod.device_requests.len(),
            "Filtering candidate nodes"
        );

        let node_results =
            join_all(nodes.iter().map(|node| self.filter_node(pod, &pod_key, node, &policy))).await;

        let mut node_names = Vec::new();
        let mut failed_nodes = BTreeMap::new();
        for result in &node_results {
            if result.passed {
                node_names.push(result.node_id.clone());
            } else {
                failed_nodes.insert(
                    result.node_id.clone(),
                    result.reason.clone().unwrap_or_default(),
                );
            }
        }

        info!(
            pod = %pod_key,
            passed = node_names.len(),
            failed = failed_nodes.len(),
            "Filter completed"
        );

        FilterResult {
            pod: pod_key,
            policy,
            node_names,
            failed_nodes,
            node_results,
        }
    }

    async fn filter_node(
        &self,
        pod: &PodSpec,
        pod_key: &str,
        node_id: &str,
        policy: &EffectivePolicy,
    ) -> NodeFilterResult {
        let devices = match self.inventory.devices_on(node_id) {
            Ok(devices) => devices,
            Err(e) => {
                debug!(node_id = %node_id, error = %e, "Node not in device inventory");
                return NodeFilterResult::failed(node_id, e.to_string());
            }
        };

        if pod.device_requests.is_empty() {
            return NodeFilterResult {
                node_id: node_id.to_string(),
                passed: true,
                bindings: Vec::new(),
                evaluations: Vec::new(),
                usage: Vec::new(),
                reason: None,
            };
        }

        let cached = self.usage.node_snapshot(node_id);
        let deadline = Instant::now() + self.telemetry_budget;

        let reconciled = join_all(devices.iter().map(|device| {
            let usage = cached.get(&device.id).copied().unwrap_or_default();
            self.reconciler.reconcile(device, usage, policy, deadline)
        }))
        .await;

        let candidates: Vec<DeviceCandidate> = devices
            .into_iter()
            .zip(reconciled)
            .map(|(device, usage)| DeviceCandidate { device, usage })
            .collect();

        let assignment = assign(&pod.device_requests, &candidates, policy);
        for evaluation in &assignment.evaluations {
            let bound = assignment.bindings.iter().any(|b| {
                b.request_index == evaluation.request_index
                    && b.device_id == evaluation.verdict.device_id
            });
            record_verdict(pod_key, node_id, &evaluation.verdict, bound);
        }

        let reason = assignment.unbound_request.map(|index| {
            let details: Vec<String> = assignment
                .evaluations
                .iter()
                .filter(|e| e.request_index == index)
                .map(|e| e.verdict.describe())
                .collect();
            let admitted_elsewhere = assignment
                .evaluations
                .iter()
                .any(|e| e.request_index == index && e.verdict.admit);
            let memory_mb = pod.device_requests[index].memory_mb;
            if details.is_empty() {
                format!("request {index} ({memory_mb} MB): no free device on node")
            } else if admitted_elsewhere {
                format!(
                    "request {index} ({memory_mb} MB): admitting devices are held by other \
                     requests; {}",
                    details.join("; ")
                )
            } else {
                format!("request {index} ({memory_mb} MB): {}", details.join("; "))
            }
        });

        let passed = assignment.is_complete();
        NodeFilterResult {
            node_id: node_id.to_string(),
            passed,
            bindings: if passed {
                assignment.bindings
            } else {
                Vec::new()
            },
            evaluations: assignment.evaluations,
            usage: candidates.into_iter().map(|c| c.usage).collect(),
            reason,
        }
    }
}

/// Emit the post-decision record operators rely on. Soft rejections are
/// only reported for the device a request was actually bound to.
fn record_verdict(pod_key: &str, node_id: &str, verdict: &AdmissionVerdict, bound: bool) {
    if verdict.reason == VerdictReason::RealTimeMemoryExceeded {
        warn!(
            pod = %pod_key,
            node_id = %node_id,
            device_id = %verdict.device_id,
            requested_mb = verdict.requested_memory_mb,
            realtime_used_mb = verdict.used_memory_mb,
            total_mb = verdict.total_memory_mb,
            safety_margin_mb = verdict.safety_margin_mb,
            available_mb = verdict.available_memory_mb,
            "Rejected device on real-time memory: {}",
            verdict.describe()
        );
    } else if verdict.soft_reject && bound {
        warn!(
            pod = %pod_key,
            node_id = %node_id,
            device_id = %verdict.device_id,
            soft_reject = true,
            requested_mb = verdict.requested_memory_mb,
            realtime_used_mb = verdict.used_memory_mb,
            total_mb = verdict.total_memory_mb,
            available_mb = verdict.available_memory_mb,
            "Admitted device despite real-time memory shortfall: {}",
            verdict.describe()
        );
    } else {
        debug!(
            pod = %pod_key,
            node_id = %node_id,
            device_id = %verdict.device_id,
            admit = verdict.admit,
            reason = %verdict.reason,
            used_fallback = verdict.used_fallback,
            "Device verdict"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;
    use crate::policy::PolicyDefaults;
    use crate::usage_store::InMemoryUsageStore;
    use gpuadmit_core::{CheckMode, DeviceDescriptor, ANNOTATION_ENABLE_REALTIME_CHECK};
    use gpuadmit_telemetry::{MockProvider, ProviderRegistry};

    fn device(node: &str, id: &str, vendor: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            vendor_tag: vendor.to_string(),
            uuid: format!("GPU-{id}"),
            total_memory_mb: 8192,
            total_compute_units: 100,
            node_id: node.to_string(),
        }
    }

    struct Fixture {
        mock: Arc<MockProvider>,
        usage: Arc<InMemoryUsageStore>,
        filter: SchedulingFilter,
    }

    fn fixture(enabled: Option<bool>, mode: CheckMode) -> Fixture {
        let mock = Arc::new(MockProvider::new());
        let registry = ProviderRegistry::new().register("NVIDIA", mock.clone());
        let inventory = StaticInventory::new(vec![
            device("node-a", "a0", "NVIDIA"),
            device("node-a", "a1", "NVIDIA"),
            device("node-b", "b0", "NVIDIA"),
            device("node-c", "c0", "AMD"),
        ]);
        let usage = Arc::new(InMemoryUsageStore::new());
        let filter = SchedulingFilter::new(
            PolicyResolver::new(PolicyDefaults {
                enabled,
                mode,
                safety_margin_mb: 100,
            }),
            UsageReconciler::new(Arc::new(registry)),
            Arc::new(inventory),
            usage.clone(),
        );
        Fixture {
            mock,
            usage,
            filter,
        }
    }

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_strict_filters_out_busy_node() {
        let fx = fixture(Some(true), CheckMode::Strict);
        fx.mock.set_usage("GPU-a0", 6144, 90, 3);
        fx.mock.set_usage("GPU-a1", 7000, 90, 3);
        fx.mock.set_usage("GPU-b0", 1024, 10, 1);

        let pod = PodSpec::new("default", "train").with_request(4096, 20);
        let result = fx.filter.filter(&pod, &nodes(&["node-a", "node-b"])).await;

        assert_eq!(result.pod, "default/train");
        assert_eq!(result.node_names, vec!["node-b"]);
        let reason = &result.failed_nodes["node-a"];
        assert!(reason.contains("a0"));
        assert!(reason.contains("6144"));

        let b = &result.node_results[1];
        assert_eq!(b.bindings.len(), 1);
        assert_eq!(b.bindings[0].device_id, "b0");
    }

    #[tokio::test]
    async fn test_annotation_disables_realtime() {
        let fx = fixture(Some(true), CheckMode::Strict);
        fx.mock.set_usage("GPU-a0", 8000, 90, 3);

        let pod = PodSpec::new("default", "p")
            .with_request(4096, 20)
            .with_annotation(ANNOTATION_ENABLE_REALTIME_CHECK, "false");
        let result = fx.filter.filter(&pod, &nodes(&["node-a"])).await;

        assert_eq!(result.node_names, vec!["node-a"]);
        assert_eq!(fx.mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_vendor_uses_cached() {
        let fx = fixture(Some(true), CheckMode::Strict);
        fx.usage.commit("node-c", "c0", 2048, 10);

        let pod = PodSpec::new("default", "p").with_request(4096, 20);
        let result = fx.filter.filter(&pod, &nodes(&["node-c"])).await;

        assert_eq!(result.node_names, vec!["node-c"]);
        let node = &result.node_results[0];
        assert!(node.usage[0].used_fallback());
        assert_eq!(node.usage[0].used_memory_mb, 2048);
    }

    #[tokio::test]
    async fn test_unknown_node_fails() {
        let fx = fixture(None, CheckMode::Strict);
        let pod = PodSpec::new("default", "p").with_request(1024, 10);
        let result = fx.filter.filter(&pod, &nodes(&["node-z"])).await;

        assert!(result.node_names.is_empty());
        assert!(result.failed_nodes["node-z"].contains("node-z"));
    }

    #[tokio::test]
    async fn test_realtime_figures_are_not_written_back() {
        let fx = fixture(Some(true), CheckMode::Strict);
        fx.usage.commit("node-b", "b0", 512, 5);
        fx.mock.set_usage("GPU-b0", 3000, 50, 2);

        let pod = PodSpec::new("default", "p").with_request(1024, 10);
        let result = fx.filter.filter(&pod, &nodes(&["node-b"])).await;

        assert_eq!(result.node_results[0].usage[0].used_memory_mb, 3000);
        assert_eq!(fx.usage.get("node-b", "b0").used_memory_mb, 512);
    }

    #[tokio::test]
    async fn test_pod_without_requests_passes() {
        let fx = fixture(Some(true), CheckMode::Strict);
        let pod = PodSpec::new("default", "cpu-only");
        let result = fx.filter.filter(&pod, &nodes(&["node-a", "node-b"])).await;

        assert_eq!(result.node_names, vec!["node-a", "node-b"]);
        assert_eq!(fx.mock.call_count(), 0);
    }
}

//! Cached per-device usage committed by the allocation side

use gpuadmit_core::CachedUsage;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

type NodeUsage = HashMap<String, CachedUsage>;

/// Store of the scheduler's bookkeeping, keyed by (node, device).
///
/// Reads return copies taken under one lock, so a reader never sees a
/// half-applied write.
pub trait UsageStore: Send + Sync {
    /// Cached usage of one device; zero when nothing was committed
    fn get(&self, node_id: &str, device_id: &str) -> CachedUsage;

    /// Consistent copy of every device's usage on a node
    fn node_snapshot(&self, node_id: &str) -> NodeUsage;

    /// Record capacity committed to a pod
    fn commit(&self, node_id: &str, device_id: &str, memory_mb: u64, compute_units: u32);

    /// Return capacity previously committed to a pod
    fn release(&self, node_id: &str, device_id: &str, memory_mb: u64, compute_units: u32);
}

/// Process-local usage store
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    nodes: RwLock<HashMap<String, NodeUsage>>,
}

impl InMemoryUsageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for InMemoryUsageStore {
    fn get(&self, node_id: &str, device_id: &str) -> CachedUsage {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .and_then(|devices| devices.get(device_id))
            .copied()
            .unwrap_or_default()
    }

    fn node_snapshot(&self, node_id: &str) -> NodeUsage {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    fn commit(&self, node_id: &str, device_id: &str, memory_mb: u64, compute_units: u32) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let usage = nodes
            .entry(node_id.to_string())
            .or_default()
            .entry(device_id.to_string())
            .or_default();

        usage.used_memory_mb = usage.used_memory_mb.saturating_add(memory_mb);
        usage.used_compute_units = usage.used_compute_units.saturating_add(compute_units);
        usage.pod_count = usage.pod_count.saturating_add(1);

        info!(
            node_id = %node_id,
            device_id = %device_id,
            memory_mb = memory_mb,
            compute_units = compute_units,
            used_memory_mb = usage.used_memory_mb,
            "Committed device usage"
        );
    }

    fn release(&self, node_id: &str, device_id: &str, memory_mb: u64, compute_units: u32) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(devices) = nodes.get_mut(node_id) else {
            return;
        };
        let Some(usage) = devices.get_mut(device_id) else {
            return;
        };

        usage.used_memory_mb = usage.used_memory_mb.saturating_sub(memory_mb);
        usage.used_compute_units = usage.used_compute_units.saturating_sub(compute_units);
        usage.pod_count = usage.pod_count.saturating_sub(1);

        debug!(
            node_id = %node_id,
            device_id = %device_id,
            used_memory_mb = usage.used_memory_mb,
            "Released device usage"
        );

        if *usage == CachedUsage::default() {
            devices.remove(device_id);
        }
    }
}

//! Device inventory

use gpuadmit_core::{DeviceDescriptor, GpuAdmitError, GpuAdmitResult};
use std::collections::BTreeMap;

/// Read-only view of the devices discovered on each node
pub trait DeviceInventory: Send + Sync {
    /// Devices on a node, in discovery order
    fn devices_on(&self, node_id: &str) -> GpuAdmitResult<Vec<DeviceDescriptor>>;

    /// Look a device up by inventory ID
    fn device(&self, device_id: &str) -> Option<DeviceDescriptor>;

    /// Known node IDs, sorted
    fn nodes(&self) -> Vec<String>;
}

/// Inventory fixed at construction, e.g. from the daemon config
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    by_node: BTreeMap<String, Vec<DeviceDescriptor>>,
}

impl StaticInventory {
    /// Group devices by node, keeping their order within each node
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let mut by_node: BTreeMap<String, Vec<DeviceDescriptor>> = BTreeMap::new();
        for device in devices {
            by_node.entry(device.node_id.clone()).or_default().push(device);
        }
        Self { by_node }
    }

    /// Total number of devices
    pub fn device_count(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }
}

impl DeviceInventory for StaticInventory {
    fn devices_on(&self, node_id: &str) -> GpuAdmitResult<Vec<DeviceDescriptor>> {
        self.by_node
            .get(node_id)
            .cloned()
            .ok_or_else(|| GpuAdmitError::NodeNotFound(node_id.to_string()))
    }

    fn device(&self, device_id: &str) -> Option<DeviceDescriptor> {
        self.by_node
            .values()
            .flatten()
            .find(|d| d.id == device_id)
            .cloned()
    }

    fn nodes(&self) -> Vec<String> {
        self.by_node.keys().cloned().collect()
    }
}

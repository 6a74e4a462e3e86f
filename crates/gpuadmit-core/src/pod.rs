//! Pod and device request types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::parse_bool_value;
use crate::GpuAdmitResult;

/// Domain prefix for gpuadmit pod annotations
pub const ANNOTATION_DOMAIN: &str = "gpuadmit.io";

/// Pod annotation that turns real-time checking on or off for one pod
pub const ANNOTATION_ENABLE_REALTIME_CHECK: &str = "gpuadmit.io/enable-realtime-check";

/// A pod being scheduled, reduced to what admission needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSpec {
    /// Pod UID
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,
    /// Namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Pod annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// One entry per requested device fraction
    #[serde(default)]
    pub device_requests: Vec<DeviceRequest>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl PodSpec {
    /// Create a pod with no annotations and no device requests
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            uid: Uuid::new_v4(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations: BTreeMap::new(),
            device_requests: Vec::new(),
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Per-pod real-time check override, if the annotation is present.
    ///
    /// Returns an error when the annotation holds something other than a boolean.
    pub fn realtime_check_override(&self) -> GpuAdmitResult<Option<bool>> {
        match self.annotations.get(ANNOTATION_ENABLE_REALTIME_CHECK) {
            Some(value) => parse_bool_value(ANNOTATION_ENABLE_REALTIME_CHECK, value).map(Some),
            None => Ok(None),
        }
    }

    /// Builder-style helper to add a device request
    pub fn with_request(mut self, memory_mb: u64, compute_units: u32) -> Self {
        self.device_requests.push(DeviceRequest {
            memory_mb,
            compute_units,
        });
        self
    }

    /// Builder-style helper to set an annotation
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }
}

/// A fraction of one device requested by a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Requested device memory in MB
    pub memory_mb: u64,
    /// Requested compute units
    #[serde(default)]
    pub compute_units: u32,
}

//! Device assignment for the requests of one pod on one node

use gpuadmit_core::{AdmissionVerdict, DeviceDescriptor, DeviceRequest, EffectivePolicy};
use serde::{Deserialize, Serialize};

use crate::evaluator::{evaluate_request, AdmissionInput, ComputeDemand};
use crate::reconciler::ReconciledUsage;

/// A device with its reconciled usage for the current pass
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub device: DeviceDescriptor,
    pub usage: ReconciledUsage,
}

impl DeviceCandidate {
    /// Admission verdict of this device for one request
    pub fn admit(&self, request: &DeviceRequest, policy: &EffectivePolicy) -> AdmissionVerdict {
        let memory = AdmissionInput {
            requested_memory_mb: request.memory_mb,
            used_memory_mb: self.usage.used_memory_mb,
            total_memory_mb: self.device.total_memory_mb,
            safety_margin_mb: policy.safety_margin_mb,
            mode: policy.decision_mode(),
            used_fallback: self.usage.used_fallback(),
        };
        let compute = ComputeDemand {
            requested_units: request.compute_units,
            used_units: self.usage.cached.used_compute_units,
            total_units: self.device.total_compute_units,
        };
        evaluate_request(&self.device.id, &memory, &compute)
    }
}

/// Request bound to an admitting device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub request_index: usize,
    pub device_id: String,
    pub uuid: String,
    pub memory_mb: u64,
    pub compute_units: u32,
    /// Admitted in warning mode despite real-time insufficiency
    pub soft_reject: bool,
}

/// Verdict of one device for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvaluation {
    pub request_index: usize,
    pub verdict: AdmissionVerdict,
}

/// Outcome of assigning every request of a pod on one node
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub bindings: Vec<DeviceBinding>,
    /// Verdict of every device for every request, request-major
    pub evaluations: Vec<DeviceEvaluation>,
    /// First request no device could take
    pub unbound_request: Option<usize>,
}

impl Assignment {
    /// True when every request is bound
    pub fn is_complete(&self) -> bool {
        self.unbound_request.is_none()
    }
}

/// Bind every request to a distinct admitting device.
///
/// Each device is judged against each request once, then requests are
/// matched in order through augmenting paths: a request takes the first free
/// admitting device, and otherwise tries to move an earlier request to
/// another device it admits. A node fails only when no complete binding
/// exists. Inventory order breaks ties, so the result is deterministic.
pub fn assign(
    requests: &[DeviceRequest],
    candidates: &[DeviceCandidate],
    policy: &EffectivePolicy,
) -> Assignment {
    let verdicts: Vec<Vec<AdmissionVerdict>> = requests
        .iter()
        .map(|request| candidates.iter().map(|c| c.admit(request, policy)).collect())
        .collect();

    let mut owner: Vec<Option<usize>> = vec![None; candidates.len()];
    let mut unbound_request = None;
    for request_index in 0..requests.len() {
        let mut visited = vec![false; candidates.len()];
        if !augment(request_index, &verdicts, &mut owner, &mut visited) {
            unbound_request = Some(request_index);
            break;
        }
    }

    let mut bindings: Vec<DeviceBinding> = owner
        .iter()
        .enumerate()
        .filter_map(|(slot, owner)| owner.map(|request_index| (slot, request_index)))
        .map(|(slot, request_index)| {
            let request = &requests[request_index];
            let device = &candidates[slot].device;
            DeviceBinding {
                request_index,
                device_id: device.id.clone(),
                uuid: device.uuid.clone(),
                memory_mb: request.memory_mb,
                compute_units: request.compute_units,
                soft_reject: verdicts[request_index][slot].soft_reject,
            }
        })
        .collect();
    bindings.sort_by_key(|b| b.request_index);

    let evaluations = verdicts
        .into_iter()
        .enumerate()
        .flat_map(|(request_index, row)| {
            row.into_iter().map(move |verdict| DeviceEvaluation {
                request_index,
                verdict,
            })
        })
        .collect();

    Assignment {
        bindings,
        evaluations,
        unbound_request,
    }
}

/// Find a device for `request`, relocating earlier requests if needed
fn augment(
    request: usize,
    verdicts: &[Vec<AdmissionVerdict>],
    owner: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    let admits = |slot: usize| verdicts[request][slot].admit;

    if let Some(slot) = (0..owner.len()).find(|&slot| owner[slot].is_none() && admits(slot)) {
        owner[slot] = Some(request);
        return true;
    }

    for slot in 0..owner.len() {
        if visited[slot] || !admits(slot) {
            continue;
        }
        visited[slot] = true;

        if let Some(holder) = owner[slot] {
            if augment(holder, verdicts, owner, visited) {
                owner[slot] = Some(request);
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::UsageSource;
    use gpuadmit_core::{CachedUsage, CheckMode, EnablementSource, VerdictReason};

    fn candidate(id: &str, total_mb: u64, used_mb: u64, source: UsageSource) -> DeviceCandidate {
        DeviceCandidate {
            device: DeviceDescriptor {
                id: id.to_string(),
                vendor_tag: "NVIDIA".to_string(),
                uuid: format!("GPU-{id}"),
                total_memory_mb: total_mb,
                total_compute_units: 100,
                node_id: "node-a".to_string(),
            },
            usage: ReconciledUsage {
                device_id: id.to_string(),
                cached: CachedUsage::default(),
                used_memory_mb: used_mb,
                source,
                fallback_error: None,
            },
        }
    }

    fn strict() -> EffectivePolicy {
        EffectivePolicy {
            enabled: true,
            mode: CheckMode::Strict,
            safety_margin_mb: 100,
            source: EnablementSource::ProcessDefault,
        }
    }

    fn request(memory_mb: u64) -> DeviceRequest {
        DeviceRequest {
            memory_mb,
            compute_units: 10,
        }
    }

    #[test]
    fn test_first_admitting_device_wins() {
        let candidates = vec![
            candidate("gpu-0", 8192, 6144, UsageSource::RealTime),
            candidate("gpu-1", 8192, 0, UsageSource::RealTime),
            candidate("gpu-2", 8192, 0, UsageSource::RealTime),
        ];
        let assignment = assign(&[request(4096)], &candidates, &strict());

        assert!(assignment.is_complete());
        assert_eq!(assignment.bindings.len(), 1);
        assert_eq!(assignment.bindings[0].device_id, "gpu-1");
        assert_eq!(assignment.evaluations.len(), 3);
        assert_eq!(
            assignment.evaluations[0].verdict.reason,
            VerdictReason::RealTimeMemoryExceeded
        );
    }

    #[test]
    fn test_requests_take_distinct_devices() {
        let candidates = vec![
            candidate("gpu-0", 8192, 0, UsageSource::RealTime),
            candidate("gpu-1", 8192, 0, UsageSource::RealTime),
        ];
        let assignment = assign(&[request(1024), request(1024)], &candidates, &strict());

        let ids: Vec<&str> = assignment.bindings.iter().map(|b| b.device_id.as_str()).collect();
        assert_eq!(ids, vec!["gpu-0", "gpu-1"]);
    }

    #[test]
    fn test_unbound_request() {
        let candidates = vec![candidate("gpu-0", 8192, 0, UsageSource::RealTime)];
        let assignment = assign(&[request(1024), request(1024)], &candidates, &strict());

        assert!(!assignment.is_complete());
        assert_eq!(assignment.unbound_request, Some(1));
        assert_eq!(assignment.bindings.len(), 1);
    }

    #[test]
    fn test_small_request_moves_aside_for_large_one() {
        let candidates = vec![
            candidate("gpu-0", 8192, 0, UsageSource::RealTime),
            candidate("gpu-1", 8192, 6000, UsageSource::RealTime),
        ];
        let assignment = assign(&[request(1024), request(4096)], &candidates, &strict());

        assert!(assignment.is_complete());
        let bound: Vec<(usize, &str)> = assignment
            .bindings
            .iter()
            .map(|b| (b.request_index, b.device_id.as_str()))
            .collect();
        assert_eq!(bound, vec![(0, "gpu-1"), (1, "gpu-0")]);
    }

    #[test]
    fn test_no_complete_binding() {
        let candidates = vec![
            candidate("gpu-0", 8192, 0, UsageSource::RealTime),
            candidate("gpu-1", 8192, 6000, UsageSource::RealTime),
        ];
        let assignment = assign(&[request(4096), request(4096)], &candidates, &strict());

        assert!(!assignment.is_complete());
        assert_eq!(assignment.unbound_request, Some(1));
    }

    #[test]
    fn test_compute_exhausted_device_is_skipped() {
        let mut busy = candidate("gpu-0", 8192, 0, UsageSource::Cached);
        busy.usage.cached.used_compute_units = 95;
        let candidates = vec![busy, candidate("gpu-1", 8192, 0, UsageSource::Cached)];

        let assignment = assign(&[request(1024)], &candidates, &strict());
        assert_eq!(assignment.bindings[0].device_id, "gpu-1");
        assert_eq!(
            assignment.evaluations[0].verdict.reason,
            VerdictReason::CachedComputeExceeded
        );
    }

    #[test]
    fn test_warning_binding_is_flagged() {
        let mut policy = strict();
        policy.mode = CheckMode::Warning;
        let candidates = vec![candidate("gpu-0", 8192, 6144, UsageSource::RealTime)];

        let assignment = assign(&[request(4096)], &candidates, &policy);
        assert!(assignment.is_complete());
        assert!(assignment.bindings[0].soft_reject);
    }
}

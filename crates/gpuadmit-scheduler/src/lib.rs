//! gpuadmit-scheduler: Admission logic for GPU-sharing pods
//!
//! This crate turns a pod's device requests into a per-node filter result:
//! - Policy resolution from pod annotation and process defaults
//! - Reconciliation of cached bookkeeping with real-time telemetry
//! - Admission evaluation in strict, warning or disabled mode
//! - Device assignment across a node's candidate devices

pub mod evaluator;
pub mod filter;
pub mod inventory;
pub mod placement;
pub mod policy;
pub mod reconciler;
pub mod usage_store;

pub use evaluator::{evaluate, evaluate_request, AdmissionInput, ComputeDemand};
pub use filter::{FilterResult, NodeFilterResult, SchedulingFilter};
pub use inventory::{DeviceInventory, StaticInventory};
pub use placement::{DeviceBinding, DeviceEvaluation};
pub use policy::{resolve_mode, PolicyDefaults, PolicyResolver};
pub use reconciler::{ReconciledUsage, UsageReconciler, UsageSource};
pub use usage_store::{InMemoryUsageStore, UsageStore};

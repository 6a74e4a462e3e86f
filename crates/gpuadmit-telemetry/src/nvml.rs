//! NVML-backed telemetry provider
//!
//! The NVML library is loaded on first use and device UUIDs are resolved to
//! device indices at most once per process. All NVML calls run on the blocking
//! pool so a caller's deadline can abandon a slow query.

use async_trait::async_trait;
use chrono::Utc;
use gpuadmit_core::{DeviceDescriptor, RealTimeSnapshot, TelemetryError, BYTES_PER_MB};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::traits::TelemetryProvider;

type HandleMap = HashMap<String, Arc<OnceCell<u32>>>;

/// Which NVML call an error came from
#[derive(Debug, Clone, Copy)]
enum Step {
    Resolve,
    Query(&'static str),
}

/// Telemetry provider for NVIDIA devices
#[derive(Clone, Default)]
pub struct NvmlProvider {
    state: Arc<NvmlState>,
}

#[derive(Default)]
struct NvmlState {
    /// NVML library handle, initialised on first successful load
    library: OnceCell<Nvml>,
    /// Device UUID to NVML index, one cell per UUID
    handles: RwLock<HandleMap>,
}

impl NvmlProvider {
    /// Create a provider. NVML is not loaded until the first query.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NvmlState {
    fn library(&self) -> Result<&Nvml, TelemetryError> {
        self.library
            .get_or_try_init(|| {
                Nvml::init().map(|nvml| {
                    info!("NVML library initialized");
                    nvml
                })
            })
            .map_err(|e| TelemetryError::LibraryUninitialized {
                detail: e.to_string(),
            })
    }

    /// Cell for a UUID, created on first access.
    fn handle_cell(&self, uuid: &str) -> Arc<OnceCell<u32>> {
        if let Some(cell) = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
        {
            return Arc::clone(cell);
        }

        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(handles.entry(uuid.to_string()).or_default())
    }

    fn forget_handle(&self, uuid: &str) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uuid);
    }

    fn resolve_index(&self, nvml: &Nvml, uuid: &str) -> Result<u32, TelemetryError> {
        let cell = self.handle_cell(uuid);
        cell.get_or_try_init(|| {
            let index = nvml.device_by_uuid(uuid)?.index()?;
            debug!(uuid = %uuid, index = index, "Resolved NVML device handle");
            Ok::<u32, NvmlError>(index)
        })
        .copied()
        .map_err(|e| classify(e, uuid, Step::Resolve))
    }

    fn query(&self, uuid: &str) -> Result<RealTimeSnapshot, TelemetryError> {
        let nvml = self.library()?;
        let index = self.resolve_index(nvml, uuid)?;

        let device = match nvml.device_by_index(index) {
            Ok(device) => device,
            Err(e) => {
                // The cached index no longer points at a usable device
                self.forget_handle(uuid);
                return Err(classify(e, uuid, Step::Resolve));
            }
        };

        let memory = device
            .memory_info()
            .map_err(|e| classify(e, uuid, Step::Query("memory_info")))?;
        let utilization = device
            .utilization_rates()
            .map_err(|e| classify(e, uuid, Step::Query("utilization_rates")))?;
        let processes = device
            .running_compute_processes()
            .map_err(|e| classify(e, uuid, Step::Query("running_compute_processes")))?;

        Ok(RealTimeSnapshot {
            used_memory_mb: memory.used / BYTES_PER_MB,
            utilization_percent: utilization.gpu,
            process_count: processes.len() as u32,
            observed_at: Utc::now(),
        })
    }
}

/// Collapse an NVML error into the telemetry error taxonomy
fn classify(err: NvmlError, uuid: &str, step: Step) -> TelemetryError {
    let detail = err.to_string();
    match (&err, step) {
        (
            NvmlError::Uninitialized
            | NvmlError::DriverNotLoaded
            | NvmlError::LibraryNotFound
            | NvmlError::LibloadingError(_),
            _,
        ) => TelemetryError::LibraryUninitialized { detail },
        (NvmlError::NoPermission, _) => TelemetryError::PermissionDenied {
            uuid: uuid.to_string(),
            detail,
        },
        (_, Step::Resolve) => TelemetryError::HandleResolutionFailed {
            uuid: uuid.to_string(),
            detail,
        },
        (_, Step::Query(query)) => TelemetryError::QueryFailed {
            uuid: uuid.to_string(),
            query: query.to_string(),
            detail,
        },
    }
}

#[async_trait]
impl TelemetryProvider for NvmlProvider {
    async fn fetch_usage(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<RealTimeSnapshot, TelemetryError> {
        let state = Arc::clone(&self.state);
        let uuid = device.uuid.clone();

        tokio::task::spawn_blocking(move || state.query(&uuid))
            .await
            .map_err(|e| TelemetryError::QueryFailed {
                uuid: device.uuid.clone(),
                query: "blocking task".to_string(),
                detail: e.to_string(),
            })?
    }

    fn supports_realtime_query(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "nvml"
    }
}

//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use gpuadmit_core::{CachedUsage, DeviceDescriptor, GpuAdmitError, PodSpec};
use gpuadmit_scheduler::{FilterResult, PolicyDefaults, SchedulingFilter};
use gpuadmit_telemetry::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

type ApiError = (StatusCode, String);

/// Application state shared across handlers
pub struct AppState {
    pub filter: Arc<SchedulingFilter>,
    pub registry: Arc<ProviderRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(filter: Arc<SchedulingFilter>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            filter,
            registry,
            started_at: Instant::now(),
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/filter", post(filter_pod))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:node/devices", get(list_devices))
        .route("/api/v1/usage/commit", post(commit_usage))
        .route("/api/v1/usage/release", post(release_usage))
        .route("/api/v1/policy", get(get_policy))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: GpuAdmitError) -> ApiError {
    match e {
        GpuAdmitError::NodeNotFound(_) | GpuAdmitError::DeviceNotFound(_) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Request to filter candidate nodes for a pod
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterRequest {
    pub pod: PodSpec,
    pub nodes: Vec<String>,
}

/// Filter candidate nodes for a pod
async fn filter_pod(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FilterRequest>,
) -> Json<FilterResult> {
    info!(
        pod = %req.pod.key(),
        nodes = req.nodes.len(),
        "Filter request"
    );

    Json(state.filter.filter(&req.pod, &req.nodes).await)
}

/// List nodes in the device inventory
async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.filter.inventory().nodes())
}

/// Device with its cached bookkeeping
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub device: DeviceDescriptor,
    pub cached: CachedUsage,
    pub supports_realtime_query: bool,
}

/// List devices on a node
async fn list_devices(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> Result<Json<Vec<DeviceStatus>>, ApiError> {
    let devices = state
        .filter
        .inventory()
        .devices_on(&node)
        .map_err(error_response)?;
    let cached = state.filter.usage().node_snapshot(&node);

    let statuses = devices
        .into_iter()
        .map(|device| DeviceStatus {
            cached: cached.get(&device.id).copied().unwrap_or_default(),
            supports_realtime_query: state.registry.supports_realtime_query(&device.vendor_tag),
            device,
        })
        .collect();

    Ok(Json(statuses))
}

/// Capacity committed to or released from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub node_id: String,
    pub device_id: String,
    pub memory_mb: u64,
    #[serde(default)]
    pub compute_units: u32,
}

fn check_device(state: &AppState, update: &UsageUpdate) -> Result<(), ApiError> {
    match state.filter.inventory().device(&update.device_id) {
        Some(device) if device.node_id == update.node_id => Ok(()),
        _ => Err(error_response(GpuAdmitError::DeviceNotFound(format!(
            "{}/{}",
            update.node_id, update.device_id
        )))),
    }
}

/// Record capacity committed to a pod
async fn commit_usage(
    State(state): State<Arc<AppState>>,
    Json(update): Json<UsageUpdate>,
) -> Result<Json<CachedUsage>, ApiError> {
    check_device(&state, &update)?;

    let usage = state.filter.usage();
    usage.commit(
        &update.node_id,
        &update.device_id,
        update.memory_mb,
        update.compute_units,
    );
    Ok(Json(usage.get(&update.node_id, &update.device_id)))
}

/// Return capacity previously committed to a pod
async fn release_usage(
    State(state): State<Arc<AppState>>,
    Json(update): Json<UsageUpdate>,
) -> Result<Json<CachedUsage>, ApiError> {
    check_device(&state, &update)?;

    let usage = state.filter.usage();
    usage.release(
        &update.node_id,
        &update.device_id,
        update.memory_mb,
        update.compute_units,
    );
    Ok(Json(usage.get(&update.node_id, &update.device_id)))
}

/// Get the process-wide policy defaults
async fn get_policy(State(state): State<Arc<AppState>>) -> Json<PolicyDefaults> {
    Json(*state.filter.resolver().defaults())
}

/// System status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub nodes: usize,
    pub devices: usize,
    pub telemetry_budget_ms: u64,
    pub vendors: Vec<VendorStatus>,
}

/// Telemetry support of one registered vendor tag
#[derive(Debug, Serialize, Deserialize)]
pub struct VendorStatus {
    pub tag: String,
    pub provider: String,
    pub supports_realtime_query: bool,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let inventory = state.filter.inventory();
    let nodes = inventory.nodes();
    let devices = nodes
        .iter()
        .filter_map(|node| inventory.devices_on(node).ok())
        .map(|devices| devices.len())
        .sum();

    let vendors = state
        .registry
        .registered_tags()
        .into_iter()
        .map(|tag| {
            let provider = state.registry.lookup(&tag);
            VendorStatus {
                provider: provider.name().to_string(),
                supports_realtime_query: provider.supports_realtime_query(),
                tag,
            }
        })
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        nodes: nodes.len(),
        devices,
        telemetry_budget_ms: state.filter.telemetry_budget().as_millis() as u64,
        vendors,
    })
}

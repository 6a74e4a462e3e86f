//! CLI commands implementation

use anyhow::{Context, Result};
use gpuadmit_api::rest::{DeviceStatus, FilterRequest, StatusResponse, UsageUpdate};
use gpuadmit_core::{CachedUsage, DeviceDescriptor, PodSpec};
use gpuadmit_scheduler::FilterResult;
use gpuadmit_telemetry::ProviderRegistry;
use std::path::Path;
use std::time::Duration;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Filter candidate nodes for a pod read from a JSON file
pub async fn filter(client: &ApiClient, pod_path: &Path, nodes: Vec<String>) -> Result<()> {
    let content = std::fs::read_to_string(pod_path)
        .with_context(|| format!("reading {}", pod_path.display()))?;
    let pod: PodSpec = serde_json::from_str(&content)
        .with_context(|| format!("parsing pod spec {}", pod_path.display()))?;

    let response = client
        .client
        .post(client.url("/api/v1/filter"))
        .json(&FilterRequest { pod, nodes })
        .send()
        .await?;

    if response.status().is_success() {
        let result: FilterResult = response.json().await?;
        print_filter_result(&result);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to filter nodes: {}", error);
    }

    Ok(())
}

fn print_filter_result(result: &FilterResult) {
    println!(
        "Pod {} (real-time check: {}, mode: {})",
        result.pod,
        if result.policy.enabled { "on" } else { "off" },
        result.policy.mode
    );

    for node in &result.node_results {
        if node.passed {
            println!("  {:<20} PASS", node.node_id);
            for b in &node.bindings {
                println!(
                    "    request {} -> {} ({} MB, {} units){}",
                    b.request_index,
                    b.device_id,
                    b.memory_mb,
                    b.compute_units,
                    if b.soft_reject { " [soft reject]" } else { "" }
                );
            }
        } else {
            println!(
                "  {:<20} FAIL {}",
                node.node_id,
                node.reason.as_deref().unwrap_or("")
            );
        }
    }
}

/// List nodes in the device inventory
pub async fn nodes(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/v1/nodes")).send().await?;

    if response.status().is_success() {
        let nodes: Vec<String> = response.json().await?;
        if nodes.is_empty() {
            println!("No nodes in inventory");
        } else {
            for node in nodes {
                println!("{}", node);
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list nodes: {}", error);
    }

    Ok(())
}

/// Show devices and cached usage on a node
pub async fn devices(client: &ApiClient, node: &str) -> Result<()> {
    let response = client
        .client
        .get(client.url(&format!("/api/v1/nodes/{}/devices", node)))
        .send()
        .await?;

    if response.status().is_success() {
        let devices: Vec<DeviceStatus> = response.json().await?;
        println!(
            "{:<12} {:<10} {:<40} {:>14} {:>10} {:>5} {:<9}",
            "ID", "VENDOR", "UUID", "MEMORY (MB)", "COMPUTE", "PODS", "REALTIME"
        );
        println!("{}", "-".repeat(108));
        for d in devices {
            println!(
                "{:<12} {:<10} {:<40} {:>14} {:>10} {:>5} {:<9}",
                d.device.id,
                d.device.vendor_tag,
                d.device.uuid,
                format!("{}/{}", d.cached.used_memory_mb, d.device.total_memory_mb),
                format!("{}/{}", d.cached.used_compute_units, d.device.total_compute_units),
                d.cached.pod_count,
                if d.supports_realtime_query { "yes" } else { "no" }
            );
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list devices: {}", error);
    }

    Ok(())
}

/// Commit or release capacity on a device
pub async fn update_usage(
    client: &ApiClient,
    action: &str,
    node_id: String,
    device_id: String,
    memory_mb: u64,
    compute_units: u32,
) -> Result<()> {
    let update = UsageUpdate {
        node_id,
        device_id,
        memory_mb,
        compute_units,
    };

    let response = client
        .client
        .post(client.url(&format!("/api/v1/usage/{}", action)))
        .json(&update)
        .send()
        .await?;

    if response.status().is_success() {
        let usage: CachedUsage = response.json().await?;
        println!(
            "{}/{}: {} MB, {} compute units, {} pods",
            update.node_id,
            update.device_id,
            usage.used_memory_mb,
            usage.used_compute_units,
            usage.pod_count
        );
    } else {
        let error = response.text().await?;
        eprintln!("Failed to {} usage: {}", action, error);
    }

    Ok(())
}

/// Show the process-wide policy
pub async fn policy(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/v1/policy")).send().await?;

    if response.status().is_success() {
        let policy: serde_json::Value = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&policy)?);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get policy: {}", error);
    }

    Ok(())
}

/// Show daemon status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/v1/status")).send().await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;

        println!("gpuadmit v{}", status.version);
        println!();
        println!("Uptime: {}s", status.uptime_secs);
        println!("Nodes: {}", status.nodes);
        println!("Devices: {}", status.devices);
        println!("Telemetry budget: {} ms", status.telemetry_budget_ms);
        println!();
        for v in status.vendors {
            println!(
                "  {:<10} {:<12} {}",
                v.tag,
                v.provider,
                if v.supports_realtime_query {
                    "real-time"
                } else {
                    "cached only"
                }
            );
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get status: {}", error);
    }

    Ok(())
}

/// Descriptor for a device known only by vendor and UUID
fn probe_descriptor(vendor: &str, uuid: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: uuid.to_string(),
        vendor_tag: vendor.to_string(),
        uuid: uuid.to_string(),
        total_memory_mb: 0,
        total_compute_units: 0,
        node_id: "local".to_string(),
    }
}

/// Query telemetry for local devices under one deadline
pub async fn probe(vendor: &str, timeout_ms: u64, uuids: Vec<String>) -> Result<()> {
    let registry = ProviderRegistry::with_defaults();
    let provider = registry.lookup(vendor);
    println!(
        "Provider: {} (real-time: {})",
        provider.name(),
        if provider.supports_realtime_query() { "yes" } else { "no" }
    );

    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let devices: Vec<DeviceDescriptor> =
        uuids.iter().map(|uuid| probe_descriptor(vendor, uuid)).collect();
    let results =
        futures::future::join_all(devices.iter().map(|d| registry.fetch_within(d, deadline)))
            .await;

    for (device, result) in devices.iter().zip(results) {
        match result {
            Ok(snapshot) => println!(
                "  {}: {} MB used, {}% utilization, {} processes",
                device.uuid,
                snapshot.used_memory_mb,
                snapshot.utilization_percent,
                snapshot.process_count
            ),
            Err(e) => println!("  {}: {} ({})", device.uuid, e.kind(), e),
        }
    }

    Ok(())
}

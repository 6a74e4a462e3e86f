//! gpuadmit daemon
//!
//! Serves the real-time GPU admission filter over HTTP.

mod logging;

use anyhow::Context;
use clap::Parser;
use gpuadmit_api::{create_router, AppState};
use gpuadmit_core::{parse_bool_value, DaemonConfig, GpuAdmitError, LogFormat};
use gpuadmit_scheduler::{
    DeviceInventory, InMemoryUsageStore, PolicyDefaults, PolicyResolver, SchedulingFilter, StaticInventory,
    UsageReconciler,
};
use gpuadmit_telemetry::ProviderRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// gpuadmit daemon - real-time GPU usage admission for shared-GPU scheduling
#[derive(Parser, Debug, Default)]
#[command(name = "gpuadmitd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server [default: 9095]
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable real-time usage checks (true/false, yes/no, on/off, 1/0)
    #[arg(long)]
    enable_realtime_check: Option<String>,

    /// Real-time check mode: strict, warning or disabled
    #[arg(long)]
    realtime_check_mode: Option<String>,

    /// Capacity reserved on every device, in MB
    #[arg(long)]
    safety_margin_mb: Option<u64>,

    /// Deadline for one node's telemetry queries, in milliseconds
    #[arg(long)]
    telemetry_timeout_ms: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long)]
    log_format: Option<String>,
}

/// Load the configuration: defaults, then file, then environment, then flags.
///
/// Returns the configuration and every value that was ignored. Nothing is
/// logged here because the subscriber depends on the result.
fn load_config(args: &Args) -> anyhow::Result<(DaemonConfig, Vec<String>)> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    let mut ignored: Vec<String> = config
        .realtime
        .overlay_process_env()
        .into_iter()
        .map(|e| e.to_string())
        .collect();

    ignored.extend(apply_args(&mut config, args).iter().map(|e| e.to_string()));

    Ok((config, ignored))
}

/// Overlay command-line flags. A bad flag value is skipped, the rest apply.
///
/// Returns every rejected value.
fn apply_args(config: &mut DaemonConfig, args: &Args) -> Vec<GpuAdmitError> {
    let mut errors = Vec::new();

    if let Some(address) = &args.address {
        config.api.address = address.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(value) = &args.enable_realtime_check {
        match parse_bool_value("--enable-realtime-check", value) {
            Ok(enabled) => config.realtime.enabled = Some(enabled),
            Err(e) => errors.push(e),
        }
    }
    if let Some(mode) = &args.realtime_check_mode {
        config.realtime.mode = Some(mode.clone());
    }
    if let Some(margin) = args.safety_margin_mb {
        config.realtime.safety_margin_mb = margin;
    }
    if let Some(timeout) = args.telemetry_timeout_ms {
        config.realtime.telemetry_timeout_ms = timeout;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        match format.parse::<LogFormat>() {
            Ok(format) => config.logging.format = format,
            Err(e) => errors.push(e),
        }
    }

    errors
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, ignored) = load_config(&args)?;

    logging::init(&config.logging)?;

    info!("Starting gpuadmit daemon v{}", env!("CARGO_PKG_VERSION"));
    for value in &ignored {
        warn!(error = %value, "Ignoring invalid configuration value");
    }

    let defaults = PolicyDefaults::from_config(&config.realtime);
    info!(
        enabled = ?defaults.enabled,
        mode = %defaults.mode,
        safety_margin_mb = defaults.safety_margin_mb,
        telemetry_timeout_ms = config.realtime.telemetry_timeout_ms,
        "Resolved real-time check defaults"
    );

    let inventory = StaticInventory::new(config.devices.clone());
    if inventory.device_count() == 0 {
        warn!("Device inventory is empty, every node will fail the filter");
    } else {
        info!(
            nodes = inventory.nodes().len(),
            devices = inventory.device_count(),
            "Loaded device inventory"
        );
    }

    let registry = Arc::new(ProviderRegistry::with_defaults());
    let filter = SchedulingFilter::new(
        PolicyResolver::new(defaults),
        UsageReconciler::new(Arc::clone(&registry)),
        Arc::new(inventory),
        Arc::new(InMemoryUsageStore::new()),
    )
    .with_telemetry_budget(Duration::from_millis(config.realtime.telemetry_timeout_ms));

    let router = create_router(Arc::new(AppState::new(Arc::new(filter), registry)));

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("invalid listen address")?;

    info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router).await.context("server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuadmit_core::CheckMode;

    #[test]
    fn test_flags_override_config() {
        let mut config = DaemonConfig::from_toml(
            r#"
[realtime]
enabled = false
mode = "warning"
"#,
        )
        .unwrap();
        let args = Args {
            enable_realtime_check: Some("on".to_string()),
            realtime_check_mode: Some("strict".to_string()),
            safety_margin_mb: Some(200),
            port: Some(8080),
            ..Default::default()
        };

        assert!(apply_args(&mut config, &args).is_empty());

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.realtime.enabled, Some(true));
        let defaults = PolicyDefaults::from_config(&config.realtime);
        assert_eq!(defaults.mode, CheckMode::Strict);
        assert_eq!(defaults.safety_margin_mb, 200);
    }

    #[test]
    fn test_bad_flag_is_skipped() {
        let mut config = DaemonConfig::default();
        let args = Args {
            enable_realtime_check: Some("perhaps".to_string()),
            log_format: Some("json".to_string()),
            ..Default::default()
        };

        assert_eq!(apply_args(&mut config, &args).len(), 1);
        assert_eq!(config.realtime.enabled, None);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_every_bad_flag_is_reported() {
        let mut config = DaemonConfig::default();
        let args = Args {
            enable_realtime_check: Some("perhaps".to_string()),
            log_format: Some("yaml".to_string()),
            safety_margin_mb: Some(300),
            ..Default::default()
        };

        let errors = apply_args(&mut config, &args);

        assert_eq!(errors.len(), 2);
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(messages[0].contains("perhaps"), "{}", messages[0]);
        assert!(messages[1].contains("yaml"), "{}", messages[1]);
        assert_eq!(config.realtime.enabled, None);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.realtime.safety_margin_mb, 300);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "gpuadmitd",
            "--enable-realtime-check",
            "true",
            "--realtime-check-mode",
            "warning",
            "--telemetry-timeout-ms",
            "25",
        ]);
        assert_eq!(args.enable_realtime_check.as_deref(), Some("true"));
        assert_eq!(args.realtime_check_mode.as_deref(), Some("warning"));
        assert_eq!(args.telemetry_timeout_ms, Some(25));
        assert!(args.port.is_none());
    }
}

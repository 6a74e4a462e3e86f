//! gpuadmit-telemetry: Real-time device telemetry
//!
//! This crate provides the vendor-polymorphic telemetry layer:
//! - The `TelemetryProvider` capability trait
//! - An NVML-backed provider for NVIDIA devices
//! - A shared "unsupported" provider for every other vendor
//! - A scripted mock provider for tests and dry runs
//! - The registry that maps vendor tags to providers

pub mod mock;
pub mod nvml;
pub mod registry;
pub mod traits;
pub mod unsupported;

pub use mock::MockProvider;
pub use nvml::NvmlProvider;
pub use registry::ProviderRegistry;
pub use traits::TelemetryProvider;
pub use unsupported::UnsupportedProvider;

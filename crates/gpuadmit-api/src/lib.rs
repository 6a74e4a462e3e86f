//! gpuadmit-api: REST API server for gpuadmit
//!
//! This crate exposes the admission filter over HTTP:
//! - Filtering candidate nodes for a pod
//! - Device inventory and cached usage
//! - Usage commit and release
//! - Policy and system status

pub mod rest;

pub use rest::{create_router, AppState};

//! gpuadmit-core: Core types for the gpuadmit admission layer
//!
//! This crate provides the fundamental types used throughout gpuadmit:
//! - Device descriptors, real-time snapshots and cached usage
//! - Admission policy and verdict types
//! - Pod and device request types
//! - Configuration types
//! - Error handling

pub mod admission;
pub mod config;
pub mod error;
pub mod gpu;
pub mod pod;

pub use admission::*;
pub use config::*;
pub use error::*;
pub use gpu::*;
pub use pod::*;

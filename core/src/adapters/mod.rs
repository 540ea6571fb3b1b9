//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter handles communication with external systems.

pub mod docker;
pub mod killer;
pub mod platform;

// Re-export main types for convenience
pub use docker::DockerCli;
pub use killer::ProcessKiller;
pub use platform::NativePlatform;

//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with external systems. Implementations live in `adapters`.

mod container;
mod killer;
mod platform;

pub use container::{ContainerAction, ContainerOutcome, ContainerRuntime, LogLine, LogOptions, LogSource, LogStream};
pub use killer::{ProcessKillerPort, Termination};
pub use platform::{Platform, ResolvePass};

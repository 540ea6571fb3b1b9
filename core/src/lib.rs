//! PortView Core Library
//!
//! Cross-platform engine that answers "what is on this port":
//! - Enumerate TCP/UDP sockets from the OS
//! - Resolve each socket to its owning process (once per key per pass)
//! - Tag or synthesize rows for published container ports
//! - Terminate processes and stop, restart or tail containers
//! - Drive a live watch session with coalesced, ordered frames
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure data models, ordering and filtering
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: OS and container runtime implementations
//! - `application`: Correlation and enrichment services
//!
//! # Platform Support
//! - Linux: Reads `/proc/net/*` and `/proc/<pid>`
//! - macOS: Uses `lsof` and `ps` commands
//! - Windows: Uses `netstat`, `tasklist` and CIM queries

pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub mod config;
pub mod engine;
pub mod error;
pub mod watch;

#[cfg(test)]
mod testing;

// Re-export domain types (primary API)
pub use domain::{
    format, ConnectionRecord, ContainerInfo, ContainerSourceStatus, ContainerTag, CorrelationKey,
    Family, Owner, PortMapping, ProcessInfo, Protocol, RecordFilter, RecordIdentity, Resolution,
    SerializedRecord, Snapshot, SocketEntry, SortDirection, SortKey, SortOrder, TcpState, Transport,
};

// Re-export other commonly used types
pub use config::{ColorConfig, Config, ConfigStore};
pub use engine::PortViewEngine;
pub use error::{Error, Result};
pub use ports::{ContainerAction, ContainerOutcome, LogLine, LogOptions, LogSource, LogStream, Termination};
pub use watch::{SessionInput, SessionState, WatchConfig, WatchFrame, WatchHandle};

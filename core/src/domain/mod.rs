//! Domain layer - Pure data models for sockets, processes and containers.
//!
//! This module contains domain entities that represent core business concepts.
//! These types have no I/O dependencies and can be tested in isolation.

mod container;
mod filter;
pub mod format;
mod process;
mod record;
mod snapshot;
mod socket;

// Re-export all domain types
pub use container::{ContainerInfo, ContainerTag, PortMapping};
pub use filter::{RecordFilter, SortDirection, SortKey, SortOrder};
pub use process::{ProcessInfo, Resolution};
pub use record::{ConnectionRecord, Owner, RecordIdentity, SerializedRecord, CONTAINER_USER};
pub use snapshot::{ContainerSourceStatus, Snapshot};
pub use socket::{CorrelationKey, Family, Protocol, SocketEntry, TcpState, Transport};

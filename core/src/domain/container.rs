//! Container runtime models.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::Transport;

/// One published port: `host_ip:host_port -> container_port/transport`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub transport: Transport,
    /// Bind address on the host, when the runtime reports one.
    pub host_ip: Option<IpAddr>,
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16, transport: Transport) -> Self {
        Self {
            host_port,
            container_port,
            transport,
            host_ip: None,
        }
    }

    /// `8080->80/tcp`
    pub fn describe(&self) -> String {
        format!(
            "{}->{}/{}",
            self.host_port,
            self.container_port,
            self.transport.as_str().to_ascii_lowercase()
        )
    }
}

/// A running container and the ports it publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub ports: BTreeSet<PortMapping>,
    pub running: bool,
}

impl ContainerInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            ports: BTreeSet::new(),
            running: true,
        }
    }

    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.add_mapping(mapping);
        self
    }

    /// Insert a mapping, ignoring duplicates that differ only by host address.
    ///
    /// Docker lists `0.0.0.0:8080->80/tcp` and `[::]:8080->80/tcp` for one publish.
    pub fn add_mapping(&mut self, mapping: PortMapping) {
        let duplicate = self.ports.iter().any(|existing| {
            existing.host_port == mapping.host_port
                && existing.container_port == mapping.container_port
                && existing.transport == mapping.transport
        });
        if !duplicate {
            self.ports.insert(mapping);
        }
    }

    pub fn short_id(&self) -> &str {
        super::format::short_container_id(&self.id)
    }
}

/// The part of a container attached to a connection record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerTag {
    pub id: String,
    pub name: String,
    pub image: String,
    pub mapping: PortMapping,
}

impl ContainerTag {
    pub fn new(container: &ContainerInfo, mapping: &PortMapping) -> Self {
        Self {
            id: container.id.clone(),
            name: container.name.clone(),
            image: container.image.clone(),
            mapping: mapping.clone(),
        }
    }

    /// Command line shown for container-only rows.
    pub fn synthetic_command(&self) -> String {
        format!("{} ({})", self.image, self.mapping.describe())
    }

    /// Whether a search needle matches name, image or id.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.name.to_lowercase().contains(needle_lower)
            || self.image.to_lowercase().contains(needle_lower)
            || self.id.to_lowercase().contains(needle_lower)
    }
}

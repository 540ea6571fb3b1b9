//! Container port enrichment.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

use crate::domain::{
    ConnectionRecord, ContainerInfo, ContainerSourceStatus, ContainerTag, Family,
    Protocol, Snapshot, SocketEntry, SortOrder, TcpState, Transport,
};
use crate::error::Result;
use crate::ports::ContainerRuntime;

/// Attaches container publishes to a snapshot.
pub struct ContainerEnricher<C: ContainerRuntime> {
    runtime: C,
}

impl<C: ContainerRuntime> ContainerEnricher<C> {
    pub fn new(runtime: C) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &C {
        &self.runtime
    }

    /// Query the runtime and tag the snapshot. Never fails.
    pub async fn enrich(&self, snapshot: &Snapshot) -> Snapshot {
        let listing = self.runtime.list_running().await;
        if let Err(e) = &listing {
            warn!(error = %e, "container source unavailable");
        }
        apply(snapshot, listing)
    }
}

/// Merge a container listing into `snapshot`.
///
/// A publish whose host port and transport match existing records tags
/// each of them. Otherwise one synthetic record stands in for it. A
/// failed listing leaves the records untouched and marks the source
/// unavailable.
pub fn apply(snapshot: &Snapshot, listing: Result<Vec<ContainerInfo>>) -> Snapshot {
    let containers = match listing {
        Ok(containers) => containers,
        Err(e) => {
            return snapshot.with_records(
                snapshot.records().to_vec(),
                ContainerSourceStatus::Unavailable {
                    reason: e.to_string(),
                },
            );
        }
    };

    let mut records = snapshot.records().to_vec();
    let mut synthesized = 0usize;

    for container in containers.iter().filter(|c| c.running) {
        for mapping in &container.ports {
            let tag = ContainerTag::new(container, mapping);
            let mut matched = false;

            for record in records.iter_mut().filter(|r| {
                !r.synthetic
                    && r.port() == mapping.host_port
                    && r.protocol().transport == mapping.transport
            }) {
                matched = true;
                if !record.containers.contains(&tag) {
                    record.containers.push(tag.clone());
                }
            }

            if !matched {
                synthesized += 1;
                records.push(ConnectionRecord::synthetic(synthetic_socket(&tag), tag));
            }
        }
    }

    SortOrder::default().sort(&mut records);
    debug!(
        containers = containers.len(),
        synthesized = synthesized,
        "applied container enrichment"
    );

    snapshot.with_records(
        records,
        ContainerSourceStatus::Available {
            containers: containers.len(),
        },
    )
}

fn synthetic_socket(tag: &ContainerTag) -> SocketEntry {
    let address = tag
        .mapping
        .host_ip
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let state = match tag.mapping.transport {
        Transport::Tcp => Some(TcpState::Listen),
        Transport::Udp => None,
    };

    SocketEntry {
        protocol: Protocol::new(tag.mapping.transport, Family::of(&address)),
        port: tag.mapping.host_port,
        address,
        state,
        key: None,
        uid: None,
    }
}

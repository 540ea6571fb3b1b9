//! Socket-to-process correlation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::domain::{ConnectionRecord, CorrelationKey, ProcessInfo, Resolution, Snapshot, SortOrder};
use crate::error::Result;
use crate::ports::{Platform, ResolvePass};

/// Application service that turns one enumeration into a [`Snapshot`].
///
/// Each call runs one resolve pass. Every distinct correlation key is
/// resolved exactly once and all sockets of that key share the result.
pub struct CorrelationService<P: Platform> {
    platform: P,
    sequence: AtomicU64,
}

impl<P: Platform> CorrelationService<P> {
    /// Create a new correlation service over the given platform.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Enumerate, resolve and order. Fails only if enumeration fails.
    pub async fn build_snapshot(&self, include_non_listening: bool) -> Result<Snapshot> {
        let sockets = self.platform.enumerate_sockets(include_non_listening).await?;
        let mut pass = self.platform.begin_pass().await;

        let mut owners: HashMap<CorrelationKey, Option<Arc<ProcessInfo>>> = HashMap::new();
        let mut denied = 0usize;
        let mut orphans = 0usize;

        let mut records = Vec::with_capacity(sockets.len());
        for socket in sockets {
            if !include_non_listening && !socket.is_listening() {
                continue;
            }

            let process = match socket.key {
                Some(key) => owners
                    .entry(key)
                    .or_insert_with(|| match pass.resolve(&key) {
                        Resolution::Resolved(info) => Some(Arc::new(info)),
                        Resolution::PermissionDenied(info) => {
                            denied += 1;
                            Some(Arc::new(info))
                        }
                        Resolution::NotFound => {
                            orphans += 1;
                            None
                        }
                    })
                    .clone(),
                None => None,
            };

            records.push(ConnectionRecord::new(socket, process));
        }

        SortOrder::default().sort(&mut records);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Snapshot::new(records, SystemTime::now(), sequence);

        debug!(
            platform = self.platform.name(),
            records = snapshot.len(),
            keys = owners.len(),
            denied = denied,
            orphans = orphans,
            sequence = sequence,
            "built snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Protocol, SocketEntry, TcpState};
    use crate::error::Error;
    use crate::testing::{process, tcp_listen, two_listeners, FakePlatform};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn test_two_listeners_in_port_order() {
        let service = CorrelationService::new(two_listeners());
        let snapshot = service.build_snapshot(false).await.unwrap();

        let ports: Vec<u16> = snapshot.records().iter().map(|r| r.port()).collect();
        assert_eq!(ports, vec![3000, 5432]);
        assert!(snapshot.records().iter().all(|r| !r.synthetic));

        let node = &snapshot.records()[0];
        assert_eq!(node.pid(), Some(48291));
        assert_eq!(node.process_name(), Some("node"));
        assert_eq!(node.user().as_deref(), Some("mark"));
        assert_eq!(snapshot.records()[1].user().as_deref(), Some("pg"));
    }

    #[tokio::test]
    async fn test_permission_denied_keeps_record() {
        let platform = FakePlatform::new()
            .with_socket(tcp_listen(3000, CorrelationKey::Inode(55)))
            .with_owner(
                CorrelationKey::Inode(55),
                Resolution::PermissionDenied(ProcessInfo::unknown(48291)),
            );
        let snapshot = CorrelationService::new(platform)
            .build_snapshot(false)
            .await
            .unwrap();

        let record = &snapshot.records()[0];
        assert_eq!(record.port(), 3000);
        assert_eq!(record.protocol(), Protocol::TCP);
        assert_eq!(record.process_name(), None);
        assert_eq!(record.command(), None);
        assert_eq!(record.user(), None);
    }

    #[tokio::test]
    async fn test_vanished_owner_is_orphan() {
        let platform = FakePlatform::new().with_socket(tcp_listen(8000, CorrelationKey::Inode(77)));
        let snapshot = CorrelationService::new(platform)
            .build_snapshot(false)
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].pid(), None);
        assert!(!snapshot.records()[0].synthetic);
    }

    #[tokio::test]
    async fn test_each_key_resolved_once() {
        let v6 = SocketEntry::new(
            Protocol::TCP6,
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            3000,
            Some(TcpState::Listen),
            CorrelationKey::Pid(10),
        );
        let platform = FakePlatform::new()
            .with_socket(tcp_listen(3000, CorrelationKey::Pid(10)))
            .with_socket(v6)
            .with_socket(tcp_listen(3001, CorrelationKey::Pid(10)))
            .with_owner(
                CorrelationKey::Pid(10),
                Resolution::Resolved(process(10, "vite", "dev")),
            );
        let service = CorrelationService::new(platform.clone());
        let snapshot = service.build_snapshot(false).await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(platform.resolve_count(), 1);
        let first = snapshot.records()[0].process.as_ref().unwrap();
        let last = snapshot.records()[2].process.as_ref().unwrap();
        assert!(Arc::ptr_eq(first, last));
    }

    #[tokio::test]
    async fn test_duplicate_sockets_are_collapsed() {
        let platform = two_listeners()
            .with_socket(tcp_listen(3000, CorrelationKey::Inode(55)));
        let snapshot = CorrelationService::new(platform)
            .build_snapshot(false)
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_non_listening_only_when_asked() {
        let established = SocketEntry::new(
            Protocol::TCP,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            50000,
            Some(TcpState::Established),
            CorrelationKey::Inode(55),
        );
        let service = CorrelationService::new(two_listeners().with_socket(established));

        assert_eq!(service.build_snapshot(false).await.unwrap().len(), 2);
        assert_eq!(service.build_snapshot(true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_consecutive_scans_match_and_sequence_grows() {
        let service = CorrelationService::new(two_listeners());
        let first = service.build_snapshot(false).await.unwrap();
        let second = service.build_snapshot(false).await.unwrap();

        assert_eq!(first.records(), second.records());
        assert!(second.sequence() > first.sequence());
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let platform = two_listeners();
        platform.set_failure(Some("no readable socket table"));
        let err = CorrelationService::new(platform)
            .build_snapshot(false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}

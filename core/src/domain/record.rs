//! The unified connection row and its machine-readable form.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{ContainerTag, CorrelationKey, ProcessInfo, Protocol, SocketEntry};

/// User shown for rows that only exist because a container publishes the port.
pub const CONTAINER_USER: &str = "container";

/// Who owns a record, for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    Pid(u32),
    Key(CorrelationKey),
    Container(String),
    Unknown,
}

/// Identity used to keep a selection across refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    pub protocol: Protocol,
    pub port: u16,
    pub pid: Option<u32>,
}

/// One socket joined to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub socket: SocketEntry,
    /// Shared between all records of one process. `None` for synthetic
    /// rows and for sockets whose owner vanished or is not visible.
    pub process: Option<Arc<ProcessInfo>>,
    /// Containers publishing this host port.
    pub containers: Vec<ContainerTag>,
    pub synthetic: bool,
}

impl ConnectionRecord {
    pub fn new(socket: SocketEntry, process: Option<Arc<ProcessInfo>>) -> Self {
        Self {
            socket,
            process,
            containers: Vec::new(),
            synthetic: false,
        }
    }

    /// A container-only row.
    pub fn synthetic(socket: SocketEntry, tag: ContainerTag) -> Self {
        Self {
            socket,
            process: None,
            containers: vec![tag],
            synthetic: true,
        }
    }

    pub fn port(&self) -> u16 {
        self.socket.port
    }

    pub fn protocol(&self) -> Protocol {
        self.socket.protocol
    }

    pub fn address(&self) -> IpAddr {
        self.socket.address
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    pub fn user(&self) -> Option<Cow<'_, str>> {
        if self.synthetic {
            return Some(Cow::Borrowed(CONTAINER_USER));
        }
        match self.process.as_ref().and_then(|p| p.user.as_deref()) {
            Some(user) => Some(Cow::Borrowed(user)),
            None => self.socket.uid.map(|uid| Cow::Owned(uid.to_string())),
        }
    }

    pub fn process_name(&self) -> Option<&str> {
        if self.synthetic {
            return self.containers.first().map(|c| c.name.as_str());
        }
        self.process.as_ref().and_then(|p| p.name.as_deref())
    }

    pub fn command(&self) -> Option<Cow<'_, str>> {
        if self.synthetic {
            return self
                .containers
                .first()
                .map(|c| Cow::Owned(c.synthetic_command()));
        }
        self.process
            .as_ref()
            .and_then(|p| p.command.as_deref())
            .map(Cow::Borrowed)
    }

    /// `web`, or `web+2` when three containers publish the port.
    pub fn container_label(&self) -> Option<String> {
        let first = self.containers.first()?;
        if self.containers.len() == 1 {
            Some(first.name.clone())
        } else {
            Some(format!("{}+{}", first.name, self.containers.len() - 1))
        }
    }

    pub fn owner(&self) -> Owner {
        if let Some(pid) = self.pid() {
            return Owner::Pid(pid);
        }
        if self.synthetic {
            if let Some(tag) = self.containers.first() {
                return Owner::Container(tag.id.clone());
            }
        }
        match self.socket.key {
            Some(key) => Owner::Key(key),
            None => Owner::Unknown,
        }
    }

    /// Key under which no two records of a snapshot may collide.
    pub fn dedup_key(&self) -> (Protocol, u16, IpAddr, Owner) {
        (self.protocol(), self.port(), self.address(), self.owner())
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            protocol: self.protocol(),
            port: self.port(),
            pid: self.pid(),
        }
    }

    /// Case-insensitive match over every displayed column.
    pub fn matches_search(&self, needle_lower: &str) -> bool {
        let contains = |s: &str| s.to_lowercase().contains(needle_lower);

        self.port().to_string().contains(needle_lower)
            || contains(self.protocol().label())
            || self
                .pid()
                .is_some_and(|pid| pid.to_string().contains(needle_lower))
            || self.address().to_string().contains(needle_lower)
            || self.process_name().is_some_and(contains)
            || self.command().is_some_and(|c| contains(&c))
            || self.user().is_some_and(|u| contains(&u))
            || self.containers.iter().any(|c| c.matches(needle_lower))
    }

    /// Machine-readable form, with uptime measured at `captured_at`.
    pub fn to_serialized(&self, captured_at: SystemTime) -> SerializedRecord {
        let process = self.process.as_deref();
        SerializedRecord {
            port: self.port(),
            protocol: self.protocol().label().to_string(),
            address: self.address().to_string(),
            state: self.socket.state.map(|s| s.as_str().to_string()),
            pid: self.pid(),
            user: self.user().map(Cow::into_owned),
            process: self.process_name().map(str::to_string),
            command: self.command().map(Cow::into_owned),
            uptime_secs: process
                .and_then(|p| p.uptime_at(captured_at))
                .map(|d| d.as_secs()),
            memory_bytes: process.and_then(|p| p.memory_bytes),
            cpu_secs: process.and_then(|p| p.cpu_time).map(|d| d.as_secs_f64()),
            children: process.and_then(|p| p.children),
            container: self.container_label(),
            synthetic: self.synthetic,
        }
    }
}

/// One JSON object per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRecord {
    pub port: u16,
    pub protocol: String,
    pub address: String,
    pub state: Option<String>,
    pub pid: Option<u32>,
    pub user: Option<String>,
    pub process: Option<String>,
    pub command: Option<String>,
    pub uptime_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub cpu_secs: Option<f64>,
    pub children: Option<u32>,
    pub container: Option<String>,
    pub synthetic: bool,
}

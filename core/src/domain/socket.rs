//! Raw socket facts produced by a platform enumerator.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Protocol
// ============================================================================

/// Transport layer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Parse a transport name as printed by docker, lsof or netstat.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Some(Transport::Tcp),
            "udp" | "udp4" | "udp6" => Some(Transport::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// Transport plus family, e.g. `TCP6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Protocol {
    pub transport: Transport,
    pub family: Family,
}

impl Protocol {
    pub const TCP: Protocol = Protocol::new(Transport::Tcp, Family::V4);
    pub const TCP6: Protocol = Protocol::new(Transport::Tcp, Family::V6);
    pub const UDP: Protocol = Protocol::new(Transport::Udp, Family::V4);
    pub const UDP6: Protocol = Protocol::new(Transport::Udp, Family::V6);

    pub const fn new(transport: Transport, family: Family) -> Self {
        Self { transport, family }
    }

    pub fn is_udp(&self) -> bool {
        self.transport == Transport::Udp
    }

    /// Display label: `TCP`, `TCP6`, `UDP` or `UDP6`.
    pub fn label(&self) -> &'static str {
        match (self.transport, self.family) {
            (Transport::Tcp, Family::V4) => "TCP",
            (Transport::Tcp, Family::V6) => "TCP6",
            (Transport::Udp, Family::V4) => "UDP",
            (Transport::Udp, Family::V6) => "UDP6",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// TcpState
// ============================================================================

/// TCP connection state. UDP sockets carry no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TcpState {
    Listen,
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Closing,
    Unknown,
}

impl TcpState {
    /// Decode the hex state column of `/proc/net/tcp`.
    pub fn from_proc_hex(hex: &str) -> Self {
        match hex {
            "01" => TcpState::Established,
            "02" => TcpState::SynSent,
            "03" => TcpState::SynRecv,
            "04" => TcpState::FinWait1,
            "05" => TcpState::FinWait2,
            "06" => TcpState::TimeWait,
            "07" => TcpState::Close,
            "08" => TcpState::CloseWait,
            "09" => TcpState::LastAck,
            "0A" | "0a" => TcpState::Listen,
            "0B" | "0b" => TcpState::Closing,
            _ => TcpState::Unknown,
        }
    }

    /// Decode the textual state used by lsof and netstat.
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .trim_matches(|c| c == '(' || c == ')')
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "LISTEN" | "LISTENING" => TcpState::Listen,
            "ESTABLISHED" => TcpState::Established,
            "SYNSENT" => TcpState::SynSent,
            "SYNRECV" | "SYNRECEIVED" => TcpState::SynRecv,
            "FINWAIT1" => TcpState::FinWait1,
            "FINWAIT2" => TcpState::FinWait2,
            "TIMEWAIT" => TcpState::TimeWait,
            "CLOSE" | "CLOSED" => TcpState::Close,
            "CLOSEWAIT" => TcpState::CloseWait,
            "LASTACK" => TcpState::LastAck,
            "CLOSING" => TcpState::Closing,
            _ => TcpState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TcpState::Listen => "LISTEN",
            TcpState::Established => "ESTABLISHED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRecv => "SYN_RECV",
            TcpState::FinWait1 => "FIN_WAIT1",
            TcpState::FinWait2 => "FIN_WAIT2",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::Close => "CLOSE",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::Closing => "CLOSING",
            TcpState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CorrelationKey
// ============================================================================

/// Opaque handle joining a socket to its owning process.
///
/// Linux reports an inode that must be mapped through `/proc/*/fd`;
/// other platforms report the pid inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CorrelationKey {
    Inode(u64),
    Pid(u32),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Inode(inode) => write!(f, "inode:{}", inode),
            CorrelationKey::Pid(pid) => write!(f, "pid:{}", pid),
        }
    }
}

// ============================================================================
// SocketEntry
// ============================================================================

/// One observed socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketEntry {
    pub protocol: Protocol,
    pub port: u16,
    pub address: IpAddr,
    /// `None` for UDP.
    pub state: Option<TcpState>,
    /// `None` only for rows synthesized from container publishes.
    pub key: Option<CorrelationKey>,
    /// Socket owner uid where the kernel table exposes it.
    pub uid: Option<u32>,
}

impl SocketEntry {
    /// Create a socket entry with a correlation key.
    pub fn new(
        protocol: Protocol,
        address: IpAddr,
        port: u16,
        state: Option<TcpState>,
        key: CorrelationKey,
    ) -> Self {
        Self {
            protocol,
            port,
            address,
            state,
            key: Some(key),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// TCP in LISTEN, or any UDP socket (UDP has no listen state).
    pub fn is_listening(&self) -> bool {
        self.protocol.is_udp() || self.state == Some(TcpState::Listen)
    }
}

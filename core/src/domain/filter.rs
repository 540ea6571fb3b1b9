//! Filtering and ordering of connection records.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ConnectionRecord;

// ============================================================================
// RecordFilter
// ============================================================================

/// Filter criteria for connection records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    /// Port number, or a process/container name fragment.
    pub target: Option<String>,
    /// Interactive search over every column.
    pub search_text: String,
    /// Minimum port number (inclusive).
    pub min_port: Option<u16>,
    /// Maximum port number (inclusive).
    pub max_port: Option<u16>,
}

impl RecordFilter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if any filter criteria are active.
    pub fn is_active(&self) -> bool {
        self.target.is_some()
            || !self.search_text.is_empty()
            || self.min_port.is_some()
            || self.max_port.is_some()
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &ConnectionRecord) -> bool {
        if let Some(target) = self.target.as_deref() {
            if !Self::matches_target(record, target) {
                return false;
            }
        }
        if !self.search_text.is_empty() && !record.matches_search(&self.search_text.to_lowercase()) {
            return false;
        }
        if let Some(min) = self.min_port {
            if record.port() < min {
                return false;
            }
        }
        if let Some(max) = self.max_port {
            if record.port() > max {
                return false;
            }
        }
        true
    }

    fn matches_target(record: &ConnectionRecord, target: &str) -> bool {
        if let Ok(port) = target.parse::<u16>() {
            return record.port() == port;
        }
        let needle = target.to_lowercase();
        record
            .process_name()
            .is_some_and(|n| n.to_lowercase().contains(&needle))
            || record
                .command()
                .is_some_and(|c| c.to_lowercase().contains(&needle))
            || record.containers.iter().any(|c| c.matches(&needle))
    }

    /// Reset all filter criteria to defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Set the port-or-name target.
    pub fn with_target(mut self, target: Option<impl Into<String>>) -> Self {
        self.target = target.map(Into::into);
        self
    }

    /// Set the search text.
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    /// Set the port range.
    pub fn with_port_range(mut self, min: Option<u16>, max: Option<u16>) -> Self {
        self.min_port = min;
        self.max_port = max;
        self
    }
}

// ============================================================================
// Sorting
// ============================================================================

/// Column a snapshot can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Port,
    Proto,
    Pid,
    Address,
    User,
    Process,
    Uptime,
    Memory,
    Command,
}

impl SortKey {
    pub const ALL: [SortKey; 9] = [
        SortKey::Port,
        SortKey::Proto,
        SortKey::Pid,
        SortKey::Address,
        SortKey::User,
        SortKey::Process,
        SortKey::Uptime,
        SortKey::Memory,
        SortKey::Command,
    ];

    fn position(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.position() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Zero-based column index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Port => "PORT",
            SortKey::Proto => "PROTO",
            SortKey::Pid => "PID",
            SortKey::Address => "ADDRESS",
            SortKey::User => "USER",
            SortKey::Process => "PROCESS",
            SortKey::Uptime => "UPTIME",
            SortKey::Memory => "MEM",
            SortKey::Command => "COMMAND",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggle(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Sort key plus direction. The default is ascending by port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    pub fn reversed(self) -> Self {
        Self {
            direction: self.direction.toggle(),
            ..self
        }
    }

    /// Total order: the key column, then port, protocol, pid, address
    /// and owner. Within one snapshot no two records compare equal, so
    /// `Desc` is exactly the reverse of `Asc`.
    pub fn compare(&self, a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
        let ordering = self.compare_key(a, b).then_with(|| tiebreak(a, b));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    fn compare_key(&self, a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
        match self.key {
            SortKey::Port => a.port().cmp(&b.port()),
            SortKey::Proto => a.protocol().cmp(&b.protocol()),
            SortKey::Pid => none_last(a.pid(), b.pid()),
            SortKey::Address => a.address().cmp(&b.address()),
            SortKey::User => none_last(lower(a.user().as_deref()), lower(b.user().as_deref())),
            SortKey::Process => none_last(lower(a.process_name()), lower(b.process_name())),
            // Earlier start means longer uptime, which sorts first
            SortKey::Uptime => none_last(start_time(a), start_time(b)),
            SortKey::Memory => none_last(memory(a), memory(b)),
            SortKey::Command => none_last(lower(a.command().as_deref()), lower(b.command().as_deref())),
        }
    }

    pub fn sort(&self, records: &mut [ConnectionRecord]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

fn tiebreak(a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
    a.port()
        .cmp(&b.port())
        .then_with(|| a.protocol().cmp(&b.protocol()))
        .then_with(|| none_last(a.pid(), b.pid()))
        .then_with(|| a.address().cmp(&b.address()))
        .then_with(|| a.owner().cmp(&b.owner()))
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn lower(s: Option<&str>) -> Option<String> {
    s.map(str::to_lowercase)
}

fn start_time(r: &ConnectionRecord) -> Option<std::time::SystemTime> {
    r.process.as_ref().and_then(|p| p.start_time)
}

fn memory(r: &ConnectionRecord) -> Option<u64> {
    r.process.as_ref().and_then(|p| p.memory_bytes)
}

// ============================================================================
// Tests
// ============================================================================

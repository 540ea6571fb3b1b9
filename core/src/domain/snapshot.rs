//! Immutable capture of all connection records at one instant.

use std::collections::HashSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{ConnectionRecord, RecordFilter, SerializedRecord, SortOrder};

/// Outcome of the container enrichment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ContainerSourceStatus {
    /// Enrichment was not requested.
    #[default]
    Disabled,
    Available { containers: usize },
    /// Soft failure: the runtime could not be queried and records are untagged.
    Unavailable { reason: String },
}

impl ContainerSourceStatus {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ContainerSourceStatus::Unavailable { .. })
    }
}

/// An ordered, immutable set of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    records: Vec<ConnectionRecord>,
    captured_at: SystemTime,
    sequence: u64,
    containers: ContainerSourceStatus,
}

impl Snapshot {
    /// Build a snapshot, dropping any record whose identity repeats.
    pub fn new(records: Vec<ConnectionRecord>, captured_at: SystemTime, sequence: u64) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.dedup_key()))
            .collect();

        Self {
            records,
            captured_at,
            sequence,
            containers: ContainerSourceStatus::Disabled,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), SystemTime::now(), 0)
    }

    /// Same capture, different rows. Used by the enricher.
    pub fn with_records(&self, records: Vec<ConnectionRecord>, status: ContainerSourceStatus) -> Self {
        let mut next = Self::new(records, self.captured_at, self.sequence);
        next.containers = status;
        next
    }

    pub fn with_container_status(mut self, status: ContainerSourceStatus) -> Self {
        self.containers = status;
        self
    }

    pub fn records(&self) -> &[ConnectionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn container_status(&self) -> &ContainerSourceStatus {
        &self.containers
    }

    /// Filtered and sorted view sharing this snapshot's capture metadata.
    pub fn view(&self, filter: &RecordFilter, order: SortOrder) -> Snapshot {
        let mut records: Vec<ConnectionRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        order.sort(&mut records);

        Snapshot {
            records,
            captured_at: self.captured_at,
            sequence: self.sequence,
            containers: self.containers.clone(),
        }
    }

    pub fn to_serialized(&self) -> Vec<SerializedRecord> {
        self.records
            .iter()
            .map(|r| r.to_serialized(self.captured_at))
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

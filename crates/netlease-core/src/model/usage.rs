// ── Usage accounting types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::network::{NetworkId, NetworkKind};
use super::request::RequestType;

/// One completed transfer as reported by a transfer collaborator.
/// Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub network_id: NetworkId,
    /// Kind resolved when the record was written.
    pub network_kind: NetworkKind,
    pub request_type: RequestType,
    pub bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate usage over one accounting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsagePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub by_kind: BTreeMap<NetworkKind, u64>,
    pub by_request: BTreeMap<RequestType, u64>,
    pub records: usize,
}

impl UsagePeriod {
    pub fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            by_kind: BTreeMap::new(),
            by_request: BTreeMap::new(),
            records: 0,
        }
    }

    /// Fold records falling inside `[start, end]` into a new period.
    pub fn fold<'a>(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: impl IntoIterator<Item = &'a UsageRecord>,
    ) -> Self {
        records
            .into_iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .fold(Self::empty(start, end), |mut period, r| {
                let kind = period.by_kind.entry(r.network_kind).or_default();
                *kind = kind.saturating_add(r.bytes);
                let request = period.by_request.entry(r.request_type).or_default();
                *request = request.saturating_add(r.bytes);
                period.records += 1;
                period
            })
    }

    pub fn bytes_for(&self, kind: NetworkKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn bytes_for_request(&self, request: RequestType) -> u64 {
        self.by_request.get(&request).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.by_kind
            .values()
            .fold(0u64, |acc, b| acc.saturating_add(*b))
    }
}

//! Time-bounded reading storage.
//!
//! Readings are partitioned by protocol family (one `ReadingStore` each) and
//! by kind (glucose vs. infusion rate). Partitions stay sorted by timestamp
//! and drop anything older than the retention window on every insert.

use crate::{ProtocolFamily, Reading, ReadingKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Readings for one protocol family
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStore {
    #[serde(default)]
    pub bg_readings: Vec<Reading>,
    #[serde(default)]
    pub infusion_rates: Vec<Reading>,
}

impl ReadingStore {
    pub fn partition(&self, kind: ReadingKind) -> &[Reading] {
        match kind {
            ReadingKind::Glucose => &self.bg_readings,
            ReadingKind::InfusionRate => &self.infusion_rates,
        }
    }

    fn partition_mut(&mut self, kind: ReadingKind) -> &mut Vec<Reading> {
        match kind {
            ReadingKind::Glucose => &mut self.bg_readings,
            ReadingKind::InfusionRate => &mut self.infusion_rates,
        }
    }

    /// Insert a reading in timestamp order, then evict entries older than
    /// `retention` relative to `now`. Returns how many were evicted.
    pub fn insert(&mut self, reading: Reading, now: DateTime<Utc>, retention: Duration) -> usize {
        let partition = self.partition_mut(reading.kind);
        let idx = partition.partition_point(|r| r.timestamp <= reading.timestamp);
        partition.insert(idx, reading);

        let before = partition.len();
        partition.retain(|r| now - r.timestamp <= retention);
        let evicted = before - partition.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} readings older than {:?}", evicted, retention);
        }
        evicted
    }

    /// Readings of `kind` with `from <= timestamp <= to`
    pub fn window(
        &self,
        kind: ReadingKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &Reading> {
        let partition = self.partition(kind);
        let start = partition.partition_point(|r| r.timestamp < from);
        partition[start..]
            .iter()
            .take_while(move |r| r.timestamp <= to)
    }

    /// Readings of `kind` with `timestamp >= from`
    pub fn since(&self, kind: ReadingKind, from: DateTime<Utc>) -> &[Reading] {
        let partition = self.partition(kind);
        let start = partition.partition_point(|r| r.timestamp < from);
        &partition[start..]
    }

    /// Remove every reading of `kind`, returning how many were removed
    pub fn clear(&mut self, kind: ReadingKind) -> usize {
        let partition = self.partition_mut(kind);
        let removed = partition.len();
        partition.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.bg_readings.len() + self.infusion_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore the ordering invariant after loading from storage
    pub(crate) fn normalize(&mut self, family: ProtocolFamily) {
        for partition in [&mut self.bg_readings, &mut self.infusion_rates] {
            partition.retain(|r| r.value.is_finite() && r.protocol_family == family);
            partition.sort_by_key(|r| r.timestamp);
        }
        self.bg_readings.retain(|r| r.kind == ReadingKind::Glucose);
        self.infusion_rates
            .retain(|r| r.kind == ReadingKind::InfusionRate);
    }
}

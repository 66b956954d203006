//! Calculation history log.
//!
//! Every applied decision is logged, newest first, up to a fixed cap.
//! Persisted under the `calculation_history` key.

use crate::TitrationDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub inputs: String,
    pub result: String,
    pub is_critical: bool,
}

impl HistoryEntry {
    pub fn from_decision(decision: &TitrationDecision, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: at,
            protocol: decision.protocol.name().to_string(),
            inputs: decision.inputs.clone(),
            result: decision.result_summary(),
            is_critical: decision.is_critical(),
        }
    }
}

/// Bounded, newest-first list of calculations
#[derive(Clone, Debug, PartialEq)]
pub struct CalculationHistory {
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl Default for CalculationHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl CalculationHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Rebuild from persisted entries, keeping the newest `max_entries`
    pub fn from_entries(mut entries: Vec<HistoryEntry>, max_entries: usize) -> Self {
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let mut history = Self::new(max_entries);
        entries.truncate(history.max_entries);
        history.entries = entries;
        history
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.insert(0, entry);
        if self.entries.len() > self.max_entries {
            self.entries.truncate(self.max_entries);
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

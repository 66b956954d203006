//! Application controller.
//!
//! Owns the monitoring state, calculation history and preferences, and
//! writes each of them through to a `KeyValueStore` after every mutation.
//! A store failure is logged and the controller continues in memory.

use crate::config::Config;
use crate::history::{CalculationHistory, HistoryEntry};
use crate::monitor::{ClearScope, MonitorSettings, MonitoringState};
use crate::persist::{KeyValueStore, MemoryStore, HISTORY_KEY, MONITORING_KEY, PREFERENCES_KEY};
use crate::trend::{build_series, SeriesSelector, TrendPoint};
use crate::{Error, Flag, ProtocolFamily, ReadingKind, Result, TitrationDecision};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Operator preferences
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default)]
    pub disclaimer_accepted: bool,
}

pub struct Controller {
    store: Box<dyn KeyValueStore>,
    monitor: MonitoringState,
    history: CalculationHistory,
    preferences: Preferences,
    degraded: bool,
}

impl Controller {
    /// Load all persisted state from `store`
    pub fn open(store: Box<dyn KeyValueStore>, config: &Config) -> Self {
        let mut controller = Self {
            store,
            monitor: MonitoringState::new(MonitorSettings::from(&config.monitoring)),
            history: CalculationHistory::new(config.history.max_entries),
            preferences: Preferences::default(),
            degraded: false,
        };

        let settings = *controller.monitor.settings();
        if let Some(text) = controller.read(MONITORING_KEY) {
            controller.monitor = MonitoringState::from_json(&text, settings);
        }
        if let Some(entries) = controller.read_json::<Vec<HistoryEntry>>(HISTORY_KEY) {
            controller.history = CalculationHistory::from_entries(entries, config.history.max_entries);
        }
        if let Some(prefs) = controller.read_json::<Preferences>(PREFERENCES_KEY) {
            controller.preferences = prefs;
        }

        tracing::debug!(
            "Controller opened with {} readings, {} history entries",
            controller.monitor.status().total_readings,
            controller.history.len()
        );
        controller
    }

    /// Controller backed by a fresh in-memory store
    pub fn in_memory(config: &Config) -> Self {
        Self::open(Box::new(MemoryStore::new()), config)
    }

    fn read(&mut self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let text = self.read(key)?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to parse stored '{}': {}. Using defaults.", key, e);
                None
            }
        }
    }

    fn degrade(&mut self, error: &Error) {
        if !self.degraded {
            tracing::warn!("Persistence unavailable ({}). Continuing in memory only.", error);
            self.degraded = true;
            self.store = Box::new(MemoryStore::new());
        }
    }

    fn write<T: Serialize>(&mut self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(Error::from)
            .and_then(|text| self.store.set(key, &text));
        if let Err(e) = result {
            self.degrade(&e);
            // Keep the in-memory copy current
            if let Ok(text) = serde_json::to_string(value) {
                let _ = self.store.set(key, &text);
            }
        }
    }

    fn save_monitor(&mut self) {
        let monitor = self.monitor.clone();
        self.write(MONITORING_KEY, &monitor);
    }

    fn save_history(&mut self) {
        let entries = self.history.entries().to_vec();
        self.write(HISTORY_KEY, &entries);
    }

    fn save_preferences(&mut self) {
        let prefs = self.preferences.clone();
        self.write(PREFERENCES_KEY, &prefs);
    }

    /// Log a confirmed decision and feed its observations to monitoring.
    ///
    /// Returns the flags raised by the new readings.
    pub fn apply(&mut self, decision: &TitrationDecision, at: DateTime<Utc>) -> Result<Vec<Flag>> {
        if let Some(bad) = decision.observations.iter().find(|o| !o.value.is_finite()) {
            return Err(Error::Validation(format!(
                "Observation value must be a finite number, got {}",
                bad.value
            )));
        }

        let mut raised = Vec::new();
        if let Some(family) = decision.protocol.family() {
            for obs in &decision.observations {
                raised.extend(self.monitor.record(family, obs.kind, obs.value, at)?);
            }
        }
        self.history.push(HistoryEntry::from_decision(decision, at));

        tracing::info!(
            "Applied {}: {}",
            decision.protocol.name(),
            decision.result_summary()
        );
        self.save_monitor();
        self.save_history();
        Ok(raised)
    }

    /// Record a reading taken at `at` directly, outside any calculation
    pub fn record(
        &mut self,
        family: ProtocolFamily,
        kind: ReadingKind,
        value: f64,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Flag>> {
        let raised = self.monitor.record_at(family, kind, value, at, now)?;
        self.save_monitor();
        Ok(raised)
    }

    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        let found = self.monitor.acknowledge(id);
        if found {
            self.save_monitor();
        }
        found
    }

    pub fn clear_flag(&mut self, id: Uuid) -> Option<Flag> {
        let removed = self.monitor.clear(id);
        if removed.is_some() {
            self.save_monitor();
        }
        removed
    }

    pub fn clear_tracking_data(&mut self, scope: ClearScope) -> usize {
        let removed = self.monitor.clear_tracking_data(scope);
        self.save_monitor();
        removed
    }

    pub fn series(
        &self,
        family: ProtocolFamily,
        selector: SeriesSelector,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Vec<TrendPoint> {
        build_series(&self.monitor, family, selector, lookback, now)
    }

    pub fn monitor(&self) -> &MonitoringState {
        &self.monitor
    }

    pub fn history(&self) -> &CalculationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.save_history();
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn update_preferences<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Preferences),
    {
        f(&mut self.preferences);
        self.save_preferences();
    }

    /// Whether persistence failed and state now lives in memory only
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

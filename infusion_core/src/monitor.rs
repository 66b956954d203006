//! Sliding-window monitoring and provider-notification flags.
//!
//! Every recorded reading re-evaluates the window rules of its protocol
//! family at the reading's own timestamp. A rule fires when its window
//! holds enough readings and all of them satisfy the predicate, subject to
//! a per-condition cooldown. Flags are only removed by an explicit clear.

use crate::config::MonitoringConfig;
use crate::store::ReadingStore;
use crate::{Error, Flag, FlagSeverity, FlagType, ProtocolFamily, Reading, ReadingKind, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Window and cooldown parameters for the engine
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorSettings {
    /// Readings older than this (relative to the clock at insert) are evicted
    pub retention: Duration,
    /// Minimum gap between two flags of the same condition
    pub cooldown: Duration,
    /// Glucose and rate readings closer than this share a trend point
    pub merge_tolerance: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            retention: Duration::hours(24),
            cooldown: Duration::hours(1),
            merge_tolerance: Duration::seconds(60),
        }
    }
}

impl From<&MonitoringConfig> for MonitorSettings {
    fn from(config: &MonitoringConfig) -> Self {
        let defaults = Self::default();
        Self {
            retention: Duration::try_hours(config.retention_hours).unwrap_or(defaults.retention),
            cooldown: Duration::try_minutes(config.cooldown_minutes).unwrap_or(defaults.cooldown),
            merge_tolerance: Duration::try_seconds(config.merge_tolerance_seconds)
                .unwrap_or(defaults.merge_tolerance),
        }
    }
}

/// A condition evaluated over a trailing window of one partition
struct WindowRule {
    flag_type: FlagType,
    family: ProtocolFamily,
    kind: ReadingKind,
    lookback_hours: i64,
    min_readings: usize,
    predicate: fn(f64) -> bool,
    severity: FlagSeverity,
    message: &'static str,
}

fn bg_high(v: f64) -> bool {
    v > 250.0
}

fn rate_low(v: f64) -> bool {
    v < 2.0
}

fn bg_stable(v: f64) -> bool {
    (100.0..=180.0).contains(&v)
}

const WINDOW_RULES: [WindowRule; 3] = [
    WindowRule {
        flag_type: FlagType::DkaBgHigh,
        family: ProtocolFamily::DkaHhs,
        kind: ReadingKind::Glucose,
        lookback_hours: 2,
        min_readings: 2,
        predicate: bg_high,
        severity: FlagSeverity::Critical,
        message: "Blood glucose > 250 mg/dL for 2+ consecutive hours. Notify Provider.",
    },
    WindowRule {
        flag_type: FlagType::DkaRateLow,
        family: ProtocolFamily::DkaHhs,
        kind: ReadingKind::InfusionRate,
        lookback_hours: 4,
        min_readings: 2,
        predicate: rate_low,
        severity: FlagSeverity::Critical,
        message: "Infusion rate < 2.0 units/hr for 4+ consecutive hours. Notify Provider.",
    },
    WindowRule {
        flag_type: FlagType::NonDkaStable,
        family: ProtocolFamily::NonDka,
        kind: ReadingKind::Glucose,
        lookback_hours: 6,
        min_readings: 3,
        predicate: bg_stable,
        severity: FlagSeverity::Info,
        message: "Blood glucose stable (100-180 mg/dL) for 6+ consecutive hours. Notify Provider. Consider switching to SQ insulin.",
    },
];

/// Which partitions `clear_tracking_data` empties
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearScope {
    Glucose,
    Rates,
    All,
}

/// Counts shown in the monitoring status panel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MonitoringStatus {
    pub total_readings: usize,
    pub glucose_readings: usize,
    pub rate_readings: usize,
    /// Unacknowledged flags
    pub active_flags: usize,
}

/// Reading store plus flag state, persisted under `monitoringData`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringState {
    #[serde(default)]
    pub dka_hhs: ReadingStore,
    #[serde(default)]
    pub non_dka: ReadingStore,
    /// When each condition last fired
    #[serde(default)]
    pub last_fired: BTreeMap<FlagType, DateTime<Utc>>,
    #[serde(default)]
    pub active_flags: Vec<Flag>,
    #[serde(skip)]
    settings: MonitorSettings,
}

impl MonitoringState {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: MonitorSettings) {
        self.settings = settings;
    }

    pub fn family(&self, family: ProtocolFamily) -> &ReadingStore {
        match family {
            ProtocolFamily::DkaHhs => &self.dka_hhs,
            ProtocolFamily::NonDka => &self.non_dka,
        }
    }

    fn family_mut(&mut self, family: ProtocolFamily) -> &mut ReadingStore {
        match family {
            ProtocolFamily::DkaHhs => &mut self.dka_hhs,
            ProtocolFamily::NonDka => &mut self.non_dka,
        }
    }

    /// Store a reading taken now (`at`) and evaluate the family's rules.
    ///
    /// Returns the flags raised by this reading.
    pub fn record(
        &mut self,
        family: ProtocolFamily,
        kind: ReadingKind,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Flag>> {
        self.record_at(family, kind, value, at, at)
    }

    /// Store a reading timestamped `at` when the clock reads `now`.
    ///
    /// Eviction is measured from `now`; the rules are evaluated at `at`.
    /// A reading from the future is rejected.
    pub fn record_at(
        &mut self,
        family: ProtocolFamily,
        kind: ReadingKind,
        value: f64,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Flag>> {
        if !value.is_finite() {
            return Err(Error::Validation(format!(
                "Reading value must be a finite number, got {}",
                value
            )));
        }
        if at > now {
            return Err(Error::Validation(format!(
                "Reading time {} is in the future.",
                at.to_rfc3339()
            )));
        }

        let retention = self.settings.retention;
        let reading = Reading {
            timestamp: at,
            value,
            kind,
            protocol_family: family,
        };
        self.family_mut(family).insert(reading, now, retention);
        tracing::debug!("Recorded {:?} {} for {}", kind, value, family.label());

        Ok(self.evaluate(family, at))
    }

    fn evaluate(&mut self, family: ProtocolFamily, at: DateTime<Utc>) -> Vec<Flag> {
        let mut raised = Vec::new();

        for rule in WINDOW_RULES.iter().filter(|r| r.family == family) {
            let from = at
                .checked_sub_signed(Duration::hours(rule.lookback_hours))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let mut count = 0;
            let all_match = self
                .family(family)
                .window(rule.kind, from, at)
                .inspect(|_| count += 1)
                .all(|r| (rule.predicate)(r.value));

            if count < rule.min_readings || !all_match {
                continue;
            }

            let cooled_down = match self.last_fired.get(&rule.flag_type) {
                Some(last) => at - *last > self.settings.cooldown,
                None => true,
            };
            if !cooled_down {
                tracing::debug!("{:?} suppressed by cooldown", rule.flag_type);
                continue;
            }

            let flag = Flag {
                id: Uuid::new_v4(),
                flag_type: rule.flag_type,
                message: rule.message.to_string(),
                severity: rule.severity,
                timestamp: at,
                acknowledged: false,
            };
            match rule.severity {
                FlagSeverity::Critical => tracing::warn!("Flag raised: {}", flag.message),
                FlagSeverity::Info => tracing::info!("Flag raised: {}", flag.message),
            }
            self.last_fired.insert(rule.flag_type, at);
            self.active_flags.push(flag.clone());
            raised.push(flag);
        }

        raised
    }

    /// Mark a flag acknowledged. Returns false if no flag has this id.
    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        match self.active_flags.iter_mut().find(|f| f.id == id) {
            Some(flag) => {
                flag.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Remove a flag. A missing id is a no-op.
    pub fn clear(&mut self, id: Uuid) -> Option<Flag> {
        let idx = self.active_flags.iter().position(|f| f.id == id)?;
        Some(self.active_flags.remove(idx))
    }

    /// Empty the selected partitions of both families.
    ///
    /// Returns the number of readings removed. Flags are left in place.
    pub fn clear_tracking_data(&mut self, scope: ClearScope) -> usize {
        let kinds: &[ReadingKind] = match scope {
            ClearScope::Glucose => &[ReadingKind::Glucose],
            ClearScope::Rates => &[ReadingKind::InfusionRate],
            ClearScope::All => &[ReadingKind::Glucose, ReadingKind::InfusionRate],
        };

        let mut removed = 0;
        for family in ProtocolFamily::ALL {
            for kind in kinds {
                removed += self.family_mut(family).clear(*kind);
            }
        }
        if scope == ClearScope::All {
            self.last_fired.clear();
        }

        tracing::info!("Cleared {} tracked readings ({:?})", removed, scope);
        removed
    }

    /// Flags not yet acknowledged
    pub fn unacknowledged(&self) -> impl Iterator<Item = &Flag> {
        self.active_flags.iter().filter(|f| !f.acknowledged)
    }

    pub fn status(&self) -> MonitoringStatus {
        let glucose_readings = self.dka_hhs.bg_readings.len() + self.non_dka.bg_readings.len();
        let rate_readings = self.dka_hhs.infusion_rates.len() + self.non_dka.infusion_rates.len();
        MonitoringStatus {
            total_readings: glucose_readings + rate_readings,
            glucose_readings,
            rate_readings,
            active_flags: self.unacknowledged().count(),
        }
    }

    /// Parse persisted state, discarding any section that fails to decode
    pub fn from_json(contents: &str, settings: MonitorSettings) -> Self {
        match serde_json::from_str::<serde_json::Value>(contents) {
            Ok(value) => Self::from_value(value, settings),
            Err(e) => {
                tracing::warn!("Failed to parse monitoring data: {}. Starting empty.", e);
                Self::new(settings)
            }
        }
    }

    /// Rebuild state section by section from a JSON value
    pub fn from_value(mut value: serde_json::Value, settings: MonitorSettings) -> Self {
        let mut state = Self::new(settings);
        if !value.is_object() {
            tracing::warn!("Monitoring data is not an object. Starting empty.");
            return state;
        }

        state.dka_hhs = section(&mut value, "dkaHhs");
        state.non_dka = section(&mut value, "nonDka");
        state.last_fired = section(&mut value, "lastFired");
        state.active_flags = section(&mut value, "activeFlags");

        state.dka_hhs.normalize(ProtocolFamily::DkaHhs);
        state.non_dka.normalize(ProtocolFamily::NonDka);
        state
    }
}

fn section<T: serde::de::DeserializeOwned + Default>(value: &mut serde_json::Value, key: &str) -> T {
    let Some(raw) = value.get_mut(key).map(serde_json::Value::take) else {
        return T::default();
    };
    match serde_json::from_value(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Discarding corrupt monitoring section '{}': {}", key, e);
            T::default()
        }
    }
}

//! Core domain types for the infusion titration system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Protocol families and reading kinds
//! - Readings and provider-notification flags
//! - Titration decisions produced by the rule engines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Readings
// ============================================================================

/// Protocol family a reading belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolFamily {
    DkaHhs,
    NonDka,
}

impl ProtocolFamily {
    pub const ALL: [ProtocolFamily; 2] = [ProtocolFamily::DkaHhs, ProtocolFamily::NonDka];

    pub fn label(&self) -> &'static str {
        match self {
            ProtocolFamily::DkaHhs => "DKA/HHS",
            ProtocolFamily::NonDka => "Non-DKA",
        }
    }
}

/// What a reading measures
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    /// Blood glucose in mg/dL
    Glucose,
    /// Insulin infusion rate in units/hr
    InfusionRate,
}

/// A timestamped observation. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub kind: ReadingKind,
    pub protocol_family: ProtocolFamily,
}

// ============================================================================
// Flags
// ============================================================================

/// Monitored conditions that can raise a flag
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum FlagType {
    DkaBgHigh,
    DkaRateLow,
    NonDkaStable,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Info,
    Critical,
}

/// A provider-notification flag raised by the monitoring engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Flag {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub message: String,
    pub severity: FlagSeverity,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

// ============================================================================
// Decisions
// ============================================================================

/// Severity class of a titration decision
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Therapeutic,
    Warning,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Therapeutic => "THERAPEUTIC",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Phases of the DKA/HHS protocol, in their intended order.
///
/// The operator selects the phase; ordering is not enforced.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DkaPhase {
    Bolus,
    Initiation,
    Phase1Continuation,
    Transition,
    Phase2,
}

impl DkaPhase {
    /// The calculation this phase selects
    pub fn protocol(&self) -> Protocol {
        match self {
            DkaPhase::Bolus => Protocol::DkaBolus,
            DkaPhase::Initiation => Protocol::DkaInitiation,
            DkaPhase::Phase1Continuation => Protocol::DkaPhase1Continuation,
            DkaPhase::Transition => Protocol::DkaTransition,
            DkaPhase::Phase2 => Protocol::DkaPhase2,
        }
    }
}

/// The calculation that produced a decision
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Heparin,
    InsulinInitialRate,
    InsulinAdjustment,
    DkaBolus,
    DkaInitiation,
    DkaPhase1Continuation,
    DkaTransition,
    DkaPhase2,
}

impl Protocol {
    /// Human-readable name used in the calculation history
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Heparin => "Heparin Protocol",
            Protocol::InsulinInitialRate => "Non-DKA Insulin Initial Rate",
            Protocol::InsulinAdjustment => "Non-DKA Insulin Adjustment",
            Protocol::DkaBolus => "DKA Bolus Calculation",
            Protocol::DkaInitiation => "DKA Phase 1 Initiation",
            Protocol::DkaPhase1Continuation => "DKA Phase 1 Continuation",
            Protocol::DkaTransition => "DKA Transition Phase",
            Protocol::DkaPhase2 => "DKA Phase 2",
        }
    }

    /// Monitoring family for readings produced by this protocol
    pub fn family(&self) -> Option<ProtocolFamily> {
        match self {
            Protocol::Heparin => None,
            Protocol::InsulinInitialRate | Protocol::InsulinAdjustment => {
                Some(ProtocolFamily::NonDka)
            }
            _ => Some(ProtocolFamily::DkaHhs),
        }
    }
}

/// A glucose or rate value a decision hands to the monitoring engine
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub kind: ReadingKind,
    pub value: f64,
}

impl Observation {
    pub fn glucose(value: f64) -> Self {
        Self {
            kind: ReadingKind::Glucose,
            value,
        }
    }

    pub fn rate(value: f64) -> Self {
        Self {
            kind: ReadingKind::InfusionRate,
            value,
        }
    }
}

/// Output of any rule engine. Consumed immediately by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct TitrationDecision {
    pub protocol: Protocol,
    pub severity: Severity,
    /// Dose-change / action text
    pub action: String,
    pub bolus: Option<String>,
    pub hold: Option<String>,
    pub next_check: Option<String>,
    pub follow_up: Option<String>,
    /// Infusion rate to run after applying the decision (units/hr)
    pub new_rate: Option<f64>,
    /// One-off dose in units (DKA bolus)
    pub dose_units: Option<f64>,
    /// Static cautions and mandatory warnings
    pub notes: Vec<String>,
    /// Critical input: confirm with the operator before applying
    pub requires_confirmation: bool,
    /// Input summary for the calculation history
    pub inputs: String,
    pub observations: Vec<Observation>,
}

impl TitrationDecision {
    pub(crate) fn new(protocol: Protocol, severity: Severity, action: impl Into<String>) -> Self {
        Self {
            protocol,
            severity,
            action: action.into(),
            bolus: None,
            hold: None,
            next_check: None,
            follow_up: None,
            new_rate: None,
            dose_units: None,
            notes: Vec::new(),
            requires_confirmation: false,
            inputs: String::new(),
            observations: Vec::new(),
        }
    }

    /// Whether the history log should mark this calculation critical.
    ///
    /// Insulin adjustments are critical only at the confirmation thresholds,
    /// so a 71-100 mg/dL hold is not.
    pub fn is_critical(&self) -> bool {
        match self.protocol {
            Protocol::InsulinAdjustment => self.requires_confirmation,
            _ => self.requires_confirmation || self.severity == Severity::Critical,
        }
    }

    /// One-line result for the calculation history
    pub fn result_summary(&self) -> String {
        match self.protocol {
            Protocol::Heparin => format!(
                "{}, Hold: {}",
                self.action,
                self.hold.as_deref().unwrap_or("No")
            ),
            Protocol::DkaBolus => match self.dose_units {
                Some(units) => format!("Bolus: {:.1} units IV", units),
                None => self.action.clone(),
            },
            Protocol::InsulinInitialRate => match self.new_rate {
                Some(rate) => format!("Rate: {:.1} units/hr", rate),
                None => self.action.clone(),
            },
            _ => match self.new_rate {
                Some(rate) => format!("{} New Rate: {:.1} units/hr", self.action, rate),
                None => self.action.clone(),
            },
        }
    }
}

/// Convert a weight in pounds to kilograms
pub fn lbs_to_kg(lbs: f64) -> f64 {
    lbs / 2.20462
}

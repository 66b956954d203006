//! DKA/HHS insulin protocol phases.
//!
//! Five independent calculations, one per phase. The intended order is
//! bolus → initiation → phase 1 continuation → transition → phase 2, but the
//! operator picks the phase and nothing here enforces it.

use crate::bands::BandTable;
use crate::error::require_at_least;
use crate::{DkaPhase, Observation, Result, Severity, TitrationDecision};
use once_cell::sync::Lazy;

/// Maximum IV bolus regardless of weight
pub const MAX_BOLUS_UNITS: f64 = 10.0;

const WEIGHT_MESSAGE: &str = "Please enter a valid weight.";

fn check_weight(weight: f64) -> Result<f64> {
    require_at_least(weight, 0.0, false, WEIGHT_MESSAGE)
}

/// Regular insulin bolus: 0.1 units/kg, capped at 10 units
pub fn dka_bolus(weight: f64) -> Result<TitrationDecision> {
    let weight = check_weight(weight)?;
    let units = (weight * 0.1).min(MAX_BOLUS_UNITS);

    let mut d = TitrationDecision::new(
        DkaPhase::Bolus.protocol(),
        Severity::Therapeutic,
        format!("Regular Insulin Bolus: {:.1} units IV", units),
    );
    d.bolus = Some(format!("{:.1} units IV", units));
    d.dose_units = Some(units);
    d.notes
        .push("Calculated as 0.1 units/kg (Maximum: 10 units)".into());
    d.inputs = format!("Weight: {} kg", weight);
    Ok(d)
}

/// Phase 1 initiation: 0.1 units/kg/hr
pub fn dka_initiation(weight: f64) -> Result<TitrationDecision> {
    let weight = check_weight(weight)?;
    let rate = weight * 0.1;

    let mut d = TitrationDecision::new(
        DkaPhase::Initiation.protocol(),
        Severity::Therapeutic,
        format!("Start infusion at {:.1} units/hr.", rate),
    );
    d.new_rate = Some(rate);
    d.next_check = Some("1 hr".into());
    d.notes
        .push("Continue to Phase 1 Continuation only after 1 hour has passed.".into());
    d.inputs = format!("Weight: {} kg", weight);
    d.observations.push(Observation::rate(rate));
    Ok(d)
}

#[derive(Clone, Copy, Debug)]
struct ContinuationRow {
    multiplier: f64,
    action: &'static str,
    escalation: Option<&'static str>,
    severity: Severity,
}

static CONTINUATION_TABLE: Lazy<BandTable<ContinuationRow>> = Lazy::new(|| {
    BandTable::new()
        .at_most(
            50.0,
            ContinuationRow {
                multiplier: 1.5,
                action: "Increase current infusion rate by 50%.",
                escalation: None,
                severity: Severity::Warning,
            },
        )
        .above_to(
            50.0,
            100.0,
            ContinuationRow {
                multiplier: 1.0,
                action: "No change to infusion rate.",
                escalation: None,
                severity: Severity::Therapeutic,
            },
        )
        .above(
            100.0,
            ContinuationRow {
                multiplier: 0.5,
                action: "Decrease current infusion rate by 50%.",
                escalation: Some("Begin neuro checks q1hr x2 and BG checks q30min x2."),
                severity: Severity::Critical,
            },
        )
});

/// Phase 1 continuation, keyed on the percentage of the expected BG drop achieved
pub fn dka_phase1_continuation(current_rate: f64, bg_drop_pct: f64) -> Result<TitrationDecision> {
    const MESSAGE: &str = "Please enter valid Current Rate and BG Drop.";
    let current_rate = require_at_least(current_rate, 0.0, true, MESSAGE)?;
    if !bg_drop_pct.is_finite() {
        return Err(crate::Error::Validation(MESSAGE.into()));
    }

    let row = CONTINUATION_TABLE.lookup(bg_drop_pct).ok_or_else(|| {
        crate::Error::DomainGap(format!("BG drop {}%", bg_drop_pct))
    })?;
    let new_rate = current_rate * row.multiplier;

    let mut d = TitrationDecision::new(DkaPhase::Phase1Continuation.protocol(), row.severity, row.action);
    d.new_rate = Some(new_rate);
    d.follow_up = row.escalation.map(String::from);
    d.inputs = format!("Current Rate: {}, BG Drop: {}", current_rate, bg_drop_pct);
    d.observations.push(Observation::rate(new_rate));
    Ok(d)
}

/// Transition: the lower of 0.05 units/kg/hr and the current rate
pub fn dka_transition(weight: f64, current_rate: f64) -> Result<TitrationDecision> {
    let weight = check_weight(weight)?;
    let current_rate = require_at_least(
        current_rate,
        0.0,
        true,
        "Please enter valid weight and current rate.",
    )?;

    let calculated = weight * 0.05;
    let new_rate = calculated.min(current_rate);

    let mut d = TitrationDecision::new(
        DkaPhase::Transition.protocol(),
        Severity::Therapeutic,
        format!(
            "Calculated transition rate (0.05 units/kg/hr) {:.1} units/hr; use the lower of the two.",
            calculated
        ),
    );
    d.new_rate = Some(new_rate);
    d.follow_up = Some(
        "Change IVF to D5 1/2NS at 100 ml/hr and move to Phase 2 with next BG check.".into(),
    );
    d.inputs = format!("Weight: {} kg, Current Rate: {}", weight, current_rate);
    d.observations.push(Observation::rate(new_rate));
    Ok(d)
}

#[derive(Clone, Copy, Debug)]
enum Phase2Change {
    Add(f64),
    Halve,
    StopAndHalve,
    NoChange,
}

static PHASE2_TABLE: Lazy<BandTable<Phase2Change>> = Lazy::new(|| {
    BandTable::new()
        .below(70.0, Phase2Change::StopAndHalve)
        .range(70.0, 150.0, Phase2Change::Halve)
        .range(150.0, 201.0, Phase2Change::NoChange)
        .range(201.0, 251.0, Phase2Change::Add(1.0))
        .at_least(251.0, Phase2Change::Add(2.0))
});

/// Phase 2 adjustment, keyed on current glucose
pub fn dka_phase2(current_rate: f64, current_bg: f64) -> Result<TitrationDecision> {
    const MESSAGE: &str = "Please enter valid current rate and BG.";
    let current_rate = require_at_least(current_rate, 0.0, true, MESSAGE)?;
    let current_bg = require_at_least(current_bg, 0.0, false, MESSAGE)?;

    let change = PHASE2_TABLE
        .lookup(current_bg)
        .copied()
        .ok_or_else(|| crate::Error::DomainGap(format!("BG {} mg/dL", current_bg)))?;

    let mut d = match change {
        Phase2Change::Add(units) => TitrationDecision::new(
            DkaPhase::Phase2.protocol(),
            Severity::Warning,
            format!(
                "Increase rate by {} {}.",
                units,
                if units == 1.0 { "unit/hr" } else { "units/hr" }
            ),
        ),
        Phase2Change::NoChange => TitrationDecision::new(
            DkaPhase::Phase2.protocol(),
            Severity::Therapeutic,
            "No change to infusion rate.",
        ),
        Phase2Change::Halve => {
            let mut d = TitrationDecision::new(
                DkaPhase::Phase2.protocol(),
                Severity::Warning,
                "Decrease rate by 50%.",
            );
            d.next_check = Some("30 min".into());
            d.follow_up = Some("Recheck BG in 30 minutes.".into());
            d
        }
        Phase2Change::StopAndHalve => {
            let mut d = TitrationDecision::new(
                DkaPhase::Phase2.protocol(),
                Severity::Critical,
                "Stop infusion. Follow SDO for Hypoglycemia.",
            );
            d.hold = Some("Stop infusion".into());
            d.follow_up = Some(format!(
                "When BG > 150 mg/dL, resume infusion at 50% of the most recent rate ({:.1} units/hr).",
                current_rate * 0.5
            ));
            d
        }
    };

    let new_rate = match change {
        Phase2Change::Add(units) => current_rate + units,
        Phase2Change::NoChange => current_rate,
        Phase2Change::Halve | Phase2Change::StopAndHalve => current_rate * 0.5,
    };

    d.new_rate = Some(new_rate);
    d.inputs = format!("Current Rate: {}, BG: {}", current_rate, current_bg);
    d.observations.push(Observation::glucose(current_bg));
    d.observations.push(Observation::rate(new_rate));
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_bolus_is_capped() {
        let d = dka_bolus(70.0).unwrap();
        assert!(close(d.dose_units.unwrap(), 7.0));
        let d = dka_bolus(150.0).unwrap();
        assert!(close(d.dose_units.unwrap(), 10.0));
        assert_eq!(d.severity, Severity::Therapeutic);
        assert!(d.observations.is_empty());
        assert_eq!(d.result_summary(), "Bolus: 10.0 units IV");
    }

    #[test]
    fn test_initiation_rate_and_wait_warning() {
        let d = dka_initiation(80.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 8.0));
        assert!(d.notes.iter().any(|n| n.contains("after 1 hour")));
        assert_eq!(d.observations.len(), 1);
    }

    #[test]
    fn test_weight_validation() {
        for weight in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(dka_bolus(weight), Err(Error::Validation(_))));
            assert!(matches!(dka_initiation(weight), Err(Error::Validation(_))));
            assert!(matches!(dka_transition(weight, 5.0), Err(Error::Validation(_))));
        }
    }

    #[test]
    fn test_continuation_bands() {
        let d = dka_phase1_continuation(4.0, 30.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 6.0));
        assert_eq!(d.severity, Severity::Warning);

        let d = dka_phase1_continuation(4.0, 50.0).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = dka_phase1_continuation(4.0, 50.5).unwrap();
        assert_eq!(d.severity, Severity::Therapeutic);
        assert!(close(d.new_rate.unwrap(), 4.0));

        let d = dka_phase1_continuation(4.0, 100.0).unwrap();
        assert_eq!(d.severity, Severity::Therapeutic);

        let d = dka_phase1_continuation(4.0, 120.0).unwrap();
        assert_eq!(d.severity, Severity::Critical);
        assert!(close(d.new_rate.unwrap(), 2.0));
        assert!(d.follow_up.unwrap().contains("neuro checks"));
    }

    #[test]
    fn test_continuation_accepts_negative_drop() {
        let d = dka_phase1_continuation(4.0, -20.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 6.0));
    }

    #[test]
    fn test_continuation_rejects_invalid() {
        assert!(matches!(dka_phase1_continuation(-1.0, 30.0), Err(Error::Validation(_))));
        assert!(matches!(dka_phase1_continuation(1.0, f64::NAN), Err(Error::Validation(_))));
    }

    #[test]
    fn test_continuation_table_has_no_gap() {
        assert!(CONTINUATION_TABLE
            .gaps(f64::NEG_INFINITY, f64::INFINITY)
            .is_empty());
        assert!(!CONTINUATION_TABLE.has_overlap());
    }

    #[test]
    fn test_transition_uses_lower_rate() {
        let d = dka_transition(100.0, 8.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 5.0));
        let d = dka_transition(100.0, 3.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 3.0));
        assert!(d.follow_up.unwrap().contains("D5 1/2NS"));
    }

    #[test]
    fn test_phase2_bands() {
        assert!(close(dka_phase2(5.0, 260.0).unwrap().new_rate.unwrap(), 7.0));
        assert!(close(dka_phase2(5.0, 250.0).unwrap().new_rate.unwrap(), 6.0));
        assert!(close(dka_phase2(5.0, 201.0).unwrap().new_rate.unwrap(), 6.0));

        let d = dka_phase2(5.0, 200.0).unwrap();
        assert_eq!(d.severity, Severity::Therapeutic);
        let d = dka_phase2(5.0, 150.0).unwrap();
        assert_eq!(d.severity, Severity::Therapeutic);

        let d = dka_phase2(5.0, 149.0).unwrap();
        assert!(close(d.new_rate.unwrap(), 2.5));
        assert_eq!(d.next_check.as_deref(), Some("30 min"));

        let d = dka_phase2(5.0, 70.0).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = dka_phase2(5.0, 65.0).unwrap();
        assert_eq!(d.severity, Severity::Critical);
        assert!(d.follow_up.unwrap().contains("2.5 units/hr"));
    }

    #[test]
    fn test_phase2_records_glucose_and_rate() {
        let d = dka_phase2(5.0, 260.0).unwrap();
        assert_eq!(
            d.observations,
            vec![Observation::glucose(260.0), Observation::rate(7.0)]
        );
    }

    #[test]
    fn test_phase2_rejects_negative_rate() {
        assert!(matches!(dka_phase2(-1.0, 200.0), Err(Error::Validation(_))));
    }

    #[test]
    fn test_phase2_table_covers_positive_glucose() {
        assert!(PHASE2_TABLE.gaps(0.0, f64::INFINITY).is_empty());
    }
}

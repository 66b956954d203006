//! Insulin infusion for non-DKA hyperglycemia.
//!
//! Two calculations:
//! - Initial rate from a single glucose value
//! - Rate adjustment from current rate, current and previous glucose
//!
//! The adjustment table is two-level: the current glucose selects a band,
//! and within the band the previous glucose selects the rate change. Each
//! band carries its own fallback for a missing or unmatched previous value.

use crate::bands::BandTable;
use crate::error::require_at_least;
use crate::{Error, Observation, Protocol, Result, Severity, TitrationDecision};
use once_cell::sync::Lazy;

/// Glucose above which the starting rate needs a physician order
pub const PHYSICIAN_ORDER_BG: f64 = 600.0;

pub const INITIAL_RATE_CAUTIONS: [&str; 3] = [
    "Caution with elderly, CKD and low body weight individuals.",
    "Caution with BG > 600 mg/dL (starting dose may be too high).",
    "Notify provider if insulin infusion rate is > 20 units/hour.",
];

/// Compute the starting infusion rate: `(bg - 60) * 0.02` units/hr
pub fn initial_rate(bg: f64) -> Result<TitrationDecision> {
    let bg = require_at_least(
        bg,
        0.0,
        false,
        "Please enter a valid Blood Glucose (BG) value.",
    )?;

    let calculated = (bg - 60.0) * 0.02;

    let mut decision = if calculated < 0.0 {
        TitrationDecision::new(
            Protocol::InsulinInitialRate,
            Severity::Warning,
            "BG is below the threshold for calculation. Consult provider.",
        )
    } else {
        let mut d = TitrationDecision::new(
            Protocol::InsulinInitialRate,
            Severity::Info,
            format!("Calculated initial infusion rate: {:.1} units/hr.", calculated),
        );
        d.new_rate = Some(calculated);
        if bg > PHYSICIAN_ORDER_BG {
            d.severity = Severity::Critical;
            d.notes
                .push("Warning: BG > 600 mg/dL. Starting rate REQUIRES PHYSICIAN ORDER.".into());
        }
        d
    };

    decision.requires_confirmation = bg > PHYSICIAN_ORDER_BG;
    decision
        .notes
        .extend(INITIAL_RATE_CAUTIONS.iter().map(|s| s.to_string()));
    decision.inputs = format!("BG: {} mg/dL", bg);
    decision.observations.push(Observation::glucose(bg));
    if let Some(rate) = decision.new_rate {
        decision.observations.push(Observation::rate(rate));
    }

    tracing::debug!("Initial insulin rate for BG {}: {:.2}", bg, calculated);
    Ok(decision)
}

// ============================================================================
// Adjustment table
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Increase => "Increase",
            Direction::Decrease => "Decrease",
        }
    }
}

/// How the rate moves: `change = max(rate * pct, min_units)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateChange {
    NoChange,
    Step {
        direction: Direction,
        pct: f64,
        min_units: f64,
    },
    /// Step whose new rate is rounded to one decimal place
    FallbackStep {
        direction: Direction,
        pct: f64,
        min_units: f64,
    },
}

const fn down(pct: f64, min_units: f64) -> RateChange {
    RateChange::Step {
        direction: Direction::Decrease,
        pct,
        min_units,
    }
}

const fn up(pct: f64, min_units: f64) -> RateChange {
    RateChange::Step {
        direction: Direction::Increase,
        pct,
        min_units,
    }
}

fn unit_word(units: f64) -> &'static str {
    if units == 1.0 {
        "unit/hr"
    } else {
        "units/hr"
    }
}

impl RateChange {
    /// Returns (new rate, action text)
    fn apply(&self, rate: f64) -> (f64, String) {
        match *self {
            RateChange::NoChange => (rate, "No change to current rate.".to_string()),
            RateChange::Step {
                direction,
                pct,
                min_units,
            } => {
                let change = (rate * pct).max(min_units);
                let new_rate = shift(rate, change, direction);
                let text = if pct == 0.0 {
                    format!(
                        "{} rate by {} {}.",
                        direction.verb(),
                        min_units,
                        unit_word(min_units)
                    )
                } else {
                    format!(
                        "{} rate by {:.1} units/hr ({:.0}% or {} {}, whichever is greater).",
                        direction.verb(),
                        change,
                        pct * 100.0,
                        min_units,
                        unit_word(min_units)
                    )
                };
                (new_rate, text)
            }
            RateChange::FallbackStep {
                direction,
                pct,
                min_units,
            } => {
                let change = (rate * pct).max(min_units);
                let new_rate = (shift(rate, change, direction) * 10.0).round() / 10.0;
                let text = format!(
                    "{} rate by {:.1} units/hr (Fallback).",
                    direction.verb(),
                    change
                );
                (new_rate, text)
            }
        }
    }
}

fn shift(rate: f64, change: f64, direction: Direction) -> f64 {
    match direction {
        Direction::Increase => rate + change,
        Direction::Decrease => (rate - change).max(0.0),
    }
}

/// Hold instructions for low glucose, with and without the T1DM dextrose branch
#[derive(Clone, Debug)]
pub struct HoldRule {
    pub t1dm: &'static str,
    pub other: &'static str,
}

/// Rate changes for one current-glucose band
#[derive(Clone, Debug)]
pub struct TitrationBand {
    /// Keyed on previous glucose; empty when the band ignores it
    pub previous: BandTable<RateChange>,
    /// Used when previous glucose is absent or matches no sub-band
    pub fallback: Option<RateChange>,
    /// Added whenever the rate actually changes
    pub follow_up: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub enum AdjustmentRule {
    Hold(HoldRule),
    Titrate(TitrationBand),
}

fn titrate(
    previous: BandTable<RateChange>,
    fallback: Option<RateChange>,
    follow_up: Option<&'static str>,
) -> AdjustmentRule {
    AdjustmentRule::Titrate(TitrationBand {
        previous,
        fallback,
        follow_up,
    })
}

const RESUME_TEXT: &str = "Resumption: Once BG ≥ 140 mg/dL, call physician to resume insulin at 50% previous rate and continue to follow the insulin protocol.";
const STOP_D5W_TEXT: &str = "Stop D5W one hour after insulin is resumed if BG ≥ 140 mg/dL.";

static ADJUSTMENT_TABLE: Lazy<BandTable<AdjustmentRule>> = Lazy::new(|| {
    use RateChange::NoChange;

    BandTable::new()
        .below(
            71.0,
            AdjustmentRule::Hold(HoldRule {
                t1dm: "Hold insulin drip and initiate hypoglycemia SDO. If BG remains < 140 mg/dL after treatment, start D5W at 50 cc/hr and monitor BG hourly.",
                other: "Hold insulin drip and initiate hypoglycemia SDO. If BG remains < 140 mg/dL after treatment, check BG hourly until BG ≥ 140 mg/dL.",
            }),
        )
        .range(
            71.0,
            101.0,
            AdjustmentRule::Hold(HoldRule {
                t1dm: "Hold insulin drip and recheck BG in 15 mins. If BG remains 71-140 mg/dL, start D5W at 50 cc/hr and check BG q30 mins x 2, then hourly.",
                other: "Hold insulin drip and recheck BG in 15 mins. If BG remains 71-140 mg/dL, check BG q30 mins x 2, then hourly.",
            }),
        )
        .range(
            101.0,
            141.0,
            titrate(
                BandTable::new()
                    .below(100.0, down(0.0, 1.0))
                    .range(141.0, 301.0, down(0.50, 2.0))
                    .at_least(301.0, down(0.70, 2.0)),
                Some(down(0.25, 0.5)),
                Some("Check BG q 30 min until ≥ 140 mg/dL."),
            ),
        )
        .range(
            141.0,
            181.0,
            titrate(
                BandTable::new().at_least(201.0, down(0.50, 2.0)),
                Some(NoChange),
                Some("Continue hourly BG checks."),
            ),
        )
        .range(
            181.0,
            201.0,
            titrate(
                BandTable::new()
                    .below(100.0, up(0.0, 1.0))
                    .range(100.0, 181.0, up(0.0, 0.5))
                    .range(181.0, 201.0, up(0.25, 1.0))
                    .range(201.0, 251.0, NoChange)
                    .at_least(251.0, down(0.25, 2.0)),
                Some(up(0.0, 0.5)),
                None,
            ),
        )
        .range(
            201.0,
            251.0,
            titrate(
                BandTable::new()
                    .below(181.0, up(0.25, 2.0))
                    .range(181.0, 301.0, up(0.25, 1.0))
                    .range(301.0, 401.0, up(0.0, 1.0))
                    .at_least(401.0, NoChange),
                Some(RateChange::FallbackStep {
                    direction: Direction::Increase,
                    pct: 0.25,
                    min_units: 1.0,
                }),
                None,
            ),
        )
        .range(
            251.0,
            301.0,
            titrate(
                BandTable::new()
                    .below(141.0, up(0.25, 2.5))
                    .range(141.0, 181.0, up(0.25, 1.5))
                    .range(181.0, 251.0, up(0.25, 1.0))
                    .range(251.0, 301.0, up(0.25, 1.5))
                    .range(301.0, 401.0, up(0.25, 2.0))
                    .at_least(401.0, NoChange),
                None,
                None,
            ),
        )
        .range(301.0, 401.0, titrate(BandTable::new(), Some(up(0.40, 3.0)), None))
        .at_least(401.0, titrate(BandTable::new(), Some(up(0.50, 4.0)), None))
});

/// The adjustment table, for inspection and coverage checks
pub fn adjustment_table() -> &'static BandTable<AdjustmentRule> {
    &ADJUSTMENT_TABLE
}

/// Adjust a running non-DKA insulin infusion
///
/// `previous_bg` is only consulted when `current_bg` is 101 or above. A
/// non-finite or non-positive previous value counts as absent.
pub fn adjust_rate(
    current_rate: f64,
    current_bg: f64,
    previous_bg: Option<f64>,
    is_t1dm: bool,
) -> Result<TitrationDecision> {
    const MESSAGE: &str = "Please enter valid values for Current Rate and Current BG.";
    let current_rate = require_at_least(current_rate, 0.0, true, MESSAGE)?;
    let current_bg = require_at_least(current_bg, 0.0, false, MESSAGE)?;
    let previous_bg = previous_bg.filter(|p| p.is_finite() && *p > 0.0);

    let rule = ADJUSTMENT_TABLE
        .lookup(current_bg)
        .ok_or_else(|| Error::DomainGap(format!("current BG {} mg/dL", current_bg)))?;

    let mut decision = match rule {
        AdjustmentRule::Hold(hold) => {
            let mut d = TitrationDecision::new(
                Protocol::InsulinAdjustment,
                Severity::Critical,
                if is_t1dm { hold.t1dm } else { hold.other },
            );
            d.hold = Some("Hold insulin drip".into());
            d.follow_up = Some(if is_t1dm {
                format!("{} {}", RESUME_TEXT, STOP_D5W_TEXT)
            } else {
                RESUME_TEXT.to_string()
            });
            d.observations.push(Observation::glucose(current_bg));
            d.observations.push(Observation::rate(0.0));
            d
        }
        AdjustmentRule::Titrate(band) => {
            let change = previous_bg
                .and_then(|p| band.previous.lookup(p).copied())
                .or(band.fallback)
                .ok_or_else(|| {
                    Error::DomainGap(format!(
                        "current BG {} mg/dL requires a previous BG value",
                        current_bg
                    ))
                })?;

            let (new_rate, text) = change.apply(current_rate);
            let severity = if change == RateChange::NoChange {
                Severity::Therapeutic
            } else {
                Severity::Warning
            };

            let mut d = TitrationDecision::new(Protocol::InsulinAdjustment, severity, text);
            if change != RateChange::NoChange {
                d.follow_up = band.follow_up.map(String::from);
            }
            d.new_rate = Some(new_rate);
            d.observations.push(Observation::glucose(current_bg));
            d.observations.push(Observation::rate(new_rate));
            d
        }
    };

    decision.requires_confirmation = current_bg < 71.0 || current_bg >= 401.0;
    decision.inputs = format!(
        "Current BG: {}, Rate: {}{}{}",
        current_bg,
        current_rate,
        previous_bg
            .map(|p| format!(", Prev BG: {}", p))
            .unwrap_or_default(),
        if is_t1dm { ", T1DM" } else { "" }
    );

    tracing::debug!(
        "Insulin adjustment BG {} (prev {:?}) rate {} -> {:?}",
        current_bg,
        previous_bg,
        current_rate,
        decision.new_rate
    );
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_of(d: &TitrationDecision) -> f64 {
        d.new_rate.expect("decision should carry a rate")
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_initial_rate_at_threshold_is_zero() {
        let d = initial_rate(60.0).unwrap();
        assert_eq!(d.new_rate, Some(0.0));
        assert_eq!(d.severity, Severity::Info);
    }

    #[test]
    fn test_initial_rate_below_threshold() {
        let d = initial_rate(59.0).unwrap();
        assert_eq!(d.new_rate, None);
        assert!(d.action.contains("below the threshold"));
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.observations, vec![Observation::glucose(59.0)]);
    }

    #[test]
    fn test_initial_rate_above_600_requires_physician_order() {
        let d = initial_rate(601.0).unwrap();
        assert_eq!(d.severity, Severity::Critical);
        assert!(d.requires_confirmation);
        assert!(d.notes.iter().any(|n| n.contains("REQUIRES PHYSICIAN ORDER")));
        assert!(close(rate_of(&d), 10.82));
    }

    #[test]
    fn test_initial_rate_always_carries_cautions() {
        for bg in [59.0, 200.0, 700.0] {
            let d = initial_rate(bg).unwrap();
            for caution in INITIAL_RATE_CAUTIONS {
                assert!(d.notes.iter().any(|n| n == caution));
            }
        }
    }

    #[test]
    fn test_initial_rate_rejects_invalid() {
        assert!(matches!(initial_rate(0.0), Err(Error::Validation(_))));
        assert!(matches!(initial_rate(-5.0), Err(Error::Validation(_))));
        assert!(matches!(initial_rate(f64::NAN), Err(Error::Validation(_))));
    }

    #[test]
    fn test_adjust_decrease_by_one_unit() {
        let d = adjust_rate(10.0, 120.0, Some(90.0), false).unwrap();
        assert!(d.action.contains("Decrease rate by 1 unit/hr"));
        assert!(close(rate_of(&d), 9.0));
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(
            d.follow_up.as_deref(),
            Some("Check BG q 30 min until ≥ 140 mg/dL.")
        );
    }

    #[test]
    fn test_adjust_hold_with_dextrose_for_t1dm() {
        let d = adjust_rate(5.0, 75.0, None, true).unwrap();
        assert!(d.action.contains("D5W at 50 cc/hr"));
        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(d.new_rate, None);
        assert!(d.follow_up.unwrap().contains("Stop D5W"));
    }

    #[test]
    fn test_hold_is_critical_in_history_only_past_thresholds() {
        let hold = adjust_rate(5.0, 75.0, None, true).unwrap();
        assert_eq!(hold.severity, Severity::Critical);
        assert!(!hold.requires_confirmation);
        assert!(!hold.is_critical());

        assert!(adjust_rate(5.0, 70.0, None, false).unwrap().is_critical());
        assert!(adjust_rate(5.0, 450.0, None, false).unwrap().is_critical());
    }

    #[test]
    fn test_adjust_hold_ignores_previous_bg() {
        let with = adjust_rate(5.0, 65.0, Some(300.0), false).unwrap();
        let without = adjust_rate(5.0, 65.0, None, false).unwrap();
        assert_eq!(with.action, without.action);
        assert!(!with.action.contains("D5W"));
        assert!(with.requires_confirmation);
    }

    #[test]
    fn test_adjust_101_140_bands() {
        assert!(close(rate_of(&adjust_rate(10.0, 130.0, Some(200.0), false).unwrap()), 5.0));
        assert!(close(rate_of(&adjust_rate(2.0, 130.0, Some(200.0), false).unwrap()), 0.0));
        assert!(close(rate_of(&adjust_rate(10.0, 130.0, Some(350.0), false).unwrap()), 3.0));
        // previous 100-140 matches no sub-band, fallback max(25%, 0.5)
        assert!(close(rate_of(&adjust_rate(10.0, 130.0, Some(120.0), false).unwrap()), 7.5));
        assert!(close(rate_of(&adjust_rate(1.0, 130.0, None, false).unwrap()), 0.5));
    }

    #[test]
    fn test_adjust_141_180_no_change_unless_falling_from_201() {
        let d = adjust_rate(6.0, 160.0, Some(150.0), false).unwrap();
        assert_eq!(d.severity, Severity::Therapeutic);
        assert!(close(rate_of(&d), 6.0));
        assert!(d.follow_up.is_none());

        let d = adjust_rate(6.0, 160.0, Some(220.0), false).unwrap();
        assert!(close(rate_of(&d), 3.0));
        assert_eq!(d.follow_up.as_deref(), Some("Continue hourly BG checks."));
    }

    #[test]
    fn test_adjust_181_200_bands() {
        assert!(close(rate_of(&adjust_rate(4.0, 190.0, Some(90.0), false).unwrap()), 5.0));
        assert!(close(rate_of(&adjust_rate(4.0, 190.0, Some(150.0), false).unwrap()), 4.5));
        assert!(close(rate_of(&adjust_rate(8.0, 190.0, Some(190.0), false).unwrap()), 10.0));
        assert_eq!(
            adjust_rate(8.0, 190.0, Some(230.0), false).unwrap().severity,
            Severity::Therapeutic
        );
        assert!(close(rate_of(&adjust_rate(4.0, 190.0, Some(260.0), false).unwrap()), 2.0));
        assert!(close(rate_of(&adjust_rate(4.0, 190.0, None, false).unwrap()), 4.5));
    }

    #[test]
    fn test_adjust_201_250_fallback_rounds() {
        let d = adjust_rate(4.004, 220.0, None, false).unwrap();
        assert!(d.action.contains("Fallback"));
        assert!(close(rate_of(&d), 5.0));

        assert!(close(rate_of(&adjust_rate(4.0, 220.0, Some(150.0), false).unwrap()), 6.0));
        assert!(close(rate_of(&adjust_rate(4.0, 220.0, Some(250.0), false).unwrap()), 5.0));
        assert!(close(rate_of(&adjust_rate(4.0, 220.0, Some(350.0), false).unwrap()), 5.0));
        assert_eq!(
            adjust_rate(4.0, 220.0, Some(450.0), false).unwrap().severity,
            Severity::Therapeutic
        );
    }

    #[test]
    fn test_adjust_251_300_requires_previous() {
        assert!(close(rate_of(&adjust_rate(4.0, 270.0, Some(120.0), false).unwrap()), 6.5));
        assert!(close(rate_of(&adjust_rate(4.0, 270.0, Some(160.0), false).unwrap()), 5.5));
        assert!(close(rate_of(&adjust_rate(4.0, 270.0, Some(200.0), false).unwrap()), 5.0));
        assert!(close(rate_of(&adjust_rate(4.0, 270.0, Some(280.0), false).unwrap()), 5.5));
        assert!(close(rate_of(&adjust_rate(4.0, 270.0, Some(380.0), false).unwrap()), 6.0));
        assert!(matches!(
            adjust_rate(4.0, 270.0, None, false),
            Err(Error::DomainGap(_))
        ));
    }

    #[test]
    fn test_adjust_high_bands_ignore_previous() {
        let d = adjust_rate(10.0, 350.0, Some(100.0), false).unwrap();
        assert!(close(rate_of(&d), 14.0));
        assert!(!d.requires_confirmation);

        let d = adjust_rate(4.0, 450.0, None, false).unwrap();
        assert!(close(rate_of(&d), 8.0));
        assert!(d.requires_confirmation);
        assert!(d.action.contains("50% or 4 units/hr"));
    }

    #[test]
    fn test_adjust_rejects_invalid() {
        assert!(matches!(adjust_rate(-1.0, 150.0, None, false), Err(Error::Validation(_))));
        assert!(matches!(adjust_rate(1.0, 0.0, None, false), Err(Error::Validation(_))));
        assert!(matches!(adjust_rate(f64::NAN, 150.0, None, false), Err(Error::Validation(_))));
    }

    #[test]
    fn test_non_finite_previous_counts_as_absent() {
        let a = adjust_rate(4.0, 190.0, Some(f64::NAN), false).unwrap();
        let b = adjust_rate(4.0, 190.0, None, false).unwrap();
        assert_eq!(a.new_rate, b.new_rate);
    }

    #[test]
    fn test_adjustment_table_has_no_gap_above_zero() {
        let table = adjustment_table();
        assert!(table.gaps(0.0, f64::INFINITY).is_empty());
        assert!(!table.has_overlap());
        for band in table.bands() {
            if let AdjustmentRule::Titrate(t) = &band.value {
                assert!(!t.previous.has_overlap());
            }
        }
    }

    #[test]
    fn test_observations_record_new_rate() {
        let d = adjust_rate(10.0, 120.0, Some(90.0), false).unwrap();
        assert_eq!(
            d.observations,
            vec![Observation::glucose(120.0), Observation::rate(9.0)]
        );
    }
}

//! Heparin titration by aPTT.
//!
//! Weight-based nomogram: an aPTT value (seconds) selects a bolus, an
//! infusion hold, a dose change and the next aPTT check.

use crate::bands::BandTable;
use crate::error::require_at_least;
use crate::{Protocol, Result, Severity, TitrationDecision};
use once_cell::sync::Lazy;

/// aPTT at or above which the decision is an escalation
pub const CRITICAL_HIGH_APTT: f64 = 200.0;
/// aPTT below which the operator must confirm the bolus
pub const CRITICAL_LOW_APTT: f64 = 30.0;

/// One row of the heparin nomogram
#[derive(Clone, Debug)]
pub struct HeparinRow {
    pub bolus: Option<&'static str>,
    pub hold: Option<&'static str>,
    pub dose_change: &'static str,
    pub next_check: &'static str,
    pub severity: Severity,
}

const fn row(
    bolus: Option<&'static str>,
    hold: Option<&'static str>,
    dose_change: &'static str,
    next_check: &'static str,
    severity: Severity,
) -> HeparinRow {
    HeparinRow {
        bolus,
        hold,
        dose_change,
        next_check,
        severity,
    }
}

static HEPARIN_TABLE: Lazy<BandTable<HeparinRow>> = Lazy::new(|| {
    use Severity::*;
    BandTable::new()
        .below(30.0, row(Some("80 units/kg"), None, "Increase by 4 units/kg/hr", "6 hrs", Warning))
        .range(30.0, 51.0, row(Some("40 units/kg"), None, "Increase by 3 units/kg/hr", "6 hrs", Warning))
        .range(51.0, 70.0, row(None, None, "Increase by 2 units/kg/hr", "6 hrs", Warning))
        .range(70.0, 91.0, row(None, None, "No Dose Change", "6 hrs or next morning", Therapeutic))
        .range(91.0, 101.0, row(None, None, "Decrease by 1 unit/kg/hr", "6 hrs", Warning))
        .range(101.0, 111.0, row(None, Some("30 min"), "Decrease by 2 units/kg/hr", "6 hrs", Warning))
        .range(111.0, 121.0, row(None, Some("1 hr"), "Decrease by 3 units/kg/hr", "6 hrs", Warning))
        .range(121.0, 200.0, row(None, Some("2 hrs"), "Decrease by 3 units/kg/hr", "6 hrs", Warning))
        .at_least(
            200.0,
            row(
                None,
                Some("Hold & PAGE MD, check aPTT q2h until < 121"),
                "PAGE MD, DECREASE by 4 units/kg/hr and restart when aPTT < 121",
                "6 hrs after aPTT < 121",
                Critical,
            ),
        )
});

/// The nomogram, for inspection and coverage checks
pub fn heparin_table() -> &'static BandTable<HeparinRow> {
    &HEPARIN_TABLE
}

/// Map an aPTT value to a heparin titration decision
pub fn titrate_heparin(aptt: f64) -> Result<TitrationDecision> {
    let aptt = require_at_least(aptt, 0.0, true, "Please enter a valid aPTT value.")?;

    let row = HEPARIN_TABLE.lookup(aptt).ok_or_else(|| {
        crate::Error::DomainGap(format!("aPTT {} seconds", aptt))
    })?;

    tracing::debug!("aPTT {} resolved to dose change '{}'", aptt, row.dose_change);

    let mut decision = TitrationDecision::new(Protocol::Heparin, row.severity, row.dose_change);
    decision.bolus = row.bolus.map(String::from);
    decision.hold = row.hold.map(String::from);
    decision.next_check = Some(row.next_check.to_string());
    decision.requires_confirmation = aptt >= CRITICAL_HIGH_APTT || aptt < CRITICAL_LOW_APTT;
    decision.inputs = format!("aPTT: {}", aptt);
    Ok(decision)
}

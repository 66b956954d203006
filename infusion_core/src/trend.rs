//! Trend series for charting glucose and infusion rate over time.

use crate::monitor::MonitoringState;
use crate::{ProtocolFamily, Reading, ReadingKind};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Which values a series carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesSelector {
    Bg,
    Rate,
    Both,
}

/// One chart point. With `SeriesSelector::Both` a point may carry both values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub bg: Option<f64>,
    pub rate: Option<f64>,
}

impl TrendPoint {
    fn bg(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            bg: Some(reading.value),
            rate: None,
        }
    }

    fn rate(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            bg: None,
            rate: Some(reading.value),
        }
    }
}

/// Build an ascending series over readings with `timestamp >= now - lookback`.
///
/// A lookback reaching past the representable range covers the whole partition.
pub fn build_series(
    state: &MonitoringState,
    family: ProtocolFamily,
    selector: SeriesSelector,
    lookback: Duration,
    now: DateTime<Utc>,
) -> Vec<TrendPoint> {
    let store = state.family(family);
    let cutoff = now
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let bg = store.since(ReadingKind::Glucose, cutoff);
    let rates = store.since(ReadingKind::InfusionRate, cutoff);

    match selector {
        SeriesSelector::Bg => bg.iter().map(TrendPoint::bg).collect(),
        SeriesSelector::Rate => rates.iter().map(TrendPoint::rate).collect(),
        SeriesSelector::Both => merge(bg, rates, state.settings().merge_tolerance),
    }
}

/// Two-pointer merge of sorted partitions. A glucose and a rate reading
/// closer than `tolerance` become one point at the glucose timestamp.
fn merge(bg: &[Reading], rates: &[Reading], tolerance: Duration) -> Vec<TrendPoint> {
    let mut points = Vec::with_capacity(bg.len() + rates.len());
    let (mut i, mut j) = (0, 0);

    while i < bg.len() && j < rates.len() {
        let (b, r) = (&bg[i], &rates[j]);
        if (b.timestamp - r.timestamp).abs() < tolerance {
            points.push(TrendPoint {
                timestamp: b.timestamp,
                bg: Some(b.value),
                rate: Some(r.value),
            });
            i += 1;
            j += 1;
        } else if b.timestamp < r.timestamp {
            points.push(TrendPoint::bg(b));
            i += 1;
        } else {
            points.push(TrendPoint::rate(r));
            j += 1;
        }
    }
    points.extend(bg[i..].iter().map(TrendPoint::bg));
    points.extend(rates[j..].iter().map(TrendPoint::rate));
    points
}

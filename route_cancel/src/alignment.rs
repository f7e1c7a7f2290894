//! Alignment of the simulated curve with the baseline at the check window.
//!
//! Before `check_start` only the baseline is shown. From `check_start` on,
//! the simulated curve keeps its own shape but is re-based onto the baseline
//! total accumulated before the window opened, so the gap between the two
//! curves isolates the effect of the cancellations. With no cancellations
//! the simulated values are passed through untouched.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{is_before, CumulativeSeries, Metric};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlignedPoint {
    pub date: NaiveDate,
    /// Cumulative value of the simulated series before re-basing.
    pub simulated: f64,
    pub displayed: f64,
}

/// One baseline date of a divergence join. `divergence` is `None` when the
/// compared series has no row for the date.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DivergencePoint {
    pub date: NaiveDate,
    pub baseline: f64,
    pub compared: Option<f64>,
    pub divergence: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricAlignment {
    pub metric: Metric,
    pub anchor: f64,
    /// `false` on the pass-through path taken when nothing is cancelled.
    pub anchored: bool,
    pub displayed: Vec<AlignedPoint>,
    pub divergence: Vec<DivergencePoint>,
}

impl MetricAlignment {
    pub fn displayed_at(&self, date: NaiveDate) -> Option<f64> {
        self.displayed
            .iter()
            .find(|p| p.date == date)
            .map(|p| p.displayed)
    }

    pub fn displayed_points(&self) -> Vec<(NaiveDate, f64)> {
        self.displayed.iter().map(|p| (p.date, p.displayed)).collect()
    }

    /// Divergence rows that have a value.
    pub fn divergence_points(&self) -> Vec<(NaiveDate, f64)> {
        self.divergence
            .iter()
            .filter_map(|p| p.divergence.map(|d| (p.date, d)))
            .collect()
    }
}

/// Largest baseline cumulative value dated before `check_start`, or 0.
pub fn anchor_value(baseline: &CumulativeSeries, metric: Metric, check_start: NaiveDateTime) -> f64 {
    baseline
        .rows
        .iter()
        .filter(|r| is_before(r.date, check_start))
        .map(|r| *r.cumulative.get(metric))
        .fold(None, |best: Option<f64>, v| {
            Some(best.map_or(v, |b| b.max(v)))
        })
        .unwrap_or(0.0)
}

pub fn align_metric(
    baseline: &CumulativeSeries,
    simulated: &CumulativeSeries,
    metric: Metric,
    check_start: NaiveDateTime,
    has_cancellations: bool,
) -> MetricAlignment {
    let anchor = anchor_value(baseline, metric, check_start);
    let window: Vec<(NaiveDate, f64)> = simulated
        .rows
        .iter()
        .filter(|r| !is_before(r.date, check_start))
        .map(|r| (r.date, *r.cumulative.get(metric)))
        .collect();

    let displayed: Vec<AlignedPoint> = match window.first() {
        None => Vec::new(),
        Some(_) if !has_cancellations => window
            .iter()
            .map(|&(date, value)| AlignedPoint {
                date,
                simulated: value,
                displayed: value,
            })
            .collect(),
        Some(&(_, first_sim)) => window
            .iter()
            .map(|&(date, value)| AlignedPoint {
                date,
                simulated: value,
                displayed: anchor + (value - first_sim),
            })
            .collect(),
    };

    let divergence = if displayed.is_empty() {
        Vec::new()
    } else {
        let shown: BTreeMap<NaiveDate, f64> =
            displayed.iter().map(|p| (p.date, p.displayed)).collect();
        join_divergence(baseline, metric, check_start, &shown)
    };

    MetricAlignment {
        metric,
        anchor,
        anchored: has_cancellations,
        displayed,
        divergence,
    }
}

/// Un-anchored simulated minus baseline, for baseline dates from `from` on.
pub fn raw_divergence(
    baseline: &CumulativeSeries,
    simulated: &CumulativeSeries,
    metric: Metric,
    from: NaiveDateTime,
) -> Vec<DivergencePoint> {
    let values: BTreeMap<NaiveDate, f64> = simulated
        .rows
        .iter()
        .map(|r| (r.date, *r.cumulative.get(metric)))
        .collect();
    join_divergence(baseline, metric, from, &values)
}

// Left join on the baseline dates at or after `from`.
fn join_divergence(
    baseline: &CumulativeSeries,
    metric: Metric,
    from: NaiveDateTime,
    compared: &BTreeMap<NaiveDate, f64>,
) -> Vec<DivergencePoint> {
    baseline
        .rows
        .iter()
        .filter(|r| !is_before(r.date, from))
        .map(|r| {
            let base = *r.cumulative.get(metric);
            let other = compared.get(&r.date).copied();
            DivergencePoint {
                date: r.date,
                baseline: base,
                compared: other,
                divergence: other.map(|v| v - base),
            }
        })
        .collect()
}

/// The baseline curve split at `now` into its settled and forecast parts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BaselineSegments {
    pub settled: Vec<(NaiveDate, f64)>,
    pub forecast: Vec<(NaiveDate, f64)>,
}

pub fn split_baseline(
    baseline: &CumulativeSeries,
    metric: Metric,
    now: NaiveDateTime,
) -> BaselineSegments {
    let (settled, forecast): (Vec<_>, Vec<_>) = baseline
        .points(metric)
        .into_iter()
        .partition(|(date, _)| is_before(*date, now));
    BaselineSegments { settled, forecast }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::MetricPair;

    fn series(points: &[(u32, f64)]) -> CumulativeSeries {
        CumulativeSeries::from_daily(
            points
                .iter()
                .map(|&(d, v)| (day(d), MetricPair::new(v, v)))
                .collect(),
        )
    }

    #[test]
    fn test_anchor_is_max_before_check_start() {
        // cash-like dip: the max is not the last value before the window
        let baseline = series(&[(1, 50.0), (2, -80.0), (3, 10.0)]);
        assert_eq!(anchor_value(&baseline, Metric::Cash, at(3, 0)), 50.0);
        assert_eq!(anchor_value(&baseline, Metric::Cash, at(1, 0)), 0.0);
    }

    #[test]
    fn test_anchored_curve_starts_at_anchor() {
        let baseline = series(&[(1, 100.0), (2, 100.0), (3, 100.0), (4, 100.0)]);
        let simulated = series(&[(1, 100.0), (2, 100.0), (3, 40.0), (4, 40.0)]);
        let aligned = align_metric(&baseline, &simulated, Metric::Gmv, at(3, 0), true);
        assert!(aligned.anchored);
        assert_eq!(aligned.anchor, 200.0);
        assert_eq!(aligned.displayed[0].displayed, aligned.anchor);
        assert_eq!(aligned.displayed_at(day(4)), Some(240.0));
        assert_eq!(
            aligned.divergence_points(),
            vec![(day(3), -100.0), (day(4), -160.0)]
        );
    }

    #[test]
    fn test_pass_through_without_cancellations() {
        let baseline = series(&[(1, 10.0), (2, 20.0), (3, 30.0)]);
        let aligned = align_metric(&baseline, &baseline.clone(), Metric::Gmv, at(2, 0), false);
        assert!(!aligned.anchored);
        assert_eq!(aligned.displayed_points(), vec![(day(2), 30.0), (day(3), 60.0)]);
        assert!(aligned.divergence.iter().all(|p| p.divergence == Some(0.0)));
    }

    #[test]
    fn test_missing_simulated_date_has_no_divergence() {
        let baseline = series(&[(1, 10.0), (2, 10.0), (3, 10.0), (4, 10.0)]);
        let simulated = series(&[(1, 10.0), (2, 5.0), (4, 5.0)]);
        let aligned = align_metric(&baseline, &simulated, Metric::Gmv, at(2, 0), true);
        assert_eq!(aligned.divergence.len(), 3);
        assert_eq!(aligned.divergence[1].date, day(3));
        assert_eq!(aligned.divergence[1].divergence, None);
        assert_eq!(aligned.divergence[1].compared, None);
        assert_eq!(aligned.divergence_points().len(), 2);
    }

    #[test]
    fn test_empty_window_produces_empty_series() {
        let baseline = series(&[(1, 10.0), (2, 10.0)]);
        let aligned = align_metric(&baseline, &baseline.clone(), Metric::Gmv, at(5, 0), true);
        assert_eq!(aligned.anchor, 20.0);
        assert!(aligned.displayed.is_empty());
        assert!(aligned.divergence.is_empty());
    }

    #[test]
    fn test_no_history_anchors_at_zero() {
        let baseline = series(&[(3, 10.0), (4, 10.0)]);
        let simulated = series(&[(3, 4.0), (4, 4.0)]);
        let aligned = align_metric(&baseline, &simulated, Metric::Gmv, at(2, 0), true);
        assert_eq!(aligned.anchor, 0.0);
        assert_eq!(aligned.displayed_points(), vec![(day(3), 0.0), (day(4), 4.0)]);
    }

    #[test]
    fn test_raw_divergence_is_unanchored() {
        let baseline = series(&[(1, 10.0), (2, 10.0), (3, 10.0)]);
        let simulated = series(&[(1, 10.0), (2, 6.0), (3, 6.0)]);
        let raw = raw_divergence(&baseline, &simulated, Metric::Cash, at(2, 0));
        let values: Vec<Option<f64>> = raw.iter().map(|p| p.divergence).collect();
        assert_eq!(values, vec![Some(-4.0), Some(-8.0)]);
    }

    #[test]
    fn test_split_baseline_at_now() {
        let baseline = series(&[(1, 1.0), (2, 1.0), (3, 1.0)]);
        let segments = split_baseline(&baseline, Metric::Gmv, at(2, 12));
        assert_eq!(segments.settled, vec![(day(1), 1.0), (day(2), 2.0)]);
        assert_eq!(segments.forecast, vec![(day(3), 3.0)]);
    }
}

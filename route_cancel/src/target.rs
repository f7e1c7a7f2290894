//! Proportional dilution of period targets across dates.
//!
//! Each date receives the share of the period target that matches its share
//! of total baseline volume over the whole table; the shares are then
//! accumulated like any other daily series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Column, CumulativeSeries, DailyTable, Metric, MetricPair};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TargetRow {
    pub date: NaiveDate,
    pub weight: MetricPair<f64>,
    pub diluted: MetricPair<f64>,
    pub cumulative_target: MetricPair<f64>,
    /// Running total of the raw baseline figures (historical reference line).
    pub baseline_cumulative: MetricPair<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetSeries {
    pub targets: MetricPair<f64>,
    pub rows: Vec<TargetRow>,
}

impl TargetSeries {
    pub fn points(&self, metric: Metric) -> Vec<(NaiveDate, f64)> {
        self.rows
            .iter()
            .map(|r| (r.date, *r.cumulative_target.get(metric)))
            .collect()
    }

    pub fn baseline_points(&self, metric: Metric) -> Vec<(NaiveDate, f64)> {
        self.rows
            .iter()
            .map(|r| (r.date, *r.baseline_cumulative.get(metric)))
            .collect()
    }
}

/// Per-date baseline share of `metric`. A zero total yields zero weights.
pub fn dilution_weights(table: &DailyTable, metric: Metric) -> Vec<(NaiveDate, f64)> {
    let total = table.total(Column::Baseline, metric);
    table
        .rows
        .iter()
        .map(|row| {
            let weight = if total == 0.0 {
                0.0
            } else {
                *row.baseline.get(metric) / total
            };
            (row.date, weight)
        })
        .collect()
}

pub fn dilute_targets(table: &DailyTable, targets: MetricPair<f64>) -> TargetSeries {
    let weights = MetricPair::from_fn(|metric| dilution_weights(table, metric));

    let mut daily: Vec<(NaiveDate, MetricPair<f64>, MetricPair<f64>)> = table
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let weight = MetricPair::new(weights.gmv[idx].1, weights.cash[idx].1);
            let diluted = MetricPair::from_fn(|m| *weight.get(m) * *targets.get(m));
            (row.date, weight, diluted)
        })
        .collect();
    daily.sort_by_key(|(date, _, _)| *date);

    let cumulative_target =
        CumulativeSeries::from_daily(daily.iter().map(|(d, _, diluted)| (*d, *diluted)).collect());
    let baseline = CumulativeSeries::accumulate(table, Column::Baseline);

    let rows = daily
        .into_iter()
        .zip(cumulative_target.rows)
        .zip(baseline.rows)
        .map(|(((date, weight, diluted), target_row), baseline_row)| TargetRow {
            date,
            weight,
            diluted,
            cumulative_target: target_row.cumulative,
            baseline_cumulative: baseline_row.cumulative,
        })
        .collect();

    TargetSeries { targets, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{aggregate_daily, select_values};

    fn table_for(trips: &[crate::TripRecord]) -> DailyTable {
        aggregate_daily(&select_values(trips, at(1, 0)))
    }

    #[test]
    fn test_dilution_sums_to_target() {
        let trips = vec![
            trip(1, "R1", 100.0, 10.0),
            trip(2, "R1", 300.0, 30.0),
            trip(2, "R2", 200.0, -20.0),
            trip(4, "R3", 400.0, 60.0),
        ];
        let series = dilute_targets(&table_for(&trips), MetricPair::new(5_000.0, 900.0));
        assert_eq!(series.rows.len(), 3);

        let total_gmv: f64 = series.rows.iter().map(|r| r.diluted.gmv).sum();
        let total_cash: f64 = series.rows.iter().map(|r| r.diluted.cash).sum();
        assert!((total_gmv - 5_000.0).abs() < 1e-6);
        assert!((total_cash - 900.0).abs() < 1e-6);

        let last = series.rows.last().unwrap();
        assert!((last.cumulative_target.gmv - 5_000.0).abs() < 1e-6);
        assert_close(series.rows[1].weight.gmv, 0.5);
        assert_close(series.rows[1].diluted.gmv, 2_500.0);
        assert_close(last.baseline_cumulative.gmv, 1_000.0);
        assert_close(last.baseline_cumulative.cash, 80.0);
    }

    #[test]
    fn test_zero_baseline_gives_zero_weights() {
        let trips = vec![trip(1, "R1", 0.0, 50.0), trip(2, "R1", 0.0, -50.0)];
        let series = dilute_targets(&table_for(&trips), MetricPair::new(1_000.0, 1_000.0));
        for row in &series.rows {
            assert_eq!(row.weight, MetricPair::new(0.0, 0.0));
            assert_eq!(row.diluted, MetricPair::new(0.0, 0.0));
            assert_eq!(row.cumulative_target, MetricPair::new(0.0, 0.0));
        }
    }

    #[test]
    fn test_partial_horizon_need_not_reach_target() {
        // day 3 carries volume but sits outside the table handed in
        let trips = vec![trip(1, "R1", 100.0, 0.0), trip(2, "R1", 100.0, 0.0)];
        let full = vec![trips[0].clone(), trips[1].clone(), trip(3, "R1", 200.0, 0.0)];
        let full_series = dilute_targets(&table_for(&full), MetricPair::new(400.0, 0.0));
        let through_day2: f64 = full_series.rows[..2].iter().map(|r| r.diluted.gmv).sum();
        assert_close(through_day2, 200.0);
        assert_close(full_series.points(Metric::Gmv)[1].1, 200.0);
    }

    #[test]
    fn test_empty_table() {
        let series = dilute_targets(&DailyTable::default(), MetricPair::new(1.0, 1.0));
        assert!(series.rows.is_empty());
        assert!(series.baseline_points(Metric::Cash).is_empty());
    }
}

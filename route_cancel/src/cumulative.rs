use chrono::NaiveDate;
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use crate::{Column, DailyTable, Metric, MetricPair};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CumulativeRow {
    pub date: NaiveDate,
    pub daily: MetricPair<f64>,
    pub cumulative: MetricPair<f64>,
}

/// Date-ordered running totals of both metrics.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CumulativeSeries {
    pub rows: Vec<CumulativeRow>,
}

impl CumulativeSeries {
    /// Sort `points` by date (stable) and accumulate each metric in its own
    /// unit, without rounding.
    pub fn from_daily(mut points: Vec<(NaiveDate, MetricPair<f64>)>) -> Self {
        points.sort_by_key(|(date, _)| *date);
        let totals = MetricPair::from_fn(|metric| {
            let values: Vec<f64> = points.iter().map(|(_, v)| *v.get(metric)).collect();
            running_sum(&values)
        });
        let rows = points
            .into_iter()
            .enumerate()
            .map(|(idx, (date, daily))| CumulativeRow {
                date,
                daily,
                cumulative: MetricPair::new(totals.gmv[idx], totals.cash[idx]),
            })
            .collect();
        Self { rows }
    }

    pub fn accumulate(table: &DailyTable, column: Column) -> Self {
        Self::from_daily(
            table
                .rows
                .iter()
                .map(|row| (row.date, row.value(column)))
                .collect(),
        )
    }

    /// Re-sort and re-accumulate from the stored daily values.
    pub fn reaccumulate(&self) -> Self {
        Self::from_daily(self.rows.iter().map(|r| (r.date, r.daily)).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&CumulativeRow> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&CumulativeRow> {
        self.rows.last()
    }

    pub fn value_at(&self, date: NaiveDate, metric: Metric) -> Option<f64> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|idx| *self.rows[idx].cumulative.get(metric))
    }

    pub fn points(&self, metric: Metric) -> Vec<(NaiveDate, f64)> {
        self.rows
            .iter()
            .map(|r| (r.date, *r.cumulative.get(metric)))
            .collect()
    }
}

pub fn running_sum(values: &[f64]) -> Array1<f64> {
    let mut totals = Array1::from_vec(values.to_vec());
    totals.accumulate_axis_inplace(Axis(0), |&prev, curr| *curr += prev);
    totals
}

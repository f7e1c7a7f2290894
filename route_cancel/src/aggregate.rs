use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{is_before, Metric, MetricPair, SelectedTrip, TripRecord};

/// Which figures of a daily row to read.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Column {
    Baseline,
    Selected,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub baseline: MetricPair<f64>,
    pub selected: MetricPair<f64>,
    pub trips: usize,
}

impl DailyRow {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            baseline: MetricPair::zero(),
            selected: MetricPair::zero(),
            trips: 0,
        }
    }

    pub fn value(&self, column: Column) -> MetricPair<f64> {
        match column {
            Column::Baseline => self.baseline,
            Column::Selected => self.selected,
        }
    }
}

/// Per-date sums. Row order carries no meaning; consumers that need date
/// order sort for themselves.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DailyTable {
    pub rows: Vec<DailyRow>,
}

impl DailyTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyRow> {
        self.rows.iter().find(|r| r.date == date)
    }

    pub fn total(&self, column: Column, metric: Metric) -> f64 {
        self.rows.iter().map(|r| *r.value(column).get(metric)).sum()
    }
}

/// Group trips by date and sum both figure sets. Dates without trips get no
/// row.
pub fn aggregate_daily<'t, 'a: 't, I>(trips: I) -> DailyTable
where
    I: IntoIterator<Item = &'t SelectedTrip<'a>>,
{
    let mut by_date: BTreeMap<NaiveDate, DailyRow> = BTreeMap::new();
    for trip in trips {
        let row = by_date
            .entry(trip.date())
            .or_insert_with(|| DailyRow::empty(trip.date()));
        row.baseline += trip.baseline();
        row.selected += trip.selected;
        row.trips += 1;
    }
    DailyTable {
        rows: by_date.into_values().collect(),
    }
}

/// Per-route totals split at the cutover.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteSummary {
    pub route_id: String,
    pub trips: usize,
    pub future_trips: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub settled_actual: MetricPair<f64>,
    pub future_baseline: MetricPair<f64>,
}

/// Summaries ordered by route id. Only the future baseline is removable by
/// a cancellation.
pub fn summarize_routes(trips: &[TripRecord], cutover: NaiveDateTime) -> Vec<RouteSummary> {
    let mut by_route: BTreeMap<&str, RouteSummary> = BTreeMap::new();
    for trip in trips {
        let entry = by_route
            .entry(trip.route_id.as_str())
            .or_insert_with(|| RouteSummary {
                route_id: trip.route_id.clone(),
                trips: 0,
                future_trips: 0,
                first_date: trip.date,
                last_date: trip.date,
                settled_actual: MetricPair::zero(),
                future_baseline: MetricPair::zero(),
            });
        entry.trips += 1;
        entry.first_date = entry.first_date.min(trip.date);
        entry.last_date = entry.last_date.max(trip.date);
        if is_before(trip.date, cutover) {
            entry.settled_actual += trip.actual();
        } else {
            entry.future_trips += 1;
            entry.future_baseline += trip.baseline();
        }
    }
    by_route.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{select_values, TripRecord};

    #[test]
    fn test_sums_routes_per_date() {
        let trips = vec![
            trip(2, "R1", 100.0, 10.0),
            trip(1, "R1", 50.0, -5.0),
            trip(2, "R2", 25.0, 1.0),
            trip(2, "R2", 25.0, 1.0),
        ];
        let selected = select_values(&trips, at(1, 0));
        let table = aggregate_daily(&selected);
        assert_eq!(table.len(), 2);
        let d2 = table.get(day(2)).unwrap();
        assert_eq!(d2.trips, 3);
        assert_eq!(d2.baseline, MetricPair::new(150.0, 12.0));
        assert_eq!(d2.selected, MetricPair::new(150.0, 12.0));
        assert_eq!(table.total(Column::Baseline, Metric::Cash), 7.0);
    }

    #[test]
    fn test_missing_dates_are_not_zero_filled() {
        let trips = vec![trip(1, "R1", 1.0, 1.0), trip(4, "R1", 1.0, 1.0)];
        let selected = select_values(&trips, at(1, 0));
        let table = aggregate_daily(&selected);
        let dates: Vec<NaiveDate> = table.dates().into_iter().collect();
        assert_eq!(dates, vec![day(1), day(4)]);
    }

    #[test]
    fn test_selected_column_tracks_actuals() {
        let trips = vec![TripRecord::new(
            day(1),
            "R1",
            MetricPair::new(100.0, 10.0),
            MetricPair::new(90.0, 8.0),
        )];
        let selected = select_values(&trips, at(2, 0));
        let table = aggregate_daily(&selected);
        assert_eq!(table.rows[0].value(Column::Baseline), MetricPair::new(100.0, 10.0));
        assert_eq!(table.rows[0].value(Column::Selected), MetricPair::new(90.0, 8.0));
    }

    #[test]
    fn test_empty_input() {
        let table = aggregate_daily(std::iter::empty::<&SelectedTrip>());
        assert!(table.is_empty());
    }

    #[test]
    fn test_route_summaries_split_at_cutover() {
        let mut trips = three_route_table();
        trips.push(trip(4, "R1", 500.0, 50.0));
        let summaries = summarize_routes(&trips, at(3, 0));
        assert_eq!(summaries.len(), 3);
        let r1 = &summaries[0];
        assert_eq!(r1.route_id, "R1");
        assert_eq!(r1.trips, 6);
        assert_eq!(r1.future_trips, 4);
        assert_eq!(r1.first_date, day(1));
        assert_eq!(r1.last_date, day(5));
        assert_eq!(r1.settled_actual, MetricPair::new(2000.0, 200.0));
        assert_eq!(r1.future_baseline, MetricPair::new(3500.0, 350.0));
    }
}

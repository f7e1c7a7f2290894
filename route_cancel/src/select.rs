//! Settled-versus-projected value selection.
//!
//! A trip dated strictly before the cutover is settled and contributes its
//! actual figures; a trip on or after the cutover day is still a forecast
//! and contributes its baseline figures.

use chrono::{NaiveDate, NaiveDateTime};

use crate::{is_before, MetricPair, TripRecord};

#[derive(Clone, Debug, PartialEq)]
pub struct SelectedTrip<'a> {
    pub trip: &'a TripRecord,
    pub settled: bool,
    pub selected: MetricPair<f64>,
}

impl<'a> SelectedTrip<'a> {
    pub fn date(&self) -> NaiveDate {
        self.trip.date
    }

    pub fn route_id(&self) -> &'a str {
        &self.trip.route_id
    }

    pub fn baseline(&self) -> MetricPair<f64> {
        self.trip.baseline()
    }
}

pub fn select_trip(trip: &TripRecord, cutover: NaiveDateTime) -> SelectedTrip<'_> {
    let settled = is_before(trip.date, cutover);
    let selected = if settled {
        trip.actual()
    } else {
        trip.baseline()
    };
    SelectedTrip {
        trip,
        settled,
        selected,
    }
}

pub fn select_values(trips: &[TripRecord], cutover: NaiveDateTime) -> Vec<SelectedTrip<'_>> {
    trips.iter().map(|trip| select_trip(trip, cutover)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn test_boundary_day_is_projected() {
        let trip = TripRecord::new(
            day(3),
            "R1",
            MetricPair::new(1000.0, 50.0),
            MetricPair::new(800.0, -20.0),
        );
        let before = select_trip(&trip, at(4, 0));
        assert!(before.settled);
        assert_eq!(before.selected, MetricPair::new(800.0, -20.0));

        let on_cutover = select_trip(&trip, at(3, 0));
        assert!(!on_cutover.settled);
        assert_eq!(on_cutover.selected, MetricPair::new(1000.0, 50.0));
    }

    #[test]
    fn test_select_values_keeps_row_order() {
        let trips = vec![trip(5, "R2", 10.0, 1.0), trip(1, "R1", 20.0, 2.0)];
        let selected = select_values(&trips, at(3, 0));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].route_id(), "R2");
        assert!(!selected[0].settled);
        assert!(selected[1].settled);
        assert_eq!(selected[1].baseline(), MetricPair::new(20.0, 2.0));
    }
}

//! Core route cancellation simulation library.
//!
//! Turns per-trip daily records into a baseline cumulative trajectory and a
//! "what-if" trajectory with selected routes removed from future activity,
//! then anchors the what-if curve to the baseline at the decision window.

use std::fmt;
use std::ops::AddAssign;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod alignment;
pub mod cumulative;
pub mod ingest;
pub mod scenario;
pub mod select;
pub mod session;
pub mod target;

pub use aggregate::{aggregate_daily, summarize_routes, Column, DailyRow, DailyTable, RouteSummary};
pub use alignment::{
    align_metric, anchor_value, raw_divergence, split_baseline, AlignedPoint, BaselineSegments,
    DivergencePoint, MetricAlignment,
};
pub use cumulative::{running_sum, CumulativeRow, CumulativeSeries};
pub use ingest::{parse_trip_date, parse_trips, parse_trips_from_reader};
pub use scenario::{simulated_trips, Scenario};
pub use select::{select_trip, select_values, SelectedTrip};
pub use session::{ScenarioLog, ScenarioSnapshot};
pub use target::{dilute_targets, dilution_weights, TargetRow, TargetSeries};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("failed to read trip table: {0}")]
    Csv(String),
    #[error("invalid trip record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to encode JSON: {0}")]
    Json(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Gmv,
    Cash,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Gmv, Metric::Cash];

    pub fn id(&self) -> &'static str {
        match self {
            Metric::Gmv => "gmv",
            Metric::Cash => "cash",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Gmv => "GMV",
            Metric::Cash => "Cash",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per metric. Every per-metric routine in the crate is written
/// once against `Metric` and stored through this pair.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricPair<T> {
    pub gmv: T,
    pub cash: T,
}

impl<T> MetricPair<T> {
    pub fn new(gmv: T, cash: T) -> Self {
        Self { gmv, cash }
    }

    pub fn from_fn(mut f: impl FnMut(Metric) -> T) -> Self {
        Self {
            gmv: f(Metric::Gmv),
            cash: f(Metric::Cash),
        }
    }

    pub fn get(&self, metric: Metric) -> &T {
        match metric {
            Metric::Gmv => &self.gmv,
            Metric::Cash => &self.cash,
        }
    }

}

impl MetricPair<f64> {
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl AddAssign for MetricPair<f64> {
    fn add_assign(&mut self, rhs: Self) {
        self.gmv += rhs.gmv;
        self.cash += rhs.cash;
    }
}

/// A single scheduled trip of a route on a calendar day.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripRecord {
    pub date: NaiveDate,
    pub route_id: String,
    pub gmv_baseline: f64,
    pub gmv_actual: f64,
    pub cash_baseline: f64,
    pub cash_actual: f64,
}

impl TripRecord {
    pub fn new(
        date: NaiveDate,
        route_id: impl Into<String>,
        baseline: MetricPair<f64>,
        actual: MetricPair<f64>,
    ) -> Self {
        Self {
            date,
            route_id: route_id.into(),
            gmv_baseline: baseline.gmv,
            gmv_actual: actual.gmv,
            cash_baseline: baseline.cash,
            cash_actual: actual.cash,
        }
    }

    pub fn baseline(&self) -> MetricPair<f64> {
        MetricPair::new(self.gmv_baseline, self.cash_baseline)
    }

    pub fn actual(&self) -> MetricPair<f64> {
        MetricPair::new(self.gmv_actual, self.cash_actual)
    }
}

/// Timestamp a trip date is compared as: the start of that day.
pub fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// `true` when a trip on `date` happens strictly before `boundary`.
pub fn is_before(date: NaiveDate, boundary: NaiveDateTime) -> bool {
    day_start(date) < boundary
}

/// The three markers of one rendering pass. The start of `now`'s day is the
/// cutover between settled and projected trips.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoints {
    pub now: NaiveDateTime,
    pub check_start: NaiveDateTime,
    pub check_end: NaiveDateTime,
}

impl Checkpoints {
    pub fn new(
        now: NaiveDateTime,
        check_start: NaiveDateTime,
        check_end: NaiveDateTime,
    ) -> Result<Self, SimError> {
        if check_start < now {
            return Err(SimError::InvalidParameter(format!(
                "check_start {} precedes now {}",
                check_start, now
            )));
        }
        if check_end < check_start {
            return Err(SimError::InvalidParameter(format!(
                "check_end {} precedes check_start {}",
                check_end, check_start
            )));
        }
        Ok(Self {
            now,
            check_start,
            check_end,
        })
    }

    /// Trips dated today are still projected, whatever the time of day.
    pub fn cutover(&self) -> NaiveDateTime {
        day_start(self.now.date())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub now: Option<NaiveDateTime>,
    pub check_start: Option<NaiveDateTime>,
    pub check_end: Option<NaiveDateTime>,
    pub lead_hours: i64,
    pub window_hours: i64,
    pub gmv_target: f64,
    pub cash_target: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            now: None,
            check_start: None,
            check_end: None,
            lead_hours: 48,
            window_hours: 24,
            gmv_target: 600_000.0,
            cash_target: 300_000.0,
        }
    }
}

impl SimConfig {
    /// Resolve the markers, falling back to `clock_now` when no explicit
    /// `now` is configured.
    pub fn checkpoints_at(&self, clock_now: NaiveDateTime) -> Result<Checkpoints, SimError> {
        if self.lead_hours < 0 {
            return Err(SimError::InvalidParameter(format!(
                "lead_hours must be >= 0 (got {})",
                self.lead_hours
            )));
        }
        if self.window_hours < 0 {
            return Err(SimError::InvalidParameter(format!(
                "window_hours must be >= 0 (got {})",
                self.window_hours
            )));
        }
        let now = self.now.unwrap_or(clock_now);
        let check_start = match self.check_start {
            Some(ts) => ts,
            None => offset_hours(now, self.lead_hours, "lead_hours")?,
        };
        let check_end = match self.check_end {
            Some(ts) => ts,
            None => offset_hours(check_start, self.window_hours, "window_hours")?,
        };
        Checkpoints::new(now, check_start, check_end)
    }

    pub fn targets(&self) -> Result<MetricPair<f64>, SimError> {
        let targets = MetricPair::new(self.gmv_target, self.cash_target);
        for metric in Metric::ALL {
            let value = *targets.get(metric);
            if !value.is_finite() {
                return Err(SimError::InvalidParameter(format!(
                    "{} target must be finite (got {})",
                    metric, value
                )));
            }
        }
        Ok(targets)
    }
}

fn offset_hours(from: NaiveDateTime, hours: i64, name: &str) -> Result<NaiveDateTime, SimError> {
    Duration::try_hours(hours)
        .and_then(|delta| from.checked_add_signed(delta))
        .ok_or_else(|| {
            SimError::InvalidParameter(format!("{} = {} is out of range", name, hours))
        })
}

/// End-of-horizon figures for one metric.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSummary {
    pub baseline_final: Option<f64>,
    pub displayed_final: Option<f64>,
    pub divergence_final: Option<f64>,
    pub target_final: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub checkpoints: Checkpoints,
    pub scenario: Scenario,
    pub baseline: CumulativeSeries,
    pub simulated: CumulativeSeries,
    pub alignment: MetricPair<MetricAlignment>,
    pub raw_divergence: MetricPair<Vec<DivergencePoint>>,
    pub segments: MetricPair<BaselineSegments>,
    pub targets: TargetSeries,
}

impl SimulationOutput {
    pub fn summary(&self) -> MetricPair<MetricSummary> {
        MetricPair::from_fn(|metric| {
            let alignment = self.alignment.get(metric);
            MetricSummary {
                baseline_final: self.baseline.last().map(|r| *r.cumulative.get(metric)),
                displayed_final: alignment.displayed.last().map(|p| p.displayed),
                divergence_final: alignment
                    .divergence
                    .iter()
                    .rev()
                    .find_map(|p| p.divergence),
                target_final: self
                    .targets
                    .rows
                    .last()
                    .map(|r| *r.cumulative_target.get(metric)),
            }
        })
    }
}

/// Run one full, sequential recomputation for `scenario`.
pub fn simulate(
    trips: &[TripRecord],
    checkpoints: &Checkpoints,
    targets: MetricPair<f64>,
    scenario: &Scenario,
) -> SimulationOutput {
    let cutover = checkpoints.cutover();
    let selected = select_values(trips, cutover);

    let baseline_daily = aggregate_daily(&selected);
    let baseline = CumulativeSeries::accumulate(&baseline_daily, Column::Selected);

    let simulated_daily = aggregate_daily(simulated_trips(&selected, cutover, scenario));
    let simulated = CumulativeSeries::accumulate(&simulated_daily, Column::Selected);

    let has_cancellations = scenario.has_cancellations();
    let alignment = MetricPair::from_fn(|metric| {
        align_metric(
            &baseline,
            &simulated,
            metric,
            checkpoints.check_start,
            has_cancellations,
        )
    });
    let raw = MetricPair::from_fn(|metric| raw_divergence(&baseline, &simulated, metric, cutover));
    let segments = MetricPair::from_fn(|metric| split_baseline(&baseline, metric, cutover));
    let targets = dilute_targets(&baseline_daily, targets);

    SimulationOutput {
        checkpoints: *checkpoints,
        scenario: scenario.clone(),
        baseline,
        simulated,
        alignment,
        raw_divergence: raw,
        segments,
        targets,
    }
}

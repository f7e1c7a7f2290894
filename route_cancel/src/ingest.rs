use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::{SimError, TripRecord};

#[derive(Debug, Deserialize)]
struct RawTrip {
    #[serde(alias = "Data")]
    date: String,
    #[serde(alias = "Rota")]
    route_id: String,
    #[serde(alias = "GMV_baseline")]
    gmv_baseline: f64,
    #[serde(alias = "GMV_realizado")]
    gmv_actual: f64,
    #[serde(alias = "Cash_baseline")]
    cash_baseline: f64,
    #[serde(alias = "Cash_realizado")]
    cash_actual: f64,
}

impl RawTrip {
    fn into_record(self, line: usize) -> Result<TripRecord, SimError> {
        let invalid = |reason: String| SimError::InvalidRecord { line, reason };
        let date = parse_trip_date(&self.date)
            .ok_or_else(|| invalid(format!("unrecognised date '{}'", self.date)))?;
        let route_id = self.route_id.trim().to_string();
        if route_id.is_empty() {
            return Err(invalid("empty route id".into()));
        }
        for (name, value) in [
            ("gmv_baseline", self.gmv_baseline),
            ("gmv_actual", self.gmv_actual),
            ("cash_baseline", self.cash_baseline),
            ("cash_actual", self.cash_actual),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{} is not a finite number", name)));
            }
        }
        Ok(TripRecord {
            date,
            route_id,
            gmv_baseline: self.gmv_baseline,
            gmv_actual: self.gmv_actual,
            cash_baseline: self.cash_baseline,
            cash_actual: self.cash_actual,
        })
    }
}

/// Parse a trip table from CSV bytes with a header row.
pub fn parse_trips(input: &[u8]) -> Result<Vec<TripRecord>, SimError> {
    parse_trips_from_reader(input)
}

pub fn parse_trips_from_reader<R: Read>(reader: R) -> Result<Vec<TripRecord>, SimError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<RawTrip>().enumerate() {
        let line = idx + 1;
        let raw = row.map_err(|e| {
            if e.is_io_error() {
                SimError::Csv(e.to_string())
            } else {
                SimError::InvalidRecord {
                    line,
                    reason: e.to_string(),
                }
            }
        })?;
        out.push(raw.into_record(line)?);
    }
    Ok(out)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// RFC 3339. Any time of day is dropped.
pub fn parse_trip_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}

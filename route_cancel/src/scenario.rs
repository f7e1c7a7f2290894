use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{is_before, SelectedTrip};

/// A set of routes to cancel from the projected portion of the trip table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    pub label: String,
    pub cancelled_routes: BTreeSet<String>,
    pub created_at: NaiveDateTime,
}

impl Scenario {
    pub fn new<I, S>(label: impl Into<String>, routes: I, created_at: NaiveDateTime) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            cancelled_routes: routes.into_iter().map(Into::into).collect(),
            created_at,
        }
    }

    pub fn baseline(created_at: NaiveDateTime) -> Self {
        Self::new("baseline", Vec::<String>::new(), created_at)
    }

    pub fn has_cancellations(&self) -> bool {
        !self.cancelled_routes.is_empty()
    }

    pub fn is_cancelled(&self, route_id: &str) -> bool {
        self.cancelled_routes.contains(route_id)
    }

    /// SHA-256 over the sorted cancelled route ids. Label and creation time
    /// do not take part.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for route in &self.cancelled_routes {
            hasher.update(route.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// Trips of the simulated table: every trip before the cutover, and every
/// later trip whose route is not cancelled.
pub fn simulated_trips<'s, 'a: 's>(
    trips: &'s [SelectedTrip<'a>],
    cutover: NaiveDateTime,
    scenario: &'s Scenario,
) -> impl Iterator<Item = &'s SelectedTrip<'a>> + 's {
    trips
        .iter()
        .filter(move |t| is_before(t.date(), cutover) || !scenario.is_cancelled(t.route_id()))
}

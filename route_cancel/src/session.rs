//! Caller-owned, append-only log of evaluated scenarios.

use serde::{Deserialize, Serialize};

use crate::{
    AlignedPoint, CumulativeSeries, DivergencePoint, MetricPair, MetricSummary, Scenario, SimError,
    SimulationOutput,
};

/// Frozen copy of one scenario's outputs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSnapshot {
    pub index: usize,
    pub scenario: Scenario,
    pub fingerprint: String,
    pub simulated: CumulativeSeries,
    pub displayed: MetricPair<Vec<AlignedPoint>>,
    pub divergence: MetricPair<Vec<DivergencePoint>>,
    pub summary: MetricPair<MetricSummary>,
}

impl ScenarioSnapshot {
    pub fn from_output(index: usize, output: &SimulationOutput) -> Self {
        Self {
            index,
            scenario: output.scenario.clone(),
            fingerprint: output.scenario.fingerprint(),
            simulated: output.simulated.clone(),
            displayed: MetricPair::from_fn(|m| output.alignment.get(m).displayed.clone()),
            divergence: MetricPair::from_fn(|m| output.alignment.get(m).divergence.clone()),
            summary: output.summary(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScenarioLog {
    entries: Vec<ScenarioSnapshot>,
}

impl ScenarioLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot of `output` and return its index.
    pub fn record(&mut self, output: &SimulationOutput) -> usize {
        let index = self.entries.len();
        self.entries
            .push(ScenarioSnapshot::from_output(index, output));
        index
    }

    pub fn entries(&self) -> &[ScenarioSnapshot] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ScenarioSnapshot> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioSnapshot> {
        self.entries.iter()
    }

    pub fn with_fingerprint<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> impl Iterator<Item = &'a ScenarioSnapshot> + 'a {
        self.entries
            .iter()
            .filter(move |s| s.fingerprint == fingerprint)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::Json(e.to_string()))
    }
}

//! Observability registration for sighted entities

use dashmap::DashMap;
use serde::Serialize;

/// Latest observation of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub id: String,
    pub name: String,
    pub home: String,
    /// Agent type that reported the sighting (`network`, `ble`, ...)
    pub agent: String,
    pub distance: f32,
    pub seen_at: i64,
}

/// Receives a callback for every acknowledged sighting
pub trait Observer: Send + Sync {
    fn observe(&self, observation: Observation);
}

/// Keeps the latest observation per entity in memory
#[derive(Debug, Default)]
pub struct GaugeObserver {
    latest: DashMap<String, Observation>,
}

impl GaugeObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every observation, ordered by entity id
    #[must_use]
    pub fn snapshot(&self) -> Vec<Observation> {
        let mut all: Vec<Observation> = self.latest.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Observation> {
        self.latest.get(id).map(|e| e.value().clone())
    }
}

impl Observer for GaugeObserver {
    fn observe(&self, observation: Observation) {
        tracing::trace!("Observed {} at {}", observation.id, observation.home);
        self.latest.insert(observation.id.clone(), observation);
    }
}

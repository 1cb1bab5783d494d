//! Runtime configuration shared by every presence component

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for sighting reconciliation and scheduled automation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Liveness lease TTL for network sightings
    pub time_away_seconds: u64,
    /// Liveness window for BLE sightings
    pub ble_time_away_seconds: u64,
    /// Delay before the first shutdown command once a home is empty
    pub absence_seconds: u64,
    /// Extra delay added per additional device being shut down
    pub shutdown_stagger_seconds: u64,
    /// Whether newly discovered devices count as people
    pub new_device_is_person: bool,
    /// Whether the timed command queue is drained
    pub command_queue_enabled: bool,
    /// Cron expression (with seconds) for draining the queue
    pub drain_schedule: String,
    /// Interval between occupancy sweeps
    pub occupancy_sweep_seconds: u64,
    /// Deadline for every store and collaborator call
    pub call_timeout_seconds: u64,
    /// Skip a notification identical to the last one sent
    pub suppress_repeat_notifications: bool,
    /// Home used when a caller does not identify one
    pub default_home: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            time_away_seconds: 300,
            ble_time_away_seconds: 15,
            absence_seconds: 3600,
            shutdown_stagger_seconds: 10,
            new_device_is_person: false,
            command_queue_enabled: false,
            drain_schedule: "*/10 * * * * *".to_string(),
            occupancy_sweep_seconds: 30,
            call_timeout_seconds: 5,
            suppress_repeat_notifications: false,
            default_home: "unknown".to_string(),
        }
    }
}

impl PresenceConfig {
    /// TTL granted to network liveness leases
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.time_away_seconds)
    }

    /// Deadline applied to external calls
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

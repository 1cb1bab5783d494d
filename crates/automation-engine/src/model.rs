//! Data models for the automation engine

use serde::{Deserialize, Serialize};

/// A persisted, delayed automation action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCommand {
    /// Owner identity joined with the command slot
    pub id: String,
    /// Label used to group entries (home name or BLE id)
    pub owner: String,
    /// Text handed to the assistant
    pub command: String,
    /// Fire time (unix seconds)
    pub execute_at: i64,
    #[serde(default)]
    pub executed: bool,
    /// Insertion order, taken from the store's create revision
    #[serde(skip)]
    pub sequence: i64,
}

impl TimedCommand {
    /// Composite id for one (owner, slot) pair
    #[must_use]
    pub fn compose_id(owner_id: &str, slot: &str) -> String {
        format!("{}/{}", owner_id, slot)
    }

    /// Whether this entry fires at `now`
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        !self.executed && self.execute_at <= now
    }

    /// Whether this entry was scheduled on behalf of `home`
    #[must_use]
    pub fn references_home(&self, home: &str) -> bool {
        self.owner == home || self.id.split('/').any(|part| part == home)
    }
}

/// Administrative request to schedule a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimedCommandRequest {
    /// Explicit id; a random one under `owner` is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub owner: String,
    pub command: String,
    /// Fire after this many seconds
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// What one drain pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries whose action succeeded and that were removed
    pub fired: usize,
    /// Due entries whose action failed and that stay queued
    pub failed: usize,
}

/// Result of an occupancy toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The flag already had the requested value, or another caller flipped it
    Unchanged,
    /// The home had no flag yet; it was created without side effects
    Initialized,
    /// Empty to occupied; pending shutdowns were cancelled
    Occupied { cancelled: usize },
    /// Occupied to empty; shutdowns were scheduled
    Emptied { scheduled: Vec<String> },
}

/// Cached occupancy of one home
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HomeStatus {
    pub home: String,
    pub empty: bool,
}

/// Reported power state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl PowerState {
    /// Interpret an assistant answer
    #[must_use]
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "on" => PowerState::On,
            "off" => PowerState::Off,
            _ => PowerState::Unknown,
        }
    }
}

/// Events emitted by the presence engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A device was seen for the first time
    DeviceDiscovered { id: String, home: String, name: String },
    /// A device was seen at a different home
    DeviceMoved { id: String, from: String, to: String },
    /// A home's occupancy flipped
    HomeOccupancyChanged { home: String, empty: bool },
    /// A timed command was queued
    CommandScheduled { id: String, execute_at: i64 },
    /// A timed command's action succeeded
    CommandFired { id: String },
    /// A timed command's action failed and it stays queued
    CommandFailed { id: String, error: String },
}

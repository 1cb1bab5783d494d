//! Scheduled automation for presence reconciliation
//!
//! Owns the timed command queue, the dispatcher in front of the assistant and
//! notifier, occupancy transitions, BLE debounce and the periodic jobs that
//! drive them.

pub mod ble;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod occupancy;
pub mod persistence;
pub mod queue;
pub mod scheduler;

pub use ble::{BleAck, BleTracker};
pub use dispatcher::Dispatcher;
pub use engine::{Collaborators, PresenceEngine};
pub use error::AutomationError;
pub use model::*;
pub use queue::{Scheduled, TimedCommandQueue};

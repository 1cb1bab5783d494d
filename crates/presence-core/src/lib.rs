//! Presence reconciliation core
//!
//! Merges sightings reported by scanning agents into a device registry,
//! keeps per-entity liveness leases, and derives whole-home occupancy from
//! the live "person" leases.

pub mod ble;
pub mod clock;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod keys;
pub mod lease;
pub mod observer;
pub mod people;
pub mod registry;
pub mod services;
pub mod sighting;

pub use ble::{BleDevice, BleDirectory, Command};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PresenceConfig;
pub use device::{Device, Metadata, NetworkId};
pub use error::{PresenceError, ServiceError};
pub use lease::{LeaseManager, LeaseOutcome, LeaseRole};
pub use observer::{GaugeObserver, Observation, Observer};
pub use people::{PeopleRegistry, Person, PersonStatus};
pub use registry::{DeviceRegistry, IngestKind, IngestOutcome};
pub use services::{Assistant, Notifier, VendorLookup};
pub use sighting::{BleSighting, CallerMetadata, Sighting};

//! Key-value store client for the presence hub
//!
//! Models the small slice of an etcd-style store the presence core relies on:
//! prefix reads, plain and conditional writes, prefix deletes, and TTL leases
//! with keep-alive and attached-key lookup.

pub mod bounded;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod types;

pub use bounded::Bounded;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::KvStore;
pub use types::{KeyValue, LeaseId, LeaseStatus};

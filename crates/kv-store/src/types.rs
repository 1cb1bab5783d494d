//! Value types shared by every store implementation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a TTL lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A stored entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Store revision at which the key was created; kept across overwrites
    pub create_revision: i64,
    /// Store revision of the last write
    pub mod_revision: i64,
    /// Lease the key is attached to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseId>,
}

/// Time-to-live report for a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseStatus {
    pub id: LeaseId,
    /// TTL the lease was granted with
    pub granted_ttl: Duration,
    /// Time left before expiry
    pub remaining: Duration,
    /// Keys currently attached to the lease
    pub keys: Vec<String>,
}

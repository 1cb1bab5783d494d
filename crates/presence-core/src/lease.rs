//! Liveness leases and derived home occupancy
//!
//! Each sighted entity holds one TTL lease attached to `alive/{home}/{mac}`
//! whose value is its role. A home is occupied while any live key under it has
//! the `person` role. The `homes/{home}` flag mirrors the last computed
//! emptiness and is only a cache for readers.

use crate::error::PresenceError;
use crate::keys;
use kv_store::{KvStore, LeaseId, LeaseStatus, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a live entity counts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseRole {
    Person,
    Device,
}

impl LeaseRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseRole::Person => "person",
            LeaseRole::Device => "device",
        }
    }
}

impl fmt::Display for LeaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`LeaseManager::grant_or_renew`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// A fresh lease was attached to the key
    Granted(LeaseId),
    /// The existing lease was kept alive
    Renewed(LeaseId),
}

impl LeaseOutcome {
    #[must_use]
    pub fn lease(&self) -> LeaseId {
        match self {
            LeaseOutcome::Granted(id) | LeaseOutcome::Renewed(id) => *id,
        }
    }
}

/// Grants liveness leases and answers occupancy questions
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn KvStore>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Ensure exactly one live lease covers `alive/{home}/{mac}`
    ///
    /// An existing lease is renewed with its value unchanged. Otherwise a new
    /// lease is granted and the key created with a create-if-absent write; if
    /// a concurrent caller won that write, the fresh lease is revoked and the
    /// winner's lease renewed instead.
    pub async fn grant_or_renew(
        &self,
        home: &str,
        mac: &str,
        role: LeaseRole,
        ttl: Duration,
    ) -> Result<LeaseOutcome, PresenceError> {
        let key = keys::alive(home, mac);

        if let Some(renewed) = self.renew_existing(&key).await? {
            return Ok(renewed);
        }

        let lease = self.store.grant(ttl).await?;
        if self
            .store
            .compare_and_swap(&key, None, role.as_str(), Some(lease))
            .await?
        {
            tracing::debug!("Granted lease {} for {} as {}", lease, key, role);
            return Ok(LeaseOutcome::Granted(lease));
        }

        // Another sighting created the key first
        self.store.revoke(lease).await?;
        if let Some(renewed) = self.renew_existing(&key).await? {
            return Ok(renewed);
        }

        // The key exists without a lease; attach a fresh one
        let lease = self.store.grant(ttl).await?;
        self.store.put_with_lease(&key, role.as_str(), lease).await?;
        tracing::debug!("Re-attached lease {} to {}", lease, key);
        Ok(LeaseOutcome::Granted(lease))
    }

    async fn renew_existing(&self, key: &str) -> Result<Option<LeaseOutcome>, PresenceError> {
        let Some(status) = self.store.lease_for_key(key).await? else {
            return Ok(None);
        };
        match self.store.keep_alive(status.id).await {
            Ok(()) => {
                tracing::trace!("Renewed lease {} for {}", status.id, key);
                Ok(Some(LeaseOutcome::Renewed(status.id)))
            }
            // Expired between lookup and renewal
            Err(StoreError::LeaseNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The lease currently covering an entity, if any
    pub async fn lease_for(
        &self,
        home: &str,
        mac: &str,
    ) -> Result<Option<LeaseStatus>, PresenceError> {
        Ok(self.store.lease_for_key(&keys::alive(home, mac)).await?)
    }

    /// Drop an entity's liveness; returns whether a lease was revoked
    pub async fn revoke(&self, home: &str, mac: &str) -> Result<bool, PresenceError> {
        let key = keys::alive(home, mac);
        match self.store.lease_for_key(&key).await? {
            Some(status) => {
                self.store.revoke(status.id).await?;
                tracing::info!("Revoked lease {} for {}", status.id, key);
                Ok(true)
            }
            None => Ok(self.store.delete(&key).await? > 0),
        }
    }

    /// Whether no live `person` entity is present at `home`
    pub async fn is_house_empty(&self, home: &str) -> Result<bool, PresenceError> {
        let live = self.store.get_prefix(&keys::alive_in(home)).await?;
        Ok(!live.iter().any(|kv| kv.value == LeaseRole::Person.as_str()))
    }

    /// Every live `alive/` key
    pub async fn live_keys(&self) -> Result<HashSet<String>, PresenceError> {
        Ok(self
            .store
            .get_prefix(keys::ALIVE)
            .await?
            .into_iter()
            .map(|kv| kv.key)
            .collect())
    }

    /// Cached emptiness of a home, `None` if never computed
    pub async fn occupancy_flag(&self, home: &str) -> Result<Option<bool>, PresenceError> {
        Ok(self
            .store
            .get(&keys::home(home))
            .await?
            .map(|kv| kv.value == "true"))
    }

    /// Move the cached flag from `expected` to `empty`
    ///
    /// Returns false when another caller already changed it.
    pub async fn swap_occupancy_flag(
        &self,
        home: &str,
        expected: Option<bool>,
        empty: bool,
    ) -> Result<bool, PresenceError> {
        let expected = expected.map(flag_value);
        Ok(self
            .store
            .compare_and_swap(&keys::home(home), expected, flag_value(empty), None)
            .await?)
    }

    /// Every home with a cached flag, ordered by name
    pub async fn homes(&self) -> Result<Vec<(String, bool)>, PresenceError> {
        Ok(self
            .store
            .get_prefix(keys::HOMES)
            .await?
            .into_iter()
            .filter_map(|kv| {
                let home = kv.key.strip_prefix(keys::HOMES)?.to_string();
                Some((home, kv.value == "true"))
            })
            .collect())
    }
}

fn flag_value(empty: bool) -> &'static str {
    if empty {
        "true"
    } else {
        "false"
    }
}

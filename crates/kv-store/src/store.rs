//! The store capability consumed by the presence core

use crate::error::StoreError;
use crate::types::{KeyValue, LeaseId, LeaseStatus};
use async_trait::async_trait;
use std::time::Duration;

/// A consistent key-value store with TTL leases
///
/// Individual operations are atomic per key. There is no multi-key
/// transaction beyond [`KvStore::compare_and_swap`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read every key starting with `prefix`, ordered by key
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Write a key, detaching it from any lease
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write a key attached to `lease`; the key is removed when the lease expires
    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), StoreError>;

    /// Write `value` only if the current value equals `expected`
    ///
    /// `expected == None` means "create if absent". Returns whether the write
    /// happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        lease: Option<LeaseId>,
    ) -> Result<bool, StoreError>;

    /// Delete a single key, returning the number of deleted keys
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete every key starting with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Grant a new lease
    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Renew a lease for another full TTL
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Revoke a lease and delete every key attached to it
    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// List live leases
    async fn leases(&self) -> Result<Vec<LeaseId>, StoreError>;

    /// Report a lease's TTL and attached keys, `None` if it no longer exists
    async fn time_to_live(&self, lease: LeaseId) -> Result<Option<LeaseStatus>, StoreError>;

    /// Find the lease a key is attached to by scanning every live lease
    async fn lease_for_key(&self, key: &str) -> Result<Option<LeaseStatus>, StoreError> {
        for lease in self.leases().await? {
            let Some(status) = self.time_to_live(lease).await? else {
                continue;
            };
            if status.keys.iter().any(|k| k == key) {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }
}

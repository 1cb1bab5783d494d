//! In-process store with lazy lease expiry

use crate::error::StoreError;
use crate::snapshot::{self, Snapshot};
use crate::store::KvStore;
use crate::types::{KeyValue, LeaseId, LeaseStatus};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A stored value plus its bookkeeping
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    create_revision: i64,
    mod_revision: i64,
    lease: Option<LeaseId>,
}

/// Live lease state
#[derive(Debug)]
struct LeaseState {
    ttl: Duration,
    expires_at: Instant,
    keys: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: i64,
    next_lease: i64,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseState>,
}

impl Inner {
    /// Drop expired leases together with their keys
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(lease) = self.leases.remove(&id) {
                tracing::debug!("Lease {} expired, dropping {} keys", id, lease.keys.len());
                for key in lease.keys {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn key_value(key: &str, entry: &Entry) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            create_revision: entry.create_revision,
            mod_revision: entry.mod_revision,
            lease: entry.lease,
        }
    }

    fn write(&mut self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        if let Some(id) = lease {
            if !self.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id.0));
            }
        }

        self.revision += 1;
        let revision = self.revision;

        let previous_lease = match self.entries.get_mut(key) {
            Some(entry) => {
                let previous = entry.lease;
                entry.value = value.to_string();
                entry.mod_revision = revision;
                entry.lease = lease;
                previous
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        create_revision: revision,
                        mod_revision: revision,
                        lease,
                    },
                );
                None
            }
        };

        if previous_lease != lease {
            if let Some(old) = previous_lease.and_then(|id| self.leases.get_mut(&id)) {
                old.keys.remove(key);
            }
        }
        if let Some(new) = lease.and_then(|id| self.leases.get_mut(&id)) {
            new.keys.insert(key.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
                    lease.keys.remove(key);
                }
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            entries: self
                .entries
                .iter()
                .filter(|(_, entry)| entry.lease.is_none())
                .map(|(key, entry)| Self::key_value(key, entry))
                .collect(),
        }
    }
}

/// In-process [`KvStore`]
///
/// Lease expiry is evaluated on every call rather than by a timer task, using
/// the tokio clock so tests can drive it with `tokio::time::advance`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Snapshot target; writers hold this lock while serializing and writing
    snapshot_path: Option<Mutex<PathBuf>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, purely in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_lease: 1,
                ..Inner::default()
            }),
            snapshot_path: None,
        }
    }

    /// Create a store backed by a JSON snapshot of its non-leased keys
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let loaded = snapshot::load_snapshot(&path).await?;

        let mut inner = Inner {
            next_lease: 1,
            revision: loaded.revision,
            ..Inner::default()
        };
        for kv in loaded.entries {
            inner.revision = inner.revision.max(kv.mod_revision);
            inner.entries.insert(
                kv.key,
                Entry {
                    value: kv.value,
                    create_revision: kv.create_revision,
                    mod_revision: kv.mod_revision,
                    lease: None,
                },
            );
        }

        Ok(Self {
            inner: Mutex::new(inner),
            snapshot_path: Some(Mutex::new(path)),
        })
    }

    /// Rewrite the snapshot file, if any, from the current state
    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let path = path.lock().await;
        let snapshot = self.inner.lock().await.snapshot();
        snapshot::save_snapshot(&path, &snapshot).await
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        Ok(inner.entries.get(key).map(|e| Inner::key_value(key, e)))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| Inner::key_value(k, e))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.purge_expired(Instant::now());
            inner.write(key, value, None)?;
        }
        self.persist().await
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        inner.write(key, value, Some(lease))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        lease: Option<LeaseId>,
    ) -> Result<bool, StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.purge_expired(Instant::now());
            let current = inner.entries.get(key).map(|e| e.value.as_str());
            if current != expected {
                return Ok(false);
            }
            inner.write(key, value, lease)?;
        }
        if lease.is_none() {
            self.persist().await?;
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.purge_expired(Instant::now());
            inner.remove(key)
        };
        if removed {
            self.persist().await?;
        }
        Ok(u64::from(removed))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.purge_expired(Instant::now());
            let keys = inner.keys_with_prefix(prefix);
            keys.iter().filter(|key| inner.remove(key)).count() as u64
        };
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge_expired(now);
        let id = LeaseId(inner.next_lease);
        inner.next_lease += 1;
        inner.leases.insert(
            id,
            LeaseState {
                ttl,
                expires_at: now + ttl,
                keys: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge_expired(now);
        let state = inner
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease.0))?;
        state.expires_at = now + state.ttl;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        let state = inner
            .leases
            .remove(&lease)
            .ok_or(StoreError::LeaseNotFound(lease.0))?;
        for key in state.keys {
            inner.entries.remove(&key);
        }
        inner.revision += 1;
        Ok(())
    }

    async fn leases(&self) -> Result<Vec<LeaseId>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        let mut ids: Vec<LeaseId> = inner.leases.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn time_to_live(&self, lease: LeaseId) -> Result<Option<LeaseStatus>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge_expired(now);
        Ok(inner.leases.get(&lease).map(|state| LeaseStatus {
            id: lease,
            granted_ttl: state.ttl,
            remaining: state.expires_at.saturating_duration_since(now),
            keys: state.keys.iter().cloned().collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_read_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("devices/b", "2").await.unwrap();
        store.put("devices/a", "1").await.unwrap();
        store.put("devicesX", "no").await.unwrap();
        store.put("homes/x", "true").await.unwrap();

        let keys: Vec<String> = store
            .get_prefix("devices/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["devices/a", "devices/b"]);
    }

    #[tokio::test]
    async fn test_create_revision_survives_overwrite() {
        let store = MemoryStore::new();
        store.put("cq/a", "1").await.unwrap();
        store.put("cq/b", "1").await.unwrap();
        store.put("cq/a", "2").await.unwrap();

        let a = store.get("cq/a").await.unwrap().unwrap();
        let b = store.get("cq/b").await.unwrap().unwrap();
        assert!(a.create_revision < b.create_revision);
        assert!(a.mod_revision > b.mod_revision);
        assert_eq!(a.value, "2");
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        assert!(store
            .compare_and_swap("homes/x", None, "false", None)
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap("homes/x", None, "true", None)
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap("homes/x", Some("true"), "false", None)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("homes/x", Some("false"), "true", None)
            .await
            .unwrap());
        assert_eq!(store.get("homes/x").await.unwrap().unwrap().value, "true");
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryStore::new();
        store.put("cq/aa/1", "x").await.unwrap();
        store.put("cq/aa/2", "x").await.unwrap();
        store.put("cq/bb/1", "x").await.unwrap();
        assert_eq!(store.delete_prefix("cq/aa").await.unwrap(), 2);
        assert_eq!(store.get_prefix("cq/").await.unwrap().len(), 1);
        assert_eq!(store.delete("cq/missing").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_drops_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant(Duration::from_secs(10)).await.unwrap();
        store
            .put_with_lease("alive/home/aa", "person", lease)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        store.keep_alive(lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("alive/home/aa").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.get("alive/home/aa").await.unwrap().is_none());
        assert!(store.leases().await.unwrap().is_empty());
        assert!(matches!(
            store.keep_alive(lease).await,
            Err(StoreError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_for_key() {
        let store = MemoryStore::new();
        let first = store.grant(Duration::from_secs(30)).await.unwrap();
        let second = store.grant(Duration::from_secs(30)).await.unwrap();
        store.put_with_lease("alive/h/a", "device", first).await.unwrap();
        store.put_with_lease("alive/h/b", "person", second).await.unwrap();

        let found = store.lease_for_key("alive/h/b").await.unwrap().unwrap();
        assert_eq!(found.id, second);
        assert_eq!(found.keys, vec!["alive/h/b".to_string()]);
        assert!(store.lease_for_key("alive/h/c").await.unwrap().is_none());

        store.revoke(second).await.unwrap();
        assert!(store.get("alive/h/b").await.unwrap().is_none());
        assert!(store.get("alive/h/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put_with_lease("alive/h/a", "device", LeaseId(99)).await,
            Err(StoreError::LeaseNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_skips_leased_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = MemoryStore::with_snapshot(&path).await.unwrap();
            store.put("devices/aa", "{}").await.unwrap();
            let lease = store.grant(Duration::from_secs(30)).await.unwrap();
            store
                .put_with_lease("alive/h/aa", "person", lease)
                .await
                .unwrap();
            store.put("homes/h", "false").await.unwrap();
        }

        let reopened = MemoryStore::with_snapshot(&path).await.unwrap();
        assert!(reopened.get("devices/aa").await.unwrap().is_some());
        assert!(reopened.get("homes/h").await.unwrap().is_some());
        assert!(reopened.get("alive/h/aa").await.unwrap().is_none());

        // Revisions keep increasing after a reload
        let before = reopened.get("homes/h").await.unwrap().unwrap().mod_revision;
        reopened.put("homes/h", "true").await.unwrap();
        let after = reopened.get("homes/h").await.unwrap().unwrap().mod_revision;
        assert!(after > before);
    }
}

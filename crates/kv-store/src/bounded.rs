//! Deadline decorator for any store

use crate::error::StoreError;
use crate::store::KvStore;
use crate::types::{KeyValue, LeaseId, LeaseStatus};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default per-call deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a store so every call fails with [`StoreError::Timeout`] after a fixed deadline
///
/// The deadline only stops waiting. A write that times out may still have
/// been applied by the inner store, so a caller retrying it must tolerate
/// the write having already landed.
pub struct Bounded {
    inner: Arc<dyn KvStore>,
    deadline: Duration,
}

impl Bounded {
    /// Wrap `inner` with the given per-call deadline
    pub fn new(inner: Arc<dyn KvStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Store {} exceeded {:?}", op, self.deadline);
                Err(StoreError::Timeout(op))
            }
        }
    }
}

#[async_trait]
impl KvStore for Bounded {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        self.run("get", self.inner.get(key)).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        self.run("get_prefix", self.inner.get_prefix(prefix)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.run("put", self.inner.put(key, value)).await
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        self.run("put_with_lease", self.inner.put_with_lease(key, value, lease))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        lease: Option<LeaseId>,
    ) -> Result<bool, StoreError> {
        self.run(
            "compare_and_swap",
            self.inner.compare_and_swap(key, expected, value, lease),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.run("delete", self.inner.delete(key)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.run("delete_prefix", self.inner.delete_prefix(prefix)).await
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        self.run("grant", self.inner.grant(ttl)).await
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.run("keep_alive", self.inner.keep_alive(lease)).await
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.run("revoke", self.inner.revoke(lease)).await
    }

    async fn leases(&self) -> Result<Vec<LeaseId>, StoreError> {
        self.run("leases", self.inner.leases()).await
    }

    async fn time_to_live(&self, lease: LeaseId) -> Result<Option<LeaseStatus>, StoreError> {
        self.run("time_to_live", self.inner.time_to_live(lease)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    /// A store whose reads never complete and whose deletes apply, then hang
    #[derive(Default)]
    struct Stalled {
        deleted: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KvStore for Stalled {
        async fn get(&self, _key: &str) -> Result<Option<KeyValue>, StoreError> {
            std::future::pending().await
        }
        async fn get_prefix(&self, _prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
            std::future::pending().await
        }
        async fn put(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn put_with_lease(&self, _: &str, _: &str, _: LeaseId) -> Result<(), StoreError> {
            Ok(())
        }
        async fn compare_and_swap(
            &self,
            _: &str,
            _: Option<&str>,
            _: &str,
            _: Option<LeaseId>,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn delete(&self, key: &str) -> Result<u64, StoreError> {
            if let Ok(mut deleted) = self.deleted.lock() {
                deleted.push(key.to_string());
            }
            std::future::pending().await
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn grant(&self, _ttl: Duration) -> Result<LeaseId, StoreError> {
            Ok(LeaseId(1))
        }
        async fn keep_alive(&self, _lease: LeaseId) -> Result<(), StoreError> {
            Ok(())
        }
        async fn revoke(&self, _lease: LeaseId) -> Result<(), StoreError> {
            Ok(())
        }
        async fn leases(&self) -> Result<Vec<LeaseId>, StoreError> {
            Ok(Vec::new())
        }
        async fn time_to_live(&self, _lease: LeaseId) -> Result<Option<LeaseStatus>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let store = Bounded::new(Arc::new(Stalled::default()), Duration::from_secs(2));
        assert!(matches!(
            store.get("devices/a").await,
            Err(StoreError::Timeout("get"))
        ));
        assert!(store.put("devices/a", "x").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_may_have_landed() {
        let inner = Arc::new(Stalled::default());
        let store = Bounded::new(inner.clone(), Duration::from_secs(2));
        assert!(matches!(
            store.delete("cq/tv/office").await,
            Err(StoreError::Timeout("delete"))
        ));
        assert_eq!(*inner.deleted.lock().unwrap(), vec!["cq/tv/office".to_string()]);
    }

    #[tokio::test]
    async fn test_passes_through() {
        let store = Bounded::new(Arc::new(MemoryStore::new()), DEFAULT_TIMEOUT);
        store.put("homes/a", "true").await.unwrap();
        assert_eq!(store.get("homes/a").await.unwrap().unwrap().value, "true");
    }
}

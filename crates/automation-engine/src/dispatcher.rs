//! Automation dispatcher: the single path to the assistant and notifier

use crate::model::PowerState;
use async_trait::async_trait;
use kv_store::KvStore;
use presence_core::{keys, Assistant, Device, Notifier, ServiceError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Forwards commands and notifications to the collaborators
///
/// Every call is bounded by the configured deadline; a timeout is reported as
/// a plain failure.
pub struct Dispatcher {
    assistant: Arc<dyn Assistant>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn KvStore>,
    timeout: Duration,
    suppress_repeats: bool,
}

impl Dispatcher {
    pub fn new(
        assistant: Arc<dyn Assistant>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KvStore>,
        timeout: Duration,
        suppress_repeats: bool,
    ) -> Self {
        Self {
            assistant,
            notifier,
            store,
            timeout,
            suppress_repeats,
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>> + Send,
    ) -> Result<T, ServiceError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(ServiceError::Timeout(self.timeout)))
    }

    /// Run an assistant command
    pub async fn call(&self, command: &str) -> Result<String, ServiceError> {
        tracing::debug!("Calling assistant: {}", command);
        self.bounded(self.assistant.call(command)).await
    }

    /// Ask the assistant whether a device is on
    ///
    /// Devices without a status command report [`PowerState::Unknown`].
    pub async fn power_state(&self, device: &Device) -> Result<PowerState, ServiceError> {
        match device.status_command.as_deref().filter(|c| !c.is_empty()) {
            Some(command) => Ok(PowerState::from_answer(&self.call(command).await?)),
            None => Ok(PowerState::Unknown),
        }
    }

    /// Whether this message equals the last one sent; records it otherwise
    async fn is_repeat(&self, fingerprint: &str) -> bool {
        match self.store.get(keys::LAST_NOTIFICATION).await {
            Ok(Some(kv)) if kv.value == fingerprint => true,
            Ok(_) => {
                if let Err(e) = self.store.put(keys::LAST_NOTIFICATION, fingerprint).await {
                    tracing::warn!("Failed to record last notification: {}", e);
                }
                false
            }
            Err(e) => {
                tracing::warn!("Failed to read last notification: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn send(&self, title: &str, body: &str, topic: &str) -> Result<(), ServiceError> {
        if self.suppress_repeats {
            let fingerprint = format!("{}\n{}\n{}", topic, title, body);
            if self.is_repeat(&fingerprint).await {
                tracing::debug!("Suppressed repeated notification '{}'", title);
                return Ok(());
            }
        }
        tracing::debug!("Notify [{}] {}: {}", topic, title, body);
        self.bounded(self.notifier.send(title, body, topic)).await
    }
}

//! HTTP-backed collaborators
//!
//! The assistant relay and the push notifier each come in a live flavour and
//! a debug flavour that only logs. The flavour is picked once at startup.

use crate::config::Config;
use async_trait::async_trait;
use presence_core::{Assistant, Notifier, ServiceError, VendorLookup};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct RelayRequest<'a> {
    user: &'a str,
    command: &'a str,
    converse: bool,
}

#[derive(Deserialize)]
struct RelayResponse {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct PushMessage<'a> {
    title: &'a str,
    body: &'a str,
    image: &'a str,
}

fn transport(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

/// Voice-assistant relay
pub enum AssistantBackend {
    Live {
        client: reqwest::Client,
        url: String,
        user: String,
    },
    /// Logs the command and echoes it back
    Debug,
}

impl AssistantBackend {
    /// Debug mode, or a missing relay URL or user, selects the debug flavour
    #[must_use]
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        match (&config.assistant.url, &config.assistant.user) {
            (Some(url), Some(user)) if !config.debug && !url.is_empty() && !user.is_empty() => {
                AssistantBackend::Live {
                    client,
                    url: url.trim_end_matches('/').to_string(),
                    user: user.clone(),
                }
            }
            _ => AssistantBackend::Debug,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, AssistantBackend::Live { .. })
    }
}

#[async_trait]
impl Assistant for AssistantBackend {
    async fn call(&self, command: &str) -> Result<String, ServiceError> {
        match self {
            AssistantBackend::Live { client, url, user } => {
                let response = client
                    .post(format!("{}/assistant", url))
                    .json(&RelayRequest {
                        user,
                        command,
                        converse: false,
                    })
                    .send()
                    .await
                    .map_err(transport)?;

                if !response.status().is_success() {
                    return Err(ServiceError::Rejected(format!(
                        "relay answered {} to '{}'",
                        response.status(),
                        command
                    )));
                }

                let answer: RelayResponse = response.json().await.map_err(transport)?;
                tracing::debug!("Assistant answered '{}' to '{}'", answer.response, command);
                Ok(answer.response)
            }
            AssistantBackend::Debug => {
                tracing::info!("Assistant command: {}", command);
                Ok(command.to_string())
            }
        }
    }
}

/// Push notifications, one topic per home
pub enum NotifierBackend {
    Live { client: reqwest::Client, url: String },
    /// Logs the notification
    Debug,
}

impl NotifierBackend {
    /// Debug mode or a missing FCM URL selects the debug flavour
    #[must_use]
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        match &config.notifications.fcm_url {
            Some(url) if !config.debug && !url.is_empty() => NotifierBackend::Live {
                client,
                url: url.clone(),
            },
            _ => NotifierBackend::Debug,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, NotifierBackend::Live { .. })
    }
}

#[async_trait]
impl Notifier for NotifierBackend {
    async fn send(&self, title: &str, body: &str, topic: &str) -> Result<(), ServiceError> {
        tracing::info!("Notification: {} , {}", title, body);
        match self {
            NotifierBackend::Live { client, url } => {
                let response = client
                    .post(format!("{}{}", url, topic))
                    .json(&PushMessage {
                        title,
                        body,
                        image: "",
                    })
                    .send()
                    .await
                    .map_err(transport)?;

                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(ServiceError::Rejected(format!(
                        "push service answered {}",
                        response.status()
                    )))
                }
            }
            NotifierBackend::Debug => Ok(()),
        }
    }
}

/// MAC vendor database client
pub struct MacVendors {
    client: reqwest::Client,
    url: String,
}

impl MacVendors {
    #[must_use]
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VendorLookup for MacVendors {
    async fn lookup(&self, mac: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .get(format!("{}/{}", self.url, mac))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited(mac.to_string()));
        }
        if !status.is_success() {
            return Err(ServiceError::Rejected(format!(
                "vendor lookup for {} answered {}",
                mac, status
            )));
        }

        let vendor = response.text().await.map_err(transport)?;
        Ok(vendor.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_forces_debug_backends() {
        let mut config = Config::default();
        config.assistant.url = Some("http://relay".to_string());
        config.assistant.user = Some("beau".to_string());
        config.notifications.fcm_url = Some("http://fcm/topics/".to_string());

        let client = reqwest::Client::new();
        assert!(AssistantBackend::from_config(&config, client.clone()).is_live());
        assert!(NotifierBackend::from_config(&config, client.clone()).is_live());

        config.debug = true;
        assert!(!AssistantBackend::from_config(&config, client.clone()).is_live());
        assert!(!NotifierBackend::from_config(&config, client).is_live());
    }

    #[test]
    fn test_missing_endpoint_selects_debug() {
        let mut config = Config::default();
        config.assistant.url = Some("http://relay".to_string());
        let client = reqwest::Client::new();
        assert!(!AssistantBackend::from_config(&config, client.clone()).is_live());
        assert!(!NotifierBackend::from_config(&config, client).is_live());
    }

    #[tokio::test]
    async fn test_debug_assistant_echoes_command() {
        let assistant = AssistantBackend::Debug;
        assert_eq!(assistant.call("turn TV off").await.unwrap(), "turn TV off");
        assert!(NotifierBackend::Debug.send("t", "b", "home").await.is_ok());
    }
}

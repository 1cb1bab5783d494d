//! Observations reported by scanning agents

use crate::device::Metadata;
use serde::{Deserialize, Serialize};

/// A network sighting: one address found reachable by an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sighting {
    pub ip: String,
    /// Hardware address; empty when the agent could not resolve one
    #[serde(default)]
    pub mac: String,
    /// Vendor name, when the agent already knows it
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Latency or signal distance reported by the agent
    #[serde(default)]
    pub distance: f32,
    /// When the agent made the observation (unix seconds)
    #[serde(default)]
    pub observed_at: Option<i64>,
}

/// A BLE sighting of a pre-registered beacon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleSighting {
    pub id: String,
    #[serde(default)]
    pub distance: f32,
}

/// Out-of-band metadata attached to every agent call
#[derive(Debug, Clone, Default)]
pub struct CallerMetadata {
    pub home: Option<String>,
    pub api_key: Option<String>,
    pub client: Option<String>,
    pub agent_type: Option<String>,
}

impl CallerMetadata {
    /// Home the sighting is attributed to
    #[must_use]
    pub fn home_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.home
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(default)
    }

    /// Agent type, `network` when unspecified
    #[must_use]
    pub fn agent_type(&self) -> &str {
        self.agent_type.as_deref().unwrap_or("network")
    }

    /// Metadata recorded on network devices
    #[must_use]
    pub fn device_metadata(&self) -> Vec<Metadata> {
        vec![Metadata::new("type", self.agent_type())]
    }

    /// Every non-secret header, as recorded on BLE devices
    #[must_use]
    pub fn labels(&self) -> Vec<Metadata> {
        let mut labels = Vec::new();
        if let Some(home) = &self.home {
            labels.push(Metadata::new("home", home));
        }
        if let Some(client) = &self.client {
            labels.push(Metadata::new("client", client));
        }
        labels.push(Metadata::new("type", self.agent_type()));
        labels
    }
}

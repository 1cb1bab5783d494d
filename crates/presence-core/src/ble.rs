//! Pre-registered BLE presence targets

use crate::codec::{decode, encode};
use crate::device::Metadata;
use crate::error::PresenceError;
use crate::keys;
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An action scheduled when a BLE device is detected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Slot id; at most one pending entry exists per (device, slot)
    pub id: String,
    pub timeout_seconds: u64,
    pub command: String,
}

/// A BLE-only presence target with a fixed action list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BleDevice {
    pub id: String,
    pub name: String,
    pub home: String,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub distance: f32,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
}

impl BleDevice {
    /// Add each label whose key is not present yet
    pub fn merge_labels(&mut self, labels: Vec<Metadata>) {
        for label in labels {
            if !self.metadata.iter().any(|m| m.key == label.key) {
                self.metadata.push(label);
            }
        }
    }
}

/// Store-backed directory of BLE devices under `bles/`
#[derive(Clone)]
pub struct BleDirectory {
    store: Arc<dyn KvStore>,
}

impl BleDirectory {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<BleDevice>, PresenceError> {
        match self.store.get(&keys::ble(id)).await? {
            Some(kv) => Ok(Some(decode(&kv)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, device: &BleDevice) -> Result<(), PresenceError> {
        self.store
            .put(&keys::ble(&device.id), &encode(device)?)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<BleDevice>, PresenceError> {
        self.store
            .get_prefix(keys::BLES)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, PresenceError> {
        Ok(self.store.delete(&keys::ble(id)).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryStore;

    #[test]
    fn test_labels_are_added_once() {
        let mut ble = BleDevice {
            id: "watch1".to_string(),
            metadata: vec![Metadata::new("type", "ble")],
            ..BleDevice::default()
        };
        ble.merge_labels(vec![
            Metadata::new("type", "network"),
            Metadata::new("client", "pi-kitchen"),
        ]);
        assert_eq!(
            ble.metadata,
            vec![
                Metadata::new("type", "ble"),
                Metadata::new("client", "pi-kitchen")
            ]
        );
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let directory = BleDirectory::new(Arc::new(MemoryStore::new()));
        assert!(directory.get("watch1").await.unwrap().is_none());

        directory
            .put(&BleDevice {
                id: "watch1".to_string(),
                name: "Watch".to_string(),
                home: "office".to_string(),
                commands: vec![Command {
                    id: "lights".to_string(),
                    timeout_seconds: 60,
                    command: "turn lights on".to_string(),
                }],
                ..BleDevice::default()
            })
            .await
            .unwrap();

        let stored = directory.get("watch1").await.unwrap().unwrap();
        assert_eq!(stored.commands.len(), 1);
        assert_eq!(directory.list().await.unwrap().len(), 1);
        assert!(directory.delete("watch1").await.unwrap());
    }
}

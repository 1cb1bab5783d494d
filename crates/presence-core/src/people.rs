//! Named groups of devices that count toward occupancy as one person

use crate::codec::{decode, encode};
use crate::error::PresenceError;
use crate::keys;
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A person and the device identities that belong to them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub device_ids: Vec<String>,
}

/// Where a person currently is, derived from live leases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonStatus {
    pub name: String,
    pub device_ids: Vec<String>,
    /// Home of the first live device, if any
    pub home: Option<String>,
    pub away: bool,
}

/// Store-backed registry under `people/`
#[derive(Clone)]
pub struct PeopleRegistry {
    store: Arc<dyn KvStore>,
}

impl PeopleRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<Person>, PresenceError> {
        self.store
            .get_prefix(keys::PEOPLE)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    /// Create or replace a person
    pub async fn upsert(&self, person: &Person) -> Result<(), PresenceError> {
        if person.name.trim().is_empty() {
            return Err(PresenceError::Invalid("person name is empty".to_string()));
        }
        self.store
            .put(&keys::person(&person.name), &encode(person)?)
            .await?;
        tracing::info!("Saved person {} ({} devices)", person.name, person.device_ids.len());
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, PresenceError> {
        Ok(self.store.delete(&keys::person(name)).await? > 0)
    }

    /// Whether a device identity belongs to any person
    pub async fn is_member(&self, device_id: &str) -> Result<bool, PresenceError> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|p| p.device_ids.iter().any(|d| d == device_id)))
    }

    /// Every person with their current whereabouts
    pub async fn list_status(&self) -> Result<Vec<PersonStatus>, PresenceError> {
        let alive = self.store.get_prefix(keys::ALIVE).await?;
        let live: Vec<(&str, &str)> = alive
            .iter()
            .filter_map(|kv| keys::parse_alive(&kv.key))
            .collect();

        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|person| {
                let home = live
                    .iter()
                    .find(|(_, mac)| person.device_ids.iter().any(|d| d == mac))
                    .map(|(home, _)| (*home).to_string());
                PersonStatus {
                    away: home.is_none(),
                    name: person.name,
                    device_ids: person.device_ids,
                    home,
                }
            })
            .collect())
    }
}

//! Device registry: merges network sightings into per-device records

use crate::clock::Clock;
use crate::codec::{decode, encode};
use crate::config::PresenceConfig;
use crate::device::{derive_name, identity_key, is_hardware_address, Device, NetworkId};
use crate::error::{PresenceError, ServiceError};
use crate::keys;
use crate::lease::{LeaseManager, LeaseRole};
use crate::observer::{Observation, Observer};
use crate::people::PeopleRegistry;
use crate::services::{Notifier, VendorLookup};
use crate::sighting::{CallerMetadata, Sighting};
use kv_store::KvStore;
use std::sync::Arc;

/// How a sighting was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestKind {
    /// A new record was written
    Created,
    /// An existing record was merged
    Merged {
        /// Whether the merged record was written back
        persisted: bool,
        /// Previous home when the device moved
        moved_from: Option<String>,
    },
    /// The sighting was older than the stored record and was ignored
    Stale,
}

/// Result of [`DeviceRegistry::ingest`]
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub key: String,
    pub home: String,
    pub role: LeaseRole,
    pub kind: IngestKind,
    /// The record as known after the merge
    pub device: Device,
}

/// Merges sightings into the `devices/` records
pub struct DeviceRegistry {
    store: Arc<dyn KvStore>,
    leases: LeaseManager,
    people: PeopleRegistry,
    vendors: Arc<dyn VendorLookup>,
    notifier: Arc<dyn Notifier>,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
}

impl DeviceRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KvStore>,
        leases: LeaseManager,
        people: PeopleRegistry,
        vendors: Arc<dyn VendorLookup>,
        notifier: Arc<dyn Notifier>,
        observer: Arc<dyn Observer>,
        clock: Arc<dyn Clock>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            store,
            leases,
            people,
            vendors,
            notifier,
            observer,
            clock,
            config,
        }
    }

    /// Apply one network sighting
    ///
    /// The entity's liveness lease is granted or renewed before the record is
    /// created or merged. Store failures abort the call; collaborator failures
    /// are logged and do not.
    pub async fn ingest(
        &self,
        sighting: &Sighting,
        caller: &CallerMetadata,
    ) -> Result<IngestOutcome, PresenceError> {
        let home = caller.home_or(&self.config.default_home).to_string();
        let key = identity_key(&home, sighting);
        let now = self.clock.now_unix();

        let stored = self.get(&key).await?;

        if let (Some(device), Some(observed_at)) = (&stored, sighting.observed_at) {
            if observed_at < device.last_seen {
                tracing::debug!(
                    "Ignoring stale sighting of {} ({} < {})",
                    key,
                    observed_at,
                    device.last_seen
                );
                return Ok(IngestOutcome {
                    role: role_of(device.is_person),
                    key,
                    home,
                    kind: IngestKind::Stale,
                    device: device.clone(),
                });
            }
        }

        let is_person = stored
            .as_ref()
            .map_or(self.config.new_device_is_person, |d| d.is_person)
            || self.people.is_member(&key).await?;
        let role = role_of(is_person);
        self.leases
            .grant_or_renew(&home, &key, role, self.config.lease_ttl())
            .await?;

        let (device, kind) = match stored {
            None => (self.create(sighting, caller, &home, &key, now).await?, IngestKind::Created),
            Some(mut device) => {
                let merge = device.merge_sighting(
                    &with_identity(sighting, &key),
                    &home,
                    now,
                    caller.device_metadata(),
                );
                if let Some(previous) = &merge.moved_from {
                    tracing::info!("{} moved from {} to {}", device.name, previous, home);
                    self.notify(&home, &format!("{} has moved to {}", device.name, home), &home)
                        .await;
                }
                if merge.persist {
                    self.write(&device).await?;
                } else {
                    tracing::debug!("Merged {} without write-back", key);
                }
                (
                    device,
                    IngestKind::Merged {
                        persisted: merge.persist,
                        moved_from: merge.moved_from,
                    },
                )
            }
        };

        self.observer.observe(Observation {
            id: key.clone(),
            name: device.name.clone(),
            home: home.clone(),
            agent: caller.agent_type().to_string(),
            distance: sighting.distance,
            seen_at: now,
        });

        Ok(IngestOutcome {
            key,
            home,
            role,
            kind,
            device,
        })
    }

    async fn create(
        &self,
        sighting: &Sighting,
        caller: &CallerMetadata,
        home: &str,
        key: &str,
        now: i64,
    ) -> Result<Device, PresenceError> {
        let name = derive_name(sighting, key);
        let manufacturer = self.resolve_vendor(sighting, &name).await;

        let device = Device {
            id: NetworkId {
                ip: sighting.ip.clone(),
                mac: key.to_string(),
                uuid: key.to_string(),
            },
            home: home.to_string(),
            last_seen: now,
            away: false,
            name,
            is_person: self.config.new_device_is_person,
            manufacturer,
            hostnames: sighting.hostnames.clone(),
            presence_aware: false,
            latency: sighting.distance,
            status_command: None,
            metadata: caller.device_metadata(),
        };
        self.write(&device).await?;

        tracing::info!("New device {} ({}) in {}", device.name, key, home);
        self.notify(
            &format!("New Device in {} ({})", home, sighting.ip),
            &format!("{} ({})", device.name, device.manufacturer),
            home,
        )
        .await;
        Ok(device)
    }

    async fn resolve_vendor(&self, sighting: &Sighting, name: &str) -> String {
        if let Some(hint) = sighting.vendor.as_deref().filter(|v| !v.is_empty()) {
            return hint.to_string();
        }
        let mac = sighting.mac.trim();
        if !is_hardware_address(mac) {
            return "unknown".to_string();
        }
        let timeout = self.config.call_timeout();
        let result = match tokio::time::timeout(timeout, self.vendors.lookup(mac)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(timeout)),
        };
        match result {
            Ok(vendor) if !vendor.is_empty() => vendor,
            Ok(_) => "unknown".to_string(),
            Err(e) => {
                tracing::warn!("Vendor lookup for {} failed: {}", mac, e);
                name.to_string()
            }
        }
    }

    async fn notify(&self, title: &str, body: &str, topic: &str) {
        if let Err(e) = self.notifier.send(title, body, topic).await {
            tracing::warn!("Notification '{}' failed: {}", title, e);
        }
    }

    async fn write(&self, device: &Device) -> Result<(), PresenceError> {
        self.store
            .put(&keys::device(device.key()), &encode(device)?)
            .await?;
        Ok(())
    }

    /// Read one record
    pub async fn get(&self, id: &str) -> Result<Option<Device>, PresenceError> {
        match self.store.get(&keys::device(id)).await? {
            Some(kv) => Ok(Some(decode(&kv)?)),
            None => Ok(None),
        }
    }

    /// Every record in key order, with `away` recomputed from live leases
    pub async fn list(&self) -> Result<Vec<Device>, PresenceError> {
        let live = self.leases.live_keys().await?;
        let mut devices: Vec<Device> = self
            .store
            .get_prefix(keys::DEVICES)
            .await?
            .iter()
            .map(decode)
            .collect::<Result<_, _>>()?;
        for device in &mut devices {
            device.away = !live.contains(&keys::alive(&device.home, device.key()));
        }
        Ok(devices)
    }

    /// Presence-aware devices of a home, in key order
    pub async fn presence_aware_in(&self, home: &str) -> Result<Vec<Device>, PresenceError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|d| d.home == home && d.presence_aware)
            .collect())
    }

    /// Every home that owns at least one device
    pub async fn homes(&self) -> Result<Vec<String>, PresenceError> {
        let mut homes: Vec<String> = self.list().await?.into_iter().map(|d| d.home).collect();
        homes.sort();
        homes.dedup();
        Ok(homes)
    }

    /// Replace a record
    pub async fn update(&self, id: &str, mut device: Device) -> Result<Device, PresenceError> {
        if self.get(id).await?.is_none() {
            return Err(PresenceError::NotFound(format!("device {}", id)));
        }
        if device.id.uuid.is_empty() {
            device.id.uuid = id.to_string();
        } else if device.id.uuid != id {
            return Err(PresenceError::Invalid(format!(
                "device id {} does not match {}",
                device.id.uuid, id
            )));
        }
        self.write(&device).await?;
        tracing::info!("Updated device {}", id);
        Ok(device)
    }

    /// Delete a record and drop its liveness lease
    pub async fn delete(&self, id: &str) -> Result<Device, PresenceError> {
        let device = self
            .get(id)
            .await?
            .ok_or_else(|| PresenceError::NotFound(format!("device {}", id)))?;
        self.leases.revoke(&device.home, id).await?;
        self.store.delete(&keys::device(id)).await?;
        tracing::info!("Deleted device {} from {}", id, device.home);
        Ok(device)
    }
}

/// The sighting as merged: an IP-only sighting carries its synthesized key as mac
fn with_identity(sighting: &Sighting, key: &str) -> Sighting {
    let mut sighting = sighting.clone();
    if sighting.mac.trim().is_empty() {
        sighting.mac = key.to_string();
    }
    sighting
}

fn role_of(is_person: bool) -> LeaseRole {
    if is_person {
        LeaseRole::Person
    } else {
        LeaseRole::Device
    }
}

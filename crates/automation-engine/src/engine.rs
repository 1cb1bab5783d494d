//! Core presence engine
//!
//! Wires the registry, lease manager, timed command queue and dispatcher
//! together and exposes the sighting pipeline plus the administrative
//! operations used by the API.

use crate::ble::{BleAck, BleTracker};
use crate::dispatcher::Dispatcher;
use crate::error::AutomationError;
use crate::model::{
    CreateTimedCommandRequest, DrainReport, HomeStatus, PowerState, PresenceEvent, TimedCommand,
    ToggleOutcome,
};
use crate::occupancy::OccupancyController;
use crate::persistence;
use crate::queue::TimedCommandQueue;
use crate::scheduler::{PeriodicJob, Scheduler};
use async_trait::async_trait;
use futures::future::join_all;
use kv_store::KvStore;
use presence_core::registry::IngestKind;
use presence_core::{
    Assistant, BleDevice, BleDirectory, BleSighting, CallerMetadata, Clock, Device,
    DeviceRegistry, IngestOutcome, LeaseManager, Notifier, Observer, PeopleRegistry, Person,
    PersonStatus, PresenceConfig, Sighting, VendorLookup,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// External capabilities the engine is built on
#[derive(Clone)]
pub struct Collaborators {
    pub assistant: Arc<dyn Assistant>,
    pub notifier: Arc<dyn Notifier>,
    pub vendors: Arc<dyn VendorLookup>,
    pub observer: Arc<dyn Observer>,
    pub clock: Arc<dyn Clock>,
}

/// The main presence engine
pub struct PresenceEngine {
    config: PresenceConfig,
    leases: LeaseManager,
    people: PeopleRegistry,
    bles: BleDirectory,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<Dispatcher>,
    queue: TimedCommandQueue,
    occupancy: Arc<OccupancyController>,
    ble: BleTracker,
    /// Periodic jobs
    scheduler: Scheduler,
    /// Event broadcaster
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceEngine {
    /// Create a new engine over `store`
    pub fn new(
        store: Arc<dyn KvStore>,
        collaborators: Collaborators,
        config: PresenceConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        let dispatcher = Arc::new(Dispatcher::new(
            collaborators.assistant,
            collaborators.notifier,
            store.clone(),
            config.call_timeout(),
            config.suppress_repeat_notifications,
        ));
        let leases = LeaseManager::new(store.clone());
        let people = PeopleRegistry::new(store.clone());
        let bles = BleDirectory::new(store.clone());
        let registry = Arc::new(DeviceRegistry::new(
            store.clone(),
            leases.clone(),
            people.clone(),
            collaborators.vendors,
            dispatcher.clone(),
            collaborators.observer.clone(),
            collaborators.clock.clone(),
            config.clone(),
        ));
        let queue = TimedCommandQueue::new(
            store,
            dispatcher.clone(),
            collaborators.clock.clone(),
            config.command_queue_enabled,
            event_tx.clone(),
        );
        let occupancy = Arc::new(OccupancyController::new(
            leases.clone(),
            registry.clone(),
            queue.clone(),
            dispatcher.clone(),
            config.clone(),
            event_tx.clone(),
        ));
        let ble = BleTracker::new(
            bles.clone(),
            people.clone(),
            leases.clone(),
            queue.clone(),
            dispatcher.clone(),
            collaborators.observer,
            collaborators.clock,
            config.clone(),
        );

        Self {
            config,
            leases,
            people,
            bles,
            registry,
            dispatcher,
            queue,
            occupancy,
            ble,
            scheduler: Scheduler::new(),
            event_tx,
        }
    }

    /// Load seed files and initialise the occupancy flag of every known home
    ///
    /// Seeded BLE definitions keep the sighting state already stored for them.
    pub async fn seed(&self, data_dir: &Path) -> Result<(), AutomationError> {
        for mut device in persistence::load_ble_devices(data_dir).await? {
            if let Some(existing) = self.bles.get(&device.id).await? {
                device.last_seen = existing.last_seen;
                device.distance = existing.distance;
                device.merge_labels(existing.metadata);
            }
            self.bles.put(&device).await?;
        }
        for person in persistence::load_people(data_dir).await? {
            self.people.upsert(&person).await?;
        }

        let changes = self.occupancy.reconcile_homes().await?;
        tracing::info!("Seeded engine, {} homes reconciled", changes.len());
        Ok(())
    }

    /// Start the periodic jobs
    pub fn start(&self) -> Result<(), AutomationError> {
        self.scheduler.schedule_cron(
            Arc::new(DrainJob {
                queue: self.queue.clone(),
            }),
            &self.config.drain_schedule,
        )?;
        self.scheduler.schedule_interval(
            Arc::new(SweepJob {
                occupancy: self.occupancy.clone(),
            }),
            self.config.occupancy_sweep_seconds,
        );
        if !self.config.command_queue_enabled {
            tracing::info!("Timed command queue is disabled, drains are no-ops");
        }
        Ok(())
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Ingest one network sighting and apply any occupancy change it causes
    pub async fn report_address(
        &self,
        sighting: &Sighting,
        caller: &CallerMetadata,
    ) -> Result<IngestOutcome, AutomationError> {
        let outcome = self.registry.ingest(sighting, caller).await?;

        match &outcome.kind {
            IngestKind::Created => {
                let _ = self.event_tx.send(PresenceEvent::DeviceDiscovered {
                    id: outcome.key.clone(),
                    home: outcome.home.clone(),
                    name: outcome.device.name.clone(),
                });
            }
            IngestKind::Merged {
                moved_from: Some(from),
                ..
            } => {
                let _ = self.event_tx.send(PresenceEvent::DeviceMoved {
                    id: outcome.key.clone(),
                    from: from.clone(),
                    to: outcome.home.clone(),
                });
                self.occupancy.evaluate(from).await?;
            }
            IngestKind::Merged { .. } => {}
            IngestKind::Stale => return Ok(outcome),
        }

        self.occupancy.evaluate(&outcome.home).await?;
        Ok(outcome)
    }

    /// Ingest a batch of sightings concurrently
    ///
    /// Every item runs to completion; the first error is returned. Dropping
    /// the returned future cancels every in-flight item.
    pub async fn report_addresses(
        &self,
        sightings: &[Sighting],
        caller: &CallerMetadata,
    ) -> Result<usize, AutomationError> {
        let results = join_all(sightings.iter().map(|s| self.report_address(s, caller))).await;
        let mut applied = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => applied += 1,
                Err(e) => {
                    tracing::warn!("Sighting in batch failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }

    /// Acknowledge a BLE sighting
    pub async fn report_ble(
        &self,
        sighting: &BleSighting,
        caller: &CallerMetadata,
    ) -> Result<BleAck, AutomationError> {
        let ack = self.ble.ack(sighting, caller).await?;
        if ack.is_acknowledged() {
            if let Some(device) = self.bles.get(&sighting.id).await? {
                self.occupancy.evaluate(&device.home).await?;
            }
        }
        Ok(ack)
    }

    /// Move a home's occupancy flag directly
    pub async fn toggle_house_status(
        &self,
        home: &str,
        empty: bool,
    ) -> Result<ToggleOutcome, AutomationError> {
        self.occupancy.toggle_house_status(home, empty).await
    }

    /// Run one occupancy sweep
    pub async fn reconcile(&self) -> Result<Vec<(String, ToggleOutcome)>, AutomationError> {
        self.occupancy.reconcile_homes().await
    }

    /// Run one queue drain
    pub async fn drain(&self) -> Result<DrainReport, AutomationError> {
        self.queue.drain().await
    }

    // Devices

    pub async fn devices(&self) -> Result<Vec<Device>, AutomationError> {
        Ok(self.registry.list().await?)
    }

    pub async fn device(&self, id: &str) -> Result<Device, AutomationError> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| AutomationError::NotFound(format!("device {}", id)))
    }

    pub async fn update_device(&self, id: &str, device: Device) -> Result<Device, AutomationError> {
        Ok(self.registry.update(id, device).await?)
    }

    /// Delete a device and re-evaluate its home
    pub async fn delete_device(&self, id: &str) -> Result<Device, AutomationError> {
        let device = self.registry.delete(id).await?;
        self.occupancy.evaluate(&device.home).await?;
        Ok(device)
    }

    /// Ask the assistant whether a device is on
    pub async fn device_power(&self, id: &str) -> Result<PowerState, AutomationError> {
        let device = self.device(id).await?;
        Ok(self.dispatcher.power_state(&device).await?)
    }

    // People and homes

    pub async fn people(&self) -> Result<Vec<PersonStatus>, AutomationError> {
        Ok(self.people.list_status().await?)
    }

    pub async fn upsert_person(&self, person: Person) -> Result<Person, AutomationError> {
        self.people.upsert(&person).await?;
        Ok(person)
    }

    pub async fn delete_person(&self, name: &str) -> Result<(), AutomationError> {
        if self.people.delete(name).await? {
            Ok(())
        } else {
            Err(AutomationError::NotFound(format!("person {}", name)))
        }
    }

    pub async fn homes(&self) -> Result<Vec<HomeStatus>, AutomationError> {
        Ok(self
            .leases
            .homes()
            .await?
            .into_iter()
            .map(|(home, empty)| HomeStatus { home, empty })
            .collect())
    }

    pub async fn bles(&self) -> Result<Vec<BleDevice>, AutomationError> {
        Ok(self.bles.list().await?)
    }

    // Timed commands

    pub async fn commands(&self) -> Result<Vec<TimedCommand>, AutomationError> {
        self.queue.list().await
    }

    pub async fn create_command(
        &self,
        request: CreateTimedCommandRequest,
    ) -> Result<TimedCommand, AutomationError> {
        self.queue.create_raw(request).await
    }

    pub async fn delete_command(&self, id: &str) -> Result<(), AutomationError> {
        if self.queue.delete(id).await? {
            Ok(())
        } else {
            Err(AutomationError::NotFound(format!("timed command {}", id)))
        }
    }

    pub async fn delete_command_prefix(&self, prefix: &str) -> Result<u64, AutomationError> {
        self.queue.delete_prefix(prefix).await
    }

    pub async fn complete_command(&self, id: &str) -> Result<TimedCommand, AutomationError> {
        self.queue.complete_now(id).await
    }

    pub async fn complete_owner_commands(&self, owner: &str) -> Result<usize, AutomationError> {
        self.queue.complete_all_for_owner(owner).await
    }
}

/// Drains the timed command queue
struct DrainJob {
    queue: TimedCommandQueue,
}

#[async_trait]
impl PeriodicJob for DrainJob {
    fn name(&self) -> &str {
        "command-queue-drain"
    }

    async fn run(&self) -> Result<(), AutomationError> {
        self.queue.drain().await.map(|_| ())
    }
}

/// Recomputes occupancy for every home
struct SweepJob {
    occupancy: Arc<OccupancyController>,
}

#[async_trait]
impl PeriodicJob for SweepJob {
    fn name(&self) -> &str {
        "occupancy-sweep"
    }

    async fn run(&self) -> Result<(), AutomationError> {
        self.occupancy.reconcile_homes().await.map(|_| ())
    }
}

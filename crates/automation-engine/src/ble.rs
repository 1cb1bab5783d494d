//! BLE sighting acknowledgement with command debounce

use crate::dispatcher::Dispatcher;
use crate::error::AutomationError;
use crate::queue::TimedCommandQueue;
use presence_core::{
    BleDirectory, BleSighting, CallerMetadata, Clock, LeaseManager, LeaseRole, Notifier,
    Observation, Observer, PeopleRegistry, PresenceConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// Result of acknowledging a BLE sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleAck {
    /// The id is not registered; nothing was recorded
    Unknown,
    /// Recorded; the device has no commands
    Acknowledged,
    /// Recorded and this many commands were scheduled
    Scheduled(usize),
    /// Recorded; commands from an earlier sighting are still pending
    AlreadyPending,
}

impl BleAck {
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, BleAck::Unknown)
    }
}

/// Acknowledges BLE sightings of pre-registered devices
pub struct BleTracker {
    directory: BleDirectory,
    people: PeopleRegistry,
    leases: LeaseManager,
    queue: TimedCommandQueue,
    dispatcher: Arc<Dispatcher>,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
}

impl BleTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: BleDirectory,
        people: PeopleRegistry,
        leases: LeaseManager,
        queue: TimedCommandQueue,
        dispatcher: Arc<Dispatcher>,
        observer: Arc<dyn Observer>,
        clock: Arc<dyn Clock>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            directory,
            people,
            leases,
            queue,
            dispatcher,
            observer,
            clock,
            config,
        }
    }

    /// Record a BLE sighting and schedule the device's commands
    ///
    /// While any command of a previous sighting is still pending, nothing is
    /// rescheduled and an "already detected" notification is sent instead.
    pub async fn ack(
        &self,
        sighting: &BleSighting,
        caller: &CallerMetadata,
    ) -> Result<BleAck, AutomationError> {
        let Some(mut device) = self.directory.get(&sighting.id).await? else {
            tracing::debug!("Ignoring unregistered BLE device {}", sighting.id);
            return Ok(BleAck::Unknown);
        };

        let now = self.clock.now_unix();
        device.last_seen = now;
        device.distance = sighting.distance;
        device.merge_labels(caller.labels());
        self.directory.put(&device).await?;

        let role = if self.people.is_member(&device.id).await? {
            LeaseRole::Person
        } else {
            LeaseRole::Device
        };
        self.leases
            .grant_or_renew(
                &device.home,
                &device.id,
                role,
                Duration::from_secs(self.config.ble_time_away_seconds),
            )
            .await?;

        self.observer.observe(Observation {
            id: device.id.clone(),
            name: device.name.clone(),
            home: device.home.clone(),
            agent: caller.agent_type().to_string(),
            distance: device.distance,
            seen_at: now,
        });

        if device.commands.is_empty() {
            return Ok(BleAck::Acknowledged);
        }

        if self.queue.has_pending(&device.id).await? {
            tracing::debug!("{} still has pending commands, not rescheduling", device.id);
            if let Err(e) = self
                .dispatcher
                .send(
                    "Device already detected",
                    &format!("Device Left on {}.", device.name),
                    &device.home,
                )
                .await
            {
                tracing::warn!("Notification for {} failed: {}", device.id, e);
            }
            return Ok(BleAck::AlreadyPending);
        }

        for command in &device.commands {
            self.queue
                .create(
                    command.timeout_seconds,
                    &device.id,
                    &command.id,
                    &command.command,
                    &device.id,
                )
                .await?;
        }
        tracing::info!(
            "Scheduled {} commands for BLE device {}",
            device.commands.len(),
            device.id
        );
        Ok(BleAck::Scheduled(device.commands.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::{KvStore, MemoryStore};
    use presence_core::services::testing::{RecordingNotifier, ScriptedAssistant};
    use presence_core::{BleDevice, Command, GaugeObserver, ManualClock, Metadata};
    use tokio::sync::broadcast;

    struct Harness {
        tracker: BleTracker,
        directory: BleDirectory,
        queue: TimedCommandQueue,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        leases: LeaseManager,
    }

    fn harness() -> Harness {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(1_000));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ScriptedAssistant::new()),
            notifier.clone(),
            store.clone(),
            Duration::from_secs(5),
            false,
        ));
        let (event_tx, _) = broadcast::channel(64);
        let queue = TimedCommandQueue::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            true,
            event_tx,
        );
        let directory = BleDirectory::new(store.clone());
        let leases = LeaseManager::new(store.clone());
        Harness {
            tracker: BleTracker::new(
                directory.clone(),
                PeopleRegistry::new(store.clone()),
                leases.clone(),
                queue.clone(),
                dispatcher,
                Arc::new(GaugeObserver::new()),
                clock.clone(),
                PresenceConfig::default(),
            ),
            directory,
            queue,
            notifier,
            clock,
            leases,
        }
    }

    fn watch(commands: Vec<Command>) -> BleDevice {
        BleDevice {
            id: "watch1".to_string(),
            name: "Watch".to_string(),
            home: "office".to_string(),
            commands,
            ..BleDevice::default()
        }
    }

    fn sighting() -> BleSighting {
        BleSighting {
            id: "watch1".to_string(),
            distance: 2.5,
        }
    }

    fn caller() -> CallerMetadata {
        CallerMetadata {
            home: Some("office".to_string()),
            client: Some("pi-hall".to_string()),
            agent_type: Some("ble".to_string()),
            ..CallerMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_acknowledged() {
        let h = harness();
        let ack = h.tracker.ack(&sighting(), &caller()).await.unwrap();
        assert_eq!(ack, BleAck::Unknown);
        assert!(!ack.is_acknowledged());
        assert!(h.directory.get("watch1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_sighting_is_debounced() {
        let h = harness();
        h.directory
            .put(&watch(vec![Command {
                id: "lights".to_string(),
                timeout_seconds: 60,
                command: "turn lights on".to_string(),
            }]))
            .await
            .unwrap();

        assert_eq!(
            h.tracker.ack(&sighting(), &caller()).await.unwrap(),
            BleAck::Scheduled(1)
        );
        h.clock.advance(10);
        assert_eq!(
            h.tracker.ack(&sighting(), &caller()).await.unwrap(),
            BleAck::AlreadyPending
        );

        let entries = h.queue.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "watch1/lights");
        assert_eq!(entries[0].owner, "watch1");
        assert_eq!(entries[0].execute_at, 1_060);

        let detected = h.notifier.titled("Device already detected");
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].body, "Device Left on Watch.");
        assert_eq!(detected[0].topic, "office");
    }

    #[tokio::test]
    async fn test_sighting_updates_record_and_liveness() {
        let h = harness();
        let mut device = watch(Vec::new());
        device.metadata = vec![Metadata::new("type", "beacon")];
        h.directory.put(&device).await.unwrap();

        assert_eq!(
            h.tracker.ack(&sighting(), &caller()).await.unwrap(),
            BleAck::Acknowledged
        );

        let stored = h.directory.get("watch1").await.unwrap().unwrap();
        assert_eq!(stored.last_seen, 1_000);
        assert_eq!(stored.distance, 2.5);
        assert_eq!(
            stored.metadata,
            vec![
                Metadata::new("type", "beacon"),
                Metadata::new("home", "office"),
                Metadata::new("client", "pi-hall"),
            ]
        );
        let lease = h.leases.lease_for("office", "watch1").await.unwrap().unwrap();
        assert_eq!(lease.granted_ttl, Duration::from_secs(15));
    }
}

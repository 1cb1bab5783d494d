//! Home occupancy transitions and the shutdown schedule they drive

use crate::dispatcher::Dispatcher;
use crate::error::AutomationError;
use crate::model::{PresenceEvent, TimedCommand, ToggleOutcome};
use crate::queue::TimedCommandQueue;
use presence_core::{DeviceRegistry, LeaseManager, Notifier, PresenceConfig};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Applies occupancy changes for homes
pub struct OccupancyController {
    leases: LeaseManager,
    registry: Arc<DeviceRegistry>,
    queue: TimedCommandQueue,
    dispatcher: Arc<Dispatcher>,
    config: PresenceConfig,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl OccupancyController {
    pub fn new(
        leases: LeaseManager,
        registry: Arc<DeviceRegistry>,
        queue: TimedCommandQueue,
        dispatcher: Arc<Dispatcher>,
        config: PresenceConfig,
        event_tx: broadcast::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            leases,
            registry,
            queue,
            dispatcher,
            config,
            event_tx,
        }
    }

    /// Move a home's flag to `empty`, running the transition's side effects
    ///
    /// Safe to call repeatedly and concurrently: the flag is flipped with a
    /// conditional write, and only the caller that flips it acts. A home seen
    /// for the first time is initialised without side effects.
    pub async fn toggle_house_status(
        &self,
        home: &str,
        empty: bool,
    ) -> Result<ToggleOutcome, AutomationError> {
        let current = self.leases.occupancy_flag(home).await?;

        let Some(was_empty) = current else {
            if self.leases.swap_occupancy_flag(home, None, empty).await? {
                tracing::info!("Initialised {} as {}", home, describe(empty));
                return Ok(ToggleOutcome::Initialized);
            }
            return Ok(ToggleOutcome::Unchanged);
        };

        if was_empty == empty
            || !self
                .leases
                .swap_occupancy_flag(home, Some(was_empty), empty)
                .await?
        {
            return Ok(ToggleOutcome::Unchanged);
        }

        tracing::info!("{} is now {}", home, describe(empty));
        let _ = self.event_tx.send(PresenceEvent::HomeOccupancyChanged {
            home: home.to_string(),
            empty,
        });

        if empty {
            self.schedule_shutdown(home).await
        } else {
            self.cancel_shutdown(home).await
        }
    }

    async fn schedule_shutdown(&self, home: &str) -> Result<ToggleOutcome, AutomationError> {
        let devices = self.registry.presence_aware_in(home).await?;
        let mut scheduled = Vec::with_capacity(devices.len());

        for (index, device) in devices.iter().enumerate() {
            let timeout =
                self.config.absence_seconds + self.config.shutdown_stagger_seconds * index as u64;
            self.queue
                .create(
                    timeout,
                    device.key(),
                    home,
                    &format!("turn {} off", device.name),
                    home,
                )
                .await?;
            scheduled.push(TimedCommand::compose_id(device.key(), home));
        }

        self.notify("House Empty", &format!("No Humans in {}", home), home)
            .await;
        Ok(ToggleOutcome::Emptied { scheduled })
    }

    async fn cancel_shutdown(&self, home: &str) -> Result<ToggleOutcome, AutomationError> {
        let cancelled = self.queue.cancel_for_home(home).await?;
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending commands for {}", cancelled, home);
        }
        self.notify(home, "No longer Empty", home).await;
        Ok(ToggleOutcome::Occupied { cancelled })
    }

    async fn notify(&self, title: &str, body: &str, topic: &str) {
        if let Err(e) = self.dispatcher.send(title, body, topic).await {
            tracing::warn!("Notification '{}' failed: {}", title, e);
        }
    }

    /// Recompute one home's occupancy from its live leases and apply it
    pub async fn evaluate(&self, home: &str) -> Result<ToggleOutcome, AutomationError> {
        let empty = self.leases.is_house_empty(home).await?;
        self.toggle_house_status(home, empty).await
    }

    /// Re-evaluate every known home
    ///
    /// Lease expiry produces no sighting, so this sweep is what turns an
    /// expired person lease into an occupied-to-empty transition. A failing
    /// home is logged and skipped.
    pub async fn reconcile_homes(&self) -> Result<Vec<(String, ToggleOutcome)>, AutomationError> {
        let mut homes: Vec<String> = self
            .leases
            .homes()
            .await?
            .into_iter()
            .map(|(home, _)| home)
            .collect();
        homes.extend(self.registry.homes().await?);
        homes.sort();
        homes.dedup();

        let mut changes = Vec::new();
        for home in homes {
            match self.evaluate(&home).await {
                Ok(ToggleOutcome::Unchanged) => {}
                Ok(outcome) => changes.push((home, outcome)),
                Err(e) => tracing::error!("Failed to reconcile {}: {}", home, e),
            }
        }
        Ok(changes)
    }
}

fn describe(empty: bool) -> &'static str {
    if empty {
        "empty"
    } else {
        "occupied"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::{KvStore, MemoryStore};
    use presence_core::services::testing::{FixedVendor, RecordingNotifier, ScriptedAssistant};
    use presence_core::{
        codec, keys, Device, GaugeObserver, LeaseRole, ManualClock, NetworkId, PeopleRegistry,
    };
    use std::time::Duration;

    struct Harness {
        store: Arc<dyn KvStore>,
        controller: OccupancyController,
        queue: TimedCommandQueue,
        leases: LeaseManager,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let notifier = Arc::new(RecordingNotifier::default());
        let config = PresenceConfig {
            absence_seconds: 300,
            ..PresenceConfig::default()
        };
        let leases = LeaseManager::new(store.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ScriptedAssistant::new()),
            notifier.clone(),
            store.clone(),
            Duration::from_secs(5),
            false,
        ));
        let registry = Arc::new(DeviceRegistry::new(
            store.clone(),
            leases.clone(),
            PeopleRegistry::new(store.clone()),
            Arc::new(FixedVendor(None)),
            dispatcher.clone(),
            Arc::new(GaugeObserver::new()),
            clock.clone(),
            config.clone(),
        ));
        let (event_tx, _) = broadcast::channel(64);
        let queue = TimedCommandQueue::new(
            store.clone(),
            dispatcher.clone(),
            clock,
            true,
            event_tx.clone(),
        );
        Harness {
            controller: OccupancyController::new(
                leases.clone(),
                registry,
                queue.clone(),
                dispatcher,
                config,
                event_tx,
            ),
            store,
            queue,
            leases,
            notifier,
        }
    }

    async fn add_device(store: &Arc<dyn KvStore>, mac: &str, name: &str, aware: bool) {
        let device = Device {
            id: NetworkId {
                ip: String::new(),
                mac: mac.to_string(),
                uuid: mac.to_string(),
            },
            home: "office".to_string(),
            name: name.to_string(),
            presence_aware: aware,
            ..Device::default()
        };
        store
            .put(&keys::device(mac), &codec::encode(&device).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_staggered_shutdown() {
        let h = harness();
        add_device(&h.store, "aa:01", "TV", true).await;
        add_device(&h.store, "aa:02", "Lamp", true).await;
        add_device(&h.store, "aa:03", "Fan", true).await;
        add_device(&h.store, "aa:04", "Phone", false).await;

        h.controller.toggle_house_status("office", false).await.unwrap();
        let outcome = h.controller.toggle_house_status("office", true).await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::Emptied {
                scheduled: vec![
                    "aa:01/office".to_string(),
                    "aa:02/office".to_string(),
                    "aa:03/office".to_string()
                ]
            }
        );

        let entries = h.queue.list().await.unwrap();
        let times: Vec<i64> = entries.iter().map(|e| e.execute_at).collect();
        assert_eq!(times, vec![300, 310, 320]);
        assert_eq!(entries[0].command, "turn TV off");
        assert!(entries.iter().all(|e| e.owner == "office"));

        let empty = h.notifier.titled("House Empty");
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].body, "No Humans in office");
    }

    #[tokio::test]
    async fn test_toggle_is_idempotent() {
        let h = harness();
        add_device(&h.store, "aa:01", "TV", true).await;

        assert_eq!(
            h.controller.toggle_house_status("office", false).await.unwrap(),
            ToggleOutcome::Initialized
        );
        assert!(matches!(
            h.controller.toggle_house_status("office", true).await.unwrap(),
            ToggleOutcome::Emptied { .. }
        ));
        assert_eq!(
            h.controller.toggle_house_status("office", true).await.unwrap(),
            ToggleOutcome::Unchanged
        );

        assert_eq!(h.leases.occupancy_flag("office").await.unwrap(), Some(true));
        assert_eq!(h.queue.list().await.unwrap().len(), 1);
        assert_eq!(h.notifier.titled("House Empty").len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_act_once() {
        let h = harness();
        add_device(&h.store, "aa:01", "TV", true).await;
        h.controller.toggle_house_status("office", false).await.unwrap();

        let (a, b) = tokio::join!(
            h.controller.toggle_house_status("office", true),
            h.controller.toggle_house_status("office", true),
        );
        let acted = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| matches!(o, ToggleOutcome::Emptied { .. }))
            .count();
        assert_eq!(acted, 1);
        assert_eq!(h.notifier.titled("House Empty").len(), 1);
    }

    #[tokio::test]
    async fn test_return_cancels_shutdowns() {
        let h = harness();
        add_device(&h.store, "aa:01", "TV", true).await;
        h.queue
            .create(60, "watch1", "lights", "turn lights on", "watch1")
            .await
            .unwrap();

        h.controller.toggle_house_status("office", false).await.unwrap();
        h.controller.toggle_house_status("office", true).await.unwrap();
        let outcome = h.controller.toggle_house_status("office", false).await.unwrap();

        assert_eq!(outcome, ToggleOutcome::Occupied { cancelled: 1 });
        let remaining: Vec<String> =
            h.queue.list().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![TimedCommand::compose_id("watch1", "lights")]);
        assert_eq!(h.notifier.titled("office")[0].body, "No longer Empty");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_picks_up_expired_leases() {
        let h = harness();
        add_device(&h.store, "aa:01", "TV", true).await;
        h.leases
            .grant_or_renew("office", "phone", LeaseRole::Person, Duration::from_secs(300))
            .await
            .unwrap();

        let changes = h.controller.reconcile_homes().await.unwrap();
        assert_eq!(changes, vec![("office".to_string(), ToggleOutcome::Initialized)]);
        assert_eq!(h.leases.occupancy_flag("office").await.unwrap(), Some(false));

        tokio::time::advance(Duration::from_secs(301)).await;
        let changes = h.controller.reconcile_homes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0].1, ToggleOutcome::Emptied { .. }));
        assert!(h.controller.reconcile_homes().await.unwrap().is_empty());
    }
}

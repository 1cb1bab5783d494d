//! Durable timed command queue
//!
//! Entries live under `cq/{id}` and are drained by a periodic tick. Firing
//! deletes the entry; a failed action leaves it in place for the next tick,
//! so delivery is at least once.

use crate::dispatcher::Dispatcher;
use crate::error::AutomationError;
use crate::model::{CreateTimedCommandRequest, DrainReport, PresenceEvent, TimedCommand};
use kv_store::KvStore;
use presence_core::codec::{decode, encode};
use presence_core::{keys, Clock, Notifier};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How a command was scheduled
#[derive(Debug)]
pub enum Scheduled {
    /// Dispatched right away off the calling path
    Immediate(JoinHandle<()>),
    /// Persisted for a later drain
    Queued(TimedCommand),
}

/// The timed command queue
#[derive(Clone)]
pub struct TimedCommandQueue {
    store: Arc<dyn KvStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl TimedCommandQueue {
    pub fn new(
        store: Arc<dyn KvStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        enabled: bool,
        event_tx: broadcast::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            enabled,
            event_tx,
        }
    }

    /// Schedule `command` for `(owner_id, slot)` in `timeout_seconds`
    ///
    /// A zero timeout dispatches immediately in a background task; if that
    /// call fails the command is queued one second out instead of being lost.
    /// An existing entry for the same pair is replaced.
    pub async fn create(
        &self,
        timeout_seconds: u64,
        owner_id: &str,
        slot: &str,
        command: &str,
        owner: &str,
    ) -> Result<Scheduled, AutomationError> {
        let id = TimedCommand::compose_id(owner_id, slot);

        if timeout_seconds == 0 {
            let queue = self.clone();
            let command = command.to_string();
            let owner = owner.to_string();
            let handle = tokio::spawn(async move {
                if let Err(e) = queue.dispatcher.call(&command).await {
                    tracing::warn!("Immediate command {} failed, queueing retry: {}", id, e);
                    if let Err(e) = queue.persist(&id, &owner, &command, 1).await {
                        tracing::error!("Failed to queue retry for {}: {}", id, e);
                    }
                }
            });
            return Ok(Scheduled::Immediate(handle));
        }

        let entry = self.persist(&id, owner, command, timeout_seconds).await?;
        Ok(Scheduled::Queued(entry))
    }

    async fn persist(
        &self,
        id: &str,
        owner: &str,
        command: &str,
        timeout_seconds: u64,
    ) -> Result<TimedCommand, AutomationError> {
        let entry = TimedCommand {
            id: id.to_string(),
            owner: owner.to_string(),
            command: command.to_string(),
            execute_at: self.clock.now_unix() + timeout_seconds as i64,
            executed: false,
            sequence: 0,
        };
        self.write(&entry).await?;
        tracing::info!(
            "Scheduled '{}' as {} at {}",
            entry.command,
            entry.id,
            entry.execute_at
        );
        let _ = self.event_tx.send(PresenceEvent::CommandScheduled {
            id: entry.id.clone(),
            execute_at: entry.execute_at,
        });
        Ok(entry)
    }

    async fn write(&self, entry: &TimedCommand) -> Result<(), AutomationError> {
        self.store
            .put(&keys::command(&entry.id), &encode(entry)?)
            .await?;
        Ok(())
    }

    /// Administrative insert
    pub async fn create_raw(
        &self,
        request: CreateTimedCommandRequest,
    ) -> Result<TimedCommand, AutomationError> {
        if request.owner.trim().is_empty() || request.command.trim().is_empty() {
            return Err(AutomationError::Invalid(
                "owner and command are required".to_string(),
            ));
        }
        let id = request.id.filter(|id| !id.is_empty()).unwrap_or_else(|| {
            TimedCommand::compose_id(&request.owner, &uuid::Uuid::new_v4().to_string())
        });
        self.persist(&id, &request.owner, &request.command, request.timeout_seconds)
            .await
    }

    /// Every entry ordered by fire time, then insertion order, then id
    pub async fn list(&self) -> Result<Vec<TimedCommand>, AutomationError> {
        let mut entries = Vec::new();
        for kv in self.store.get_prefix(keys::COMMANDS).await? {
            let mut entry: TimedCommand = decode(&kv)?;
            entry.sequence = kv.create_revision;
            entries.push(entry);
        }
        entries.sort_by(|a, b| {
            (a.execute_at, a.sequence, &a.id).cmp(&(b.execute_at, b.sequence, &b.id))
        });
        Ok(entries)
    }

    /// Entries belonging to one owner, in fire order
    pub async fn list_for_owner(&self, owner: &str) -> Result<Vec<TimedCommand>, AutomationError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|e| e.owner == owner)
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<TimedCommand>, AutomationError> {
        match self.store.get(&keys::command(id)).await? {
            Some(kv) => {
                let mut entry: TimedCommand = decode(&kv)?;
                entry.sequence = kv.create_revision;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Whether an unfired entry exists for `owner`
    pub async fn has_pending(&self, owner: &str) -> Result<bool, AutomationError> {
        Ok(self
            .list_for_owner(owner)
            .await?
            .iter()
            .any(|e| !e.executed))
    }

    /// Remove one entry
    pub async fn delete(&self, id: &str) -> Result<bool, AutomationError> {
        let removed = self.store.delete(&keys::command(id)).await? > 0;
        if removed {
            tracing::info!("Deleted timed command {}", id);
        }
        Ok(removed)
    }

    /// Remove every entry whose id starts with `prefix`
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64, AutomationError> {
        let removed = self.store.delete_prefix(&keys::command(prefix)).await?;
        tracing::info!("Deleted {} timed commands under {}", removed, prefix);
        Ok(removed)
    }

    /// Remove every entry scheduled on behalf of `home`
    pub async fn cancel_for_home(&self, home: &str) -> Result<usize, AutomationError> {
        let mut cancelled = 0;
        for entry in self.list().await? {
            if entry.references_home(home) && self.delete(&entry.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Make an entry due now
    pub async fn complete_now(&self, id: &str) -> Result<TimedCommand, AutomationError> {
        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| AutomationError::NotFound(format!("timed command {}", id)))?;
        entry.execute_at = self.clock.now_unix();
        self.write(&entry).await?;
        tracing::info!("Timed command {} forced due", id);
        Ok(entry)
    }

    /// Make every entry of `owner` due in a one-second stagger
    pub async fn complete_all_for_owner(&self, owner: &str) -> Result<usize, AutomationError> {
        let now = self.clock.now_unix();
        let entries = self.list_for_owner(owner).await?;
        for (index, mut entry) in entries.iter().cloned().enumerate() {
            entry.execute_at = now + index as i64;
            self.write(&entry).await?;
        }
        tracing::info!("Forced {} timed commands of {} due", entries.len(), owner);
        Ok(entries.len())
    }

    /// Fire every due entry in order
    ///
    /// Does nothing unless the queue is enabled. A failed action is counted
    /// and left queued; it never stops later entries from firing.
    pub async fn drain(&self) -> Result<DrainReport, AutomationError> {
        let mut report = DrainReport::default();
        if !self.enabled {
            return Ok(report);
        }

        let now = self.clock.now_unix();
        for entry in self.list().await? {
            if !entry.is_due(now) {
                continue;
            }

            match self.dispatcher.call(&entry.command).await {
                Ok(_) => {
                    report.fired += 1;
                    tracing::info!("Fired timed command {}: {}", entry.id, entry.command);
                    if let Err(e) = self
                        .dispatcher
                        .send("Scheduled Task", &entry.command, "devices")
                        .await
                    {
                        tracing::warn!("Failed to announce {}: {}", entry.id, e);
                    }
                    // A failed delete means the entry fires again next tick
                    if let Err(e) = self.delete(&entry.id).await {
                        tracing::error!("Failed to remove fired command {}: {}", entry.id, e);
                    }
                    let _ = self
                        .event_tx
                        .send(PresenceEvent::CommandFired { id: entry.id });
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Timed command {} failed, keeping it: {}", entry.id, e);
                    let _ = self.event_tx.send(PresenceEvent::CommandFailed {
                        id: entry.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.fired + report.failed > 0 {
            tracing::debug!(
                "Drain finished: {} fired, {} failed",
                report.fired,
                report.failed
            );
        }
        Ok(report)
    }
}

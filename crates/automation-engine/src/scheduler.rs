//! Scheduler for the engine's periodic jobs

use crate::error::AutomationError;
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A unit of periodic work
///
/// Each job holds references to exactly the components it touches.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Name used for logging and as the timer key
    fn name(&self) -> &str;

    /// Run one tick
    async fn run(&self) -> Result<(), AutomationError>;
}

/// Owns the timer tasks driving periodic jobs
pub struct Scheduler {
    /// Active timer handles (keyed by job name)
    timers: Arc<DashMap<String, JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a new scheduler
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Stop a job's timer
    pub fn remove(&self, name: &str) {
        if let Some((_, handle)) = self.timers.remove(name) {
            handle.abort();
            tracing::debug!("Removed scheduler timer for {}", name);
        }
    }

    /// Run `job` every `seconds`, replacing any timer with the same name
    pub fn schedule_interval(&self, job: Arc<dyn PeriodicJob>, seconds: u64) {
        let name = job.name().to_string();
        self.remove(&name);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                run_job(job.as_ref()).await;
            }
        });

        self.timers.insert(name.clone(), handle);
        tracing::info!("Scheduled {} every {}s", name, seconds);
    }

    /// Run `job` on a cron expression (with seconds field)
    pub fn schedule_cron(
        &self,
        job: Arc<dyn PeriodicJob>,
        expression: &str,
    ) -> Result<(), AutomationError> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| AutomationError::InvalidCron(format!("{expression}: {e}")))?;

        let name = job.name().to_string();
        self.remove(&name);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next_time) = schedule.upcoming(Utc).next() else {
                    tracing::warn!("No upcoming times for cron schedule {}", task_name);
                    break;
                };

                let duration = (next_time - now)
                    .to_std()
                    .unwrap_or(Duration::from_millis(100));
                tokio::time::sleep(duration).await;

                run_job(job.as_ref()).await;
            }
        });

        self.timers.insert(name.clone(), handle);
        tracing::info!("Scheduled {} on cron '{}'", name, expression);
        Ok(())
    }

    /// Get the number of active timers
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

async fn run_job(job: &dyn PeriodicJob) {
    tracing::trace!("Running {}", job.name());
    if let Err(e) = job.run().await {
        tracing::error!("Periodic job {} failed: {}", job.name(), e);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Abort all timer tasks
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use playwatch_protocol::{BackupDocument, BackupListing, JobState, SyncReport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::EngineError;
use crate::jobs::{BackupJob, JobKind, JobSlots, LibrarySync};
use crate::monitor::{LocationResolver, SessionReconciler};
use crate::storage::Store;
use crate::upstream::{ItemImage, MediaServer};

/// Drives the poll loop and the calendar jobs, and is the entry point for
/// operator-triggered work. Constructed once by `main` and shared via `Arc`.
pub struct Scheduler {
    poll_interval: Duration,
    sync_schedule: Schedule,
    backup_schedule: Schedule,
    upstream: Arc<dyn MediaServer>,
    sync: LibrarySync,
    backup: BackupJob,
    slots: JobSlots,
    /// Moved into the poll task on [`Scheduler::start`].
    reconciler: Mutex<Option<SessionReconciler>>,
}

/// Background tasks spawned by [`Scheduler::start`].
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl Scheduler {
    pub fn new(
        config: &ServerConfig,
        upstream: Arc<dyn MediaServer>,
        store: Arc<dyn Store>,
        locations: Arc<dyn LocationResolver>,
    ) -> Result<Self, EngineError> {
        let sync_schedule = parse_schedule(&config.sync_schedule)?;
        let backup_schedule = parse_schedule(&config.backup_schedule)?;
        if config.poll_interval.is_zero() {
            return Err(EngineError::InvalidInput(
                "poll interval must be positive".into(),
            ));
        }
        let backup = BackupJob::new(
            store.clone(),
            config.backup_dir.clone(),
            &config.backup_prefix,
        )?;
        Ok(Self {
            poll_interval: config.poll_interval,
            sync_schedule,
            backup_schedule,
            sync: LibrarySync::new(upstream.clone(), store.clone()),
            reconciler: Mutex::new(Some(SessionReconciler::new(
                upstream.clone(),
                store,
                locations,
            ))),
            upstream,
            backup,
            slots: JobSlots::new(),
        })
    }

    /// Spawn the poll loop and both calendar triggers. Can only be called once.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle, EngineError> {
        let reconciler = self
            .reconciler
            .lock()
            .map_err(|_| EngineError::InvalidInput("scheduler state poisoned".into()))?
            .take()
            .ok_or_else(|| EngineError::InvalidInput("scheduler already started".into()))?;

        let tasks = vec![
            tokio::spawn(self.clone().poll_loop(reconciler)),
            tokio::spawn(
                self.clone()
                    .calendar_loop(JobKind::Sync, self.sync_schedule.clone()),
            ),
            tokio::spawn(
                self.clone()
                    .calendar_loop(JobKind::Backup, self.backup_schedule.clone()),
            ),
        ];
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );
        Ok(SchedulerHandle { tasks })
    }

    async fn poll_loop(self: Arc<Self>, mut reconciler: SessionReconciler) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            // Ticks never overlap: each one is awaited before the next and
            // late ticks are dropped by `MissedTickBehavior::Skip`. The permit
            // only marks the poll as running for `job_status`.
            let _running = self.slots.try_acquire(JobKind::Poll);
            match reconciler.tick().await {
                Ok(events) if !events.is_empty() => {
                    debug!(events = events.len(), tracked = reconciler.tracked().len(), "poll reconciled");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "session poll failed"),
            }
        }
    }

    async fn calendar_loop(self: Arc<Self>, kind: JobKind, schedule: Schedule) {
        let mut anchor = Utc::now();
        loop {
            let Some(next) = next_fire(&schedule, anchor) else {
                warn!(job = %kind, "schedule has no upcoming runs");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(job = %kind, next = %next.to_rfc3339(), "waiting for next scheduled run");
            tokio::time::sleep(wait).await;
            anchor = next;

            let Some(permit) = self.slots.try_acquire(kind) else {
                info!(job = %kind, "previous run still in flight, skipping scheduled run");
                continue;
            };
            match kind {
                JobKind::Sync => {
                    let _permit = permit;
                    self.sync.run().await;
                }
                JobKind::Backup => {
                    let job = self.backup.clone();
                    let written = blocking(move || {
                        let _permit = permit;
                        job.run_automatic()
                    })
                    .await;
                    if let Err(err) = written {
                        warn!(error = %err, "scheduled backup failed");
                    }
                }
                JobKind::Poll => {}
            }
        }
    }

    /// Run a library sync now. Rejected while another sync is in flight.
    pub async fn trigger_sync(&self) -> Result<SyncReport, EngineError> {
        let _permit = self
            .slots
            .try_acquire(JobKind::Sync)
            .ok_or(EngineError::ConcurrentRunRejected(JobKind::Sync))?;
        info!("manual library sync");
        Ok(self.sync.run().await)
    }

    /// Write a manual backup now. Rejected while another backup is in flight.
    ///
    /// The slot travels with the file work, so dropping this future does not
    /// free it before the artifact is written.
    pub async fn trigger_backup(&self) -> Result<String, EngineError> {
        let permit = self
            .slots
            .try_acquire(JobKind::Backup)
            .ok_or(EngineError::ConcurrentRunRejected(JobKind::Backup))?;
        let job = self.backup.clone();
        blocking(move || {
            let _permit = permit;
            job.run_manual()
        })
        .await
    }

    /// Ask the upstream to stop a session. History is left to the next poll.
    pub async fn kill_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.upstream.stop_session(session_id).await?;
        info!(session_id, "session stop requested");
        Ok(())
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupListing>, EngineError> {
        let job = self.backup.clone();
        blocking(move || job.list_automatic()).await
    }

    pub async fn delete_backup(&self, name: String) -> Result<(), EngineError> {
        let job = self.backup.clone();
        blocking(move || job.delete(&name)).await
    }

    pub async fn export_backup(&self) -> Result<BackupDocument, EngineError> {
        let job = self.backup.clone();
        blocking(move || job.export_document()).await
    }

    pub async fn fetch_item_image(&self, item_id: &str) -> Result<ItemImage, EngineError> {
        self.upstream.fetch_item_image(item_id).await
    }

    pub fn job_status(&self) -> Vec<JobState> {
        JobKind::ALL
            .iter()
            .map(|kind| JobState {
                kind: kind.to_string(),
                running: self.slots.is_running(*kind),
            })
            .collect()
    }
}

async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::store(format!("blocking task failed: {e}")))?
}

/// Whether `expression` is a cron expression the scheduler accepts
/// (seconds field first, evaluated in UTC).
pub fn schedule_is_valid(expression: &str) -> bool {
    parse_schedule(expression).is_ok()
}

fn parse_schedule(expression: &str) -> Result<Schedule, EngineError> {
    Schedule::from_str(expression)
        .map_err(|err| EngineError::InvalidInput(format!("invalid schedule {expression:?}: {err}")))
}

/// First fire time strictly after `after`.
fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

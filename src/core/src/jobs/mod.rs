//! Scheduled jobs and the per-kind run slots that keep them from overlapping.

mod backup;
mod sync;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use backup::BackupJob;
pub use sync::LibrarySync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Poll,
    Sync,
    Backup,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Poll, JobKind::Sync, JobKind::Backup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Sync => "sync",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One single-permit semaphore per job kind. Holding the permit means the
/// job is running; scheduled and manual triggers share the same slot.
#[derive(Clone)]
pub struct JobSlots {
    poll: Arc<Semaphore>,
    sync: Arc<Semaphore>,
    backup: Arc<Semaphore>,
}

impl Default for JobSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSlots {
    pub fn new() -> Self {
        Self {
            poll: Arc::new(Semaphore::new(1)),
            sync: Arc::new(Semaphore::new(1)),
            backup: Arc::new(Semaphore::new(1)),
        }
    }

    fn slot(&self, kind: JobKind) -> &Arc<Semaphore> {
        match kind {
            JobKind::Poll => &self.poll,
            JobKind::Sync => &self.sync,
            JobKind::Backup => &self.backup,
        }
    }

    /// Claim the run slot, or `None` if a run of this kind is in flight.
    pub fn try_acquire(&self, kind: JobKind) -> Option<OwnedSemaphorePermit> {
        self.slot(kind).clone().try_acquire_owned().ok()
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.slot(kind).available_permits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_run_per_kind() {
        let slots = JobSlots::new();
        let permit = slots.try_acquire(JobKind::Sync).unwrap();
        assert!(slots.is_running(JobKind::Sync));
        assert!(slots.try_acquire(JobKind::Sync).is_none());
        assert!(slots.try_acquire(JobKind::Backup).is_some());
        drop(permit);
        assert!(!slots.is_running(JobKind::Sync));
        assert!(slots.try_acquire(JobKind::Sync).is_some());
    }

    #[test]
    fn kind_labels() {
        let labels: Vec<String> = JobKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(labels, vec!["poll", "sync", "backup"]);
    }
}

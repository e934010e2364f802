use std::sync::Arc;

use playwatch_protocol::SyncReport;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::storage::{Store, UpsertOutcome};
use crate::upstream::MediaServer;

/// Mirrors upstream users and library items into the store.
///
/// Rows are matched by external id; nothing is ever deleted.
#[derive(Clone)]
pub struct LibrarySync {
    upstream: Arc<dyn MediaServer>,
    store: Arc<dyn Store>,
}

impl LibrarySync {
    pub fn new(upstream: Arc<dyn MediaServer>, store: Arc<dyn Store>) -> Self {
        Self { upstream, store }
    }

    /// Run one sync. Failures end up in the report, never as an `Err`; the
    /// counts reflect whatever was written before the failure.
    pub async fn run(&self) -> SyncReport {
        let mut report = SyncReport::default();
        match self.sync_all(&mut report).await {
            Ok(()) => {
                report.success = true;
                info!(
                    users = report.user_count,
                    media = report.media_count,
                    "library sync complete"
                );
            }
            Err(err) => {
                warn!(
                    error = %err,
                    users = report.user_count,
                    media = report.media_count,
                    "library sync failed"
                );
                report.success = false;
                report.error = Some(err.to_string());
            }
        }
        report
    }

    async fn sync_all(&self, report: &mut SyncReport) -> Result<(), EngineError> {
        let users = self.upstream.list_users().await?;
        let (changed, written) = self
            .upsert_all(users, |store, user| store.upsert_user(user))
            .await;
        report.user_count += changed;
        written?;

        let media = self.upstream.list_media().await?;
        let (changed, written) = self
            .upsert_all(media, |store, item| store.upsert_media(item))
            .await;
        report.media_count += changed;
        written
    }

    /// Write `rows` on the blocking pool. Returns the number of rows that
    /// changed, which stays meaningful when the batch stops on an error.
    async fn upsert_all<T, F>(&self, rows: Vec<T>, upsert: F) -> (usize, Result<(), EngineError>)
    where
        T: Send + 'static,
        F: Fn(&dyn Store, &T) -> Result<UpsertOutcome, String> + Send + 'static,
    {
        let store = self.store.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut changed = 0;
            for row in &rows {
                match upsert(store.as_ref(), row) {
                    Ok(outcome) if outcome.affected() => changed += 1,
                    Ok(_) => {}
                    Err(err) => return (changed, Err(EngineError::store(err))),
                }
            }
            (changed, Ok(()))
        })
        .await;
        joined.unwrap_or_else(|e| (0, Err(EngineError::store(format!("sync task failed: {e}")))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::testing::{media, user, FakeMediaServer};

    fn setup() -> (Arc<FakeMediaServer>, Arc<SqliteStore>, LibrarySync) {
        let upstream = Arc::new(FakeMediaServer::new());
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let sync = LibrarySync::new(upstream.clone(), store.clone());
        (upstream, store, sync)
    }

    #[tokio::test]
    async fn counts_only_changed_rows() {
        let (upstream, store, sync) = setup();
        *upstream.users.lock().unwrap() = Ok(vec![user("u1", "alice"), user("u2", "bob")]);
        *upstream.media.lock().unwrap() = Ok(vec![media("m1", Some(10)), media("m2", None)]);

        let first = sync.run().await;
        assert!(first.success);
        assert_eq!((first.user_count, first.media_count), (2, 2));

        let second = sync.run().await;
        assert!(second.success);
        assert_eq!((second.user_count, second.media_count), (0, 0));

        *upstream.users.lock().unwrap() = Ok(vec![user("u1", "alice"), user("u2", "robert")]);
        let third = sync.run().await;
        assert_eq!((third.user_count, third.media_count), (1, 0));
        assert_eq!(store.list_users().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn never_deletes_missing_rows() {
        let (upstream, store, sync) = setup();
        *upstream.media.lock().unwrap() = Ok(vec![media("m1", None), media("m2", None)]);
        sync.run().await;
        *upstream.media.lock().unwrap() = Ok(vec![media("m1", None)]);
        let report = sync.run().await;
        assert!(report.success);
        assert_eq!(store.list_media().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_with_partial_counts() {
        let (upstream, store, sync) = setup();
        *upstream.users.lock().unwrap() = Ok(vec![user("u1", "alice")]);
        *upstream.media.lock().unwrap() =
            Err(EngineError::UpstreamUnavailable("connection refused".into()));

        let report = sync.run().await;
        assert!(!report.success);
        assert_eq!(report.user_count, 1);
        assert_eq!(report.media_count, 0);
        assert!(report.error.unwrap().contains("connection refused"));
        assert_eq!(store.list_users().unwrap().len(), 1);
    }
}

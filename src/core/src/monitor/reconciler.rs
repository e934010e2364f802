use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use playwatch_protocol::PlayMethod;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::classify_device;
use super::location::LocationResolver;
use crate::error::EngineError;
use crate::storage::{
    HistoryFinalization, HistoryHeartbeat, MediaEntry, PlaybackHistoryRecord, Store,
};
use crate::upstream::{MediaServer, PlaybackSession};

/// In-memory state of one session between its first and last observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSession {
    pub history_id: String,
    pub media_id: String,
    pub started_at: u64,
    pub last_seen_at: u64,
    pub position_ticks: i64,
    pub runtime_ticks: Option<i64>,
    pub play_method: PlayMethod,
}

/// Lifecycle transition produced by one reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session_id: String,
        history_id: String,
    },
    Updated {
        session_id: String,
        history_id: String,
        play_method: PlayMethod,
        position_ticks: i64,
    },
    Ended {
        session_id: String,
        history_id: String,
        duration_secs: i64,
        completion_ratio: Option<f64>,
    },
}

/// Turns repeated active-session snapshots into playback history.
///
/// Each (session id, media id) pair moves `UNSEEN -> ACTIVE -> ENDED`. A
/// record ends when a *successful* poll no longer lists the session, or
/// lists it playing a different item; a failed poll changes nothing.
///
/// The tracked map lives behind a mutex only so store writes can run on the
/// blocking pool; the poll task is its sole user.
pub struct SessionReconciler {
    upstream: Arc<dyn MediaServer>,
    ledger: Arc<Mutex<Ledger>>,
}

struct Ledger {
    store: Arc<dyn Store>,
    locations: Arc<dyn LocationResolver>,
    tracked: HashMap<String, TrackedSession>,
    recovered: bool,
}

impl SessionReconciler {
    pub fn new(
        upstream: Arc<dyn MediaServer>,
        store: Arc<dyn Store>,
        locations: Arc<dyn LocationResolver>,
    ) -> Self {
        Self {
            upstream,
            ledger: Arc::new(Mutex::new(Ledger {
                store,
                locations,
                tracked: HashMap::new(),
                recovered: false,
            })),
        }
    }

    /// Snapshot of the sessions currently being tracked.
    pub fn tracked(&self) -> HashMap<String, TrackedSession> {
        self.ledger
            .lock()
            .map(|ledger| ledger.tracked.clone())
            .unwrap_or_default()
    }

    /// Poll the upstream once and reconcile the result. Store writes run on
    /// the blocking pool.
    pub async fn tick(&mut self) -> Result<Vec<SessionEvent>, EngineError> {
        let sessions = self.upstream.list_active_sessions().await?;
        let observed_at = now_unix();
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&ledger)?;
            guard.reconcile(sessions, observed_at)
        })
        .await
        .map_err(|e| EngineError::store(format!("reconcile task failed: {e}")))?
    }

    /// Apply one successful snapshot observed at `observed_at`.
    ///
    /// Per-session store failures are logged and retried next pass: a failed
    /// open leaves the id untracked, a failed finalize leaves it tracked.
    pub fn reconcile(
        &mut self,
        sessions: Vec<PlaybackSession>,
        observed_at: u64,
    ) -> Result<Vec<SessionEvent>, EngineError> {
        lock(&self.ledger)?.reconcile(sessions, observed_at)
    }
}

fn lock(ledger: &Mutex<Ledger>) -> Result<std::sync::MutexGuard<'_, Ledger>, EngineError> {
    ledger
        .lock()
        .map_err(|_| EngineError::store("session ledger poisoned"))
}

impl Ledger {
    fn reconcile(
        &mut self,
        sessions: Vec<PlaybackSession>,
        observed_at: u64,
    ) -> Result<Vec<SessionEvent>, EngineError> {
        self.recover_open_records()?;

        // Duplicate ids: the last entry in the snapshot wins.
        let mut latest: BTreeMap<String, PlaybackSession> = BTreeMap::new();
        for session in sessions {
            latest.insert(session.session_id.clone(), session);
        }

        let mut events = Vec::new();
        for session in latest.values() {
            let switched = self
                .tracked
                .get(&session.session_id)
                .map(|tracked| tracked.media_id != session.media_id);
            match switched {
                None => events.extend(self.open(session, observed_at)),
                Some(false) => events.extend(self.heartbeat(session, observed_at)),
                Some(true) => {
                    // Same session moved on to another item: the old record
                    // closes at its last sighting before the new one opens.
                    debug!(session_id = %session.session_id, media_id = %session.media_id, "session switched item");
                    if let Some(ended) = self.finalize(&session.session_id) {
                        events.push(ended);
                        events.extend(self.open(session, observed_at));
                    }
                }
            }
        }

        let mut gone: Vec<String> = self
            .tracked
            .keys()
            .filter(|id| !latest.contains_key(*id))
            .cloned()
            .collect();
        gone.sort();
        for session_id in gone {
            events.extend(self.finalize(&session_id));
        }

        Ok(events)
    }

    /// Adopt records left open by a previous process so they can be closed.
    fn recover_open_records(&mut self) -> Result<(), EngineError> {
        if self.recovered {
            return Ok(());
        }
        let open = self.store.list_open_history().map_err(EngineError::store)?;
        for rec in open {
            if self.tracked.contains_key(&rec.session_id) {
                continue;
            }
            debug!(session_id = %rec.session_id, history_id = %rec.id, "recovered open playback record");
            self.tracked.insert(
                rec.session_id.clone(),
                TrackedSession {
                    history_id: rec.id,
                    media_id: rec.media_id,
                    started_at: rec.started_at,
                    last_seen_at: rec.last_seen_at.max(rec.started_at),
                    position_ticks: rec.position_ticks,
                    runtime_ticks: rec.runtime_ticks,
                    play_method: rec.play_method,
                },
            );
        }
        self.recovered = true;
        Ok(())
    }

    fn open(&mut self, session: &PlaybackSession, observed_at: u64) -> Option<SessionEvent> {
        let catalog = self.catalog_entry(&session.media_id);
        let runtime_ticks = session
            .runtime_ticks
            .or_else(|| catalog.as_ref().and_then(|m| m.runtime_ticks));
        let media_name = if session.media_name.is_empty() {
            catalog.map(|m| m.name).unwrap_or_default()
        } else {
            session.media_name.clone()
        };

        let record = PlaybackHistoryRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
            media_id: session.media_id.clone(),
            media_name,
            client_name: session.client_name.clone(),
            device_name: session.device_name.clone(),
            device_category: classify_device(&session.client_name, &session.device_name),
            play_method: session.play_method,
            remote_address: session.remote_address.clone(),
            location: session
                .remote_address
                .as_deref()
                .and_then(|addr| self.locations.resolve(addr)),
            started_at: observed_at,
            last_seen_at: observed_at,
            ended_at: None,
            duration_secs: 0,
            position_ticks: session.position_ticks,
            runtime_ticks,
            completion_ratio: None,
        };

        let history_id = match self.store.open_history(&record) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, session_id = %session.session_id, "failed to open playback record");
                return None;
            }
        };

        // Another writer may already hold the open record for this id.
        let started_at = if history_id == record.id {
            observed_at
        } else {
            match self.store.get_history(&history_id) {
                Ok(Some(existing)) => existing.started_at.min(observed_at),
                _ => observed_at,
            }
        };

        info!(
            session_id = %session.session_id,
            history_id = %history_id,
            user = %session.user_name,
            media = %record.media_name,
            device_category = record.device_category.as_str(),
            play_method = session.play_method.as_str(),
            "playback started"
        );
        self.tracked.insert(
            session.session_id.clone(),
            TrackedSession {
                history_id: history_id.clone(),
                media_id: session.media_id.clone(),
                started_at,
                last_seen_at: observed_at,
                position_ticks: session.position_ticks,
                runtime_ticks,
                play_method: session.play_method,
            },
        );
        Some(SessionEvent::Started {
            session_id: session.session_id.clone(),
            history_id,
        })
    }

    fn heartbeat(&mut self, session: &PlaybackSession, observed_at: u64) -> Option<SessionEvent> {
        let tracked = self.tracked.get_mut(&session.session_id)?;

        let beat = HistoryHeartbeat {
            last_seen_at: observed_at.max(tracked.last_seen_at),
            position_ticks: session.position_ticks,
            runtime_ticks: session.runtime_ticks.or(tracked.runtime_ticks),
            play_method: session.play_method,
        };
        if tracked.play_method != beat.play_method {
            debug!(
                session_id = %session.session_id,
                from = tracked.play_method.as_str(),
                to = beat.play_method.as_str(),
                "play method changed"
            );
        }

        tracked.last_seen_at = beat.last_seen_at;
        tracked.position_ticks = beat.position_ticks;
        tracked.runtime_ticks = beat.runtime_ticks;
        tracked.play_method = beat.play_method;

        if let Err(err) = self.store.touch_history(&tracked.history_id, &beat) {
            warn!(error = %err, session_id = %session.session_id, "failed to update playback record");
        }

        Some(SessionEvent::Updated {
            session_id: session.session_id.clone(),
            history_id: tracked.history_id.clone(),
            play_method: beat.play_method,
            position_ticks: beat.position_ticks,
        })
    }

    fn finalize(&mut self, session_id: &str) -> Option<SessionEvent> {
        let tracked = self.tracked.get(session_id)?;

        // The previous observation is the last moment the session was seen
        // playing; "now" would add up to one poll interval.
        let ended_at = tracked.last_seen_at;
        let fin = HistoryFinalization {
            ended_at,
            duration_secs: ended_at.saturating_sub(tracked.started_at) as i64,
            position_ticks: tracked.position_ticks,
            completion_ratio: completion_ratio(tracked.position_ticks, tracked.runtime_ticks),
        };

        if let Err(err) = self.store.finalize_history(&tracked.history_id, &fin) {
            warn!(error = %err, session_id, "failed to finalize playback record");
            return None;
        }

        let tracked = self.tracked.remove(session_id)?;
        info!(
            session_id,
            history_id = %tracked.history_id,
            duration_secs = fin.duration_secs,
            "playback ended"
        );
        Some(SessionEvent::Ended {
            session_id: session_id.to_string(),
            history_id: tracked.history_id,
            duration_secs: fin.duration_secs,
            completion_ratio: fin.completion_ratio,
        })
    }

    fn catalog_entry(&self, media_id: &str) -> Option<MediaEntry> {
        match self.store.get_media(media_id) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, media_id, "catalog lookup failed");
                None
            }
        }
    }
}

/// Position over runtime, clamped to `[0, 1]`. Unknown runtime stays unknown.
pub fn completion_ratio(position_ticks: i64, runtime_ticks: Option<i64>) -> Option<f64> {
    let runtime = runtime_ticks.filter(|t| *t > 0)?;
    Some((position_ticks as f64 / runtime as f64).clamp(0.0, 1.0))
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::location::{PrefixTableResolver, UnknownLocation};
    use crate::monitor::TICKS_PER_SECOND;
    use crate::storage::{DeviceCategory, SqliteStore};
    use crate::testing::{media, session, FakeMediaServer};

    fn make(
        upstream: Arc<FakeMediaServer>,
    ) -> (SessionReconciler, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let reconciler =
            SessionReconciler::new(upstream, store.clone(), Arc::new(UnknownLocation));
        (reconciler, store)
    }

    fn ended(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Ended { session_id, .. } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_heartbeat_end_lifecycle() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));

        let events = rec.reconcile(vec![session("s1", "m1", 0)], 1_000).unwrap();
        assert!(matches!(events[0], SessionEvent::Started { .. }));
        assert_eq!(store.list_open_history().unwrap().len(), 1);

        let events = rec
            .reconcile(vec![session("s1", "m1", 250 * TICKS_PER_SECOND)], 1_015)
            .unwrap();
        assert!(matches!(events[0], SessionEvent::Updated { .. }));

        let events = rec.reconcile(vec![], 1_030).unwrap();
        assert_eq!(ended(&events), vec!["s1".to_string()]);
        assert!(rec.tracked().is_empty());

        let history = store.list_history().unwrap();
        assert_eq!(history.len(), 1);
        let row = &history[0];
        assert_eq!(row.started_at, 1_000);
        // End is the last observation, not the poll that noticed the absence.
        assert_eq!(row.ended_at, Some(1_015));
        assert_eq!(row.duration_secs, 15);
        assert_eq!(row.completion_ratio, Some(0.25));
        assert_eq!(row.device_category, DeviceCategory::Web);
    }

    #[tokio::test]
    async fn failed_poll_changes_nothing() {
        let upstream = Arc::new(FakeMediaServer::new());
        let (mut rec, store) = make(upstream.clone());
        upstream.push_poll(Ok(vec![session("s1", "m1", 10), session("s2", "m2", 20)]));
        upstream.push_poll(Err(EngineError::UpstreamUnavailable("timed out".into())));
        upstream.push_poll(Ok(vec![session("s1", "m1", 30)]));

        rec.tick().await.unwrap();
        let tracked_before = rec.tracked().clone();
        let history_before = store.list_history().unwrap();

        let err = rec.tick().await.unwrap_err();
        assert!(matches!(err, EngineError::UpstreamUnavailable(_)));
        assert_eq!(rec.tracked(), tracked_before);
        assert_eq!(store.list_history().unwrap(), history_before);

        let events = rec.tick().await.unwrap();
        assert_eq!(ended(&events), vec!["s2".to_string()]);
        assert!(rec.tracked().contains_key("s1"));
    }

    #[test]
    fn duplicate_ids_keep_last_entry() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        let mut second = session("s1", "m1", 40);
        second.play_method = PlayMethod::Transcode;
        let events = rec
            .reconcile(vec![session("s1", "m1", 10), second], 500)
            .unwrap();
        assert_eq!(events.len(), 1);
        let open = store.list_open_history().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].position_ticks, 40);
        assert_eq!(open[0].play_method, PlayMethod::Transcode);
    }

    #[test]
    fn next_item_in_same_session_starts_a_new_record() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        rec.reconcile(vec![session("s1", "ep1", 0)], 100).unwrap();
        rec.reconcile(vec![session("s1", "ep1", 900 * TICKS_PER_SECOND)], 1_000)
            .unwrap();

        let events = rec
            .reconcile(vec![session("s1", "ep2", 10 * TICKS_PER_SECOND)], 1_015)
            .unwrap();
        assert_eq!(ended(&events), vec!["s1".to_string()]);
        assert!(matches!(events.last(), Some(SessionEvent::Started { .. })));
        assert_eq!(rec.tracked()["s1"].media_id, "ep2");

        rec.reconcile(vec![session("s1", "ep2", 500 * TICKS_PER_SECOND)], 2_000)
            .unwrap();
        rec.reconcile(vec![], 2_015).unwrap();

        let mut history = store.list_history().unwrap();
        history.sort_by_key(|row| row.started_at);
        assert_eq!(history.len(), 2);
        let (first, second) = (&history[0], &history[1]);
        assert_eq!(first.media_id, "ep1");
        assert_eq!((first.started_at, first.ended_at), (100, Some(1_000)));
        assert_eq!(first.duration_secs, 900);
        assert_eq!(first.completion_ratio, Some(0.9));
        assert_eq!(second.media_id, "ep2");
        assert_eq!((second.started_at, second.ended_at), (1_015, Some(2_000)));
        assert_eq!(second.duration_secs, 985);
        assert_eq!(second.completion_ratio, Some(0.5));
        assert!(store.list_open_history().unwrap().is_empty());
    }

    #[test]
    fn zero_duration_sessions_are_recorded() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        rec.reconcile(vec![session("s1", "m1", 0)], 700).unwrap();
        rec.reconcile(vec![], 715).unwrap();
        let history = store.list_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration_secs, 0);
        assert_eq!(history[0].ended_at, Some(700));
    }

    #[test]
    fn latest_play_method_is_authoritative() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        rec.reconcile(vec![session("s1", "m1", 0)], 100).unwrap();
        let mut shifted = session("s1", "m1", 5);
        shifted.play_method = PlayMethod::Transcode;
        rec.reconcile(vec![shifted], 110).unwrap();
        rec.reconcile(vec![], 120).unwrap();
        let history = store.list_history().unwrap();
        assert_eq!(history[0].play_method, PlayMethod::Transcode);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn unknown_runtime_leaves_ratio_unknown() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        let mut live = session("live", "channel", 500);
        live.runtime_ticks = None;
        rec.reconcile(vec![live], 10).unwrap();
        rec.reconcile(vec![], 20).unwrap();
        let history = store.list_history().unwrap();
        assert_eq!(history[0].completion_ratio, None);
        assert_eq!(history[0].runtime_ticks, None);
    }

    #[test]
    fn runtime_falls_back_to_catalog() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        store
            .upsert_media(&media("m9", Some(100 * TICKS_PER_SECOND)))
            .unwrap();
        let mut s = session("s1", "m9", 50 * TICKS_PER_SECOND);
        s.runtime_ticks = None;
        s.media_name.clear();
        rec.reconcile(vec![s], 10).unwrap();
        rec.reconcile(vec![], 20).unwrap();
        let row = &store.list_history().unwrap()[0];
        assert_eq!(row.media_name, "media m9");
        assert_eq!(row.completion_ratio, Some(0.5));
    }

    #[test]
    fn completion_ratio_is_clamped() {
        assert_eq!(completion_ratio(200, Some(100)), Some(1.0));
        assert_eq!(completion_ratio(-5, Some(100)), Some(0.0));
        assert_eq!(completion_ratio(50, Some(0)), None);
        assert_eq!(completion_ratio(50, None), None);
    }

    #[test]
    fn records_left_open_by_previous_process_are_finalized() {
        let upstream = Arc::new(FakeMediaServer::new());
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        {
            let mut first = SessionReconciler::new(
                upstream.clone(),
                store.clone(),
                Arc::new(UnknownLocation),
            );
            first.reconcile(vec![session("s1", "m1", 0)], 100).unwrap();
            first.reconcile(vec![session("s1", "m1", 10)], 130).unwrap();
        }

        let mut second =
            SessionReconciler::new(upstream, store.clone(), Arc::new(UnknownLocation));
        let events = second.reconcile(vec![], 400).unwrap();
        assert_eq!(ended(&events), vec!["s1".to_string()]);
        let history = store.list_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ended_at, Some(130));
        assert_eq!(history[0].duration_secs, 30);
    }

    #[test]
    fn location_is_resolved_from_remote_address() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let mut rec = SessionReconciler::new(
            Arc::new(FakeMediaServer::new()),
            store.clone(),
            Arc::new(PrefixTableResolver::parse("192.168.,Home\n")),
        );
        let mut s = session("s1", "m1", 0);
        s.remote_address = Some("192.168.1.40".into());
        rec.reconcile(vec![s], 10).unwrap();
        let open = store.list_open_history().unwrap();
        assert_eq!(open[0].location.as_deref(), Some("Home"));
    }

    #[test]
    fn every_vanished_session_is_finalized_exactly_once() {
        let (mut rec, store) = make(Arc::new(FakeMediaServer::new()));
        let ids = ["a", "b", "c", "d", "e"];
        let mut seed: u64 = 0x2545_f491;
        let mut observed_at = 1_000;
        let mut appearances = 0usize;
        let mut previous: Vec<&str> = Vec::new();

        for _ in 0..60 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let present: Vec<&str> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| (seed >> (i * 7 + 3)) & 1 == 1)
                .map(|(_, id)| *id)
                .collect();
            appearances += present.iter().filter(|id| !previous.contains(id)).count();
            let snapshot = present.iter().map(|id| session(id, "m1", 0)).collect();
            rec.reconcile(snapshot, observed_at).unwrap();
            previous = present;
            observed_at += 15;
        }
        rec.reconcile(vec![], observed_at).unwrap();

        let history = store.list_history().unwrap();
        assert_eq!(history.len(), appearances);
        for row in &history {
            let ended_at = row.ended_at.expect("every record finalized");
            assert!(ended_at >= row.started_at);
            assert_eq!(row.duration_secs as u64, ended_at - row.started_at);
        }
        assert!(store.list_open_history().unwrap().is_empty());
    }
}

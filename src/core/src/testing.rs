//! In-process fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use playwatch_protocol::{MediaEntry, PlayMethod, UserEntry};
use tokio::sync::Notify;

use crate::error::EngineError;
use crate::storage::{
    HistoryFinalization, HistoryHeartbeat, PlaybackHistoryRecord, SettingEntry, SqliteStore,
    Store, UpsertOutcome,
};
use crate::upstream::{ItemImage, MediaServer, PlaybackSession};

/// Scripted [`MediaServer`]. Each poll pops the next scripted result; an
/// exhausted script answers with the last successful snapshot.
pub(crate) struct FakeMediaServer {
    polls: Mutex<VecDeque<Result<Vec<PlaybackSession>, EngineError>>>,
    last_poll: Mutex<Vec<PlaybackSession>>,
    pub(crate) users: Mutex<Result<Vec<UserEntry>, EngineError>>,
    pub(crate) media: Mutex<Result<Vec<MediaEntry>, EngineError>>,
    pub(crate) stopped: Mutex<Vec<String>>,
    /// When set, `list_users` waits for a notification before answering.
    pub(crate) users_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeMediaServer {
    pub(crate) fn new() -> Self {
        Self {
            polls: Mutex::new(VecDeque::new()),
            last_poll: Mutex::new(Vec::new()),
            users: Mutex::new(Ok(Vec::new())),
            media: Mutex::new(Ok(Vec::new())),
            stopped: Mutex::new(Vec::new()),
            users_gate: Mutex::new(None),
        }
    }

    pub(crate) fn push_poll(&self, result: Result<Vec<PlaybackSession>, EngineError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    fn next_poll(&self) -> Result<Vec<PlaybackSession>, EngineError> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(sessions)) => {
                *self.last_poll.lock().unwrap() = sessions.clone();
                Ok(sessions)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last_poll.lock().unwrap().clone()),
        }
    }
}

impl MediaServer for FakeMediaServer {
    fn list_active_sessions(&self) -> BoxFuture<'_, Result<Vec<PlaybackSession>, EngineError>> {
        let result = self.next_poll();
        async move { result }.boxed()
    }

    fn stop_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let active = self.last_poll.lock().unwrap().clone();
            if !active.iter().any(|s| s.session_id == session_id) {
                return Err(EngineError::SessionNotFound(session_id.to_string()));
            }
            self.stopped.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
        .boxed()
    }

    fn list_users(&self) -> BoxFuture<'_, Result<Vec<UserEntry>, EngineError>> {
        async move {
            let gate = self.users_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let users = self.users.lock().unwrap().clone();
            users
        }
        .boxed()
    }

    fn list_media(&self) -> BoxFuture<'_, Result<Vec<MediaEntry>, EngineError>> {
        let result = self.media.lock().unwrap().clone();
        async move { result }.boxed()
    }

    fn fetch_item_image<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ItemImage, EngineError>> {
        let result = if item_id == "missing" {
            Err(EngineError::InvalidInput(format!("no image for item {item_id}")))
        } else {
            Ok(ItemImage {
                content_type: "image/jpeg".into(),
                bytes: item_id.as_bytes().to_vec(),
            })
        };
        async move { result }.boxed()
    }
}

/// In-memory [`Store`] whose `list_users` can be made to block the calling
/// thread until released, to hold a blocking job mid-flight.
pub(crate) struct GatedStore {
    inner: SqliteStore,
    /// Taken by the first `list_users` call, which then waits on it.
    pub(crate) users_gate: Mutex<Option<Receiver<()>>>,
    pub(crate) entered: AtomicBool,
}

impl GatedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteStore::open_memory().unwrap(),
            users_gate: Mutex::new(None),
            entered: AtomicBool::new(false),
        }
    }

    pub(crate) fn has_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

impl Store for GatedStore {
    fn open_history(&self, rec: &PlaybackHistoryRecord) -> Result<String, String> {
        self.inner.open_history(rec)
    }

    fn touch_history(&self, history_id: &str, beat: &HistoryHeartbeat) -> Result<(), String> {
        self.inner.touch_history(history_id, beat)
    }

    fn finalize_history(&self, history_id: &str, fin: &HistoryFinalization) -> Result<(), String> {
        self.inner.finalize_history(history_id, fin)
    }

    fn get_history(&self, history_id: &str) -> Result<Option<PlaybackHistoryRecord>, String> {
        self.inner.get_history(history_id)
    }

    fn list_open_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String> {
        self.inner.list_open_history()
    }

    fn list_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String> {
        self.inner.list_history()
    }

    fn upsert_user(&self, user: &UserEntry) -> Result<UpsertOutcome, String> {
        self.inner.upsert_user(user)
    }

    fn list_users(&self) -> Result<Vec<UserEntry>, String> {
        let gate = self.users_gate.lock().unwrap().take();
        self.entered.store(true, Ordering::SeqCst);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.inner.list_users()
    }

    fn upsert_media(&self, media: &MediaEntry) -> Result<UpsertOutcome, String> {
        self.inner.upsert_media(media)
    }

    fn get_media(&self, media_id: &str) -> Result<Option<MediaEntry>, String> {
        self.inner.get_media(media_id)
    }

    fn list_media(&self) -> Result<Vec<MediaEntry>, String> {
        self.inner.list_media()
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), String> {
        self.inner.put_setting(key, value)
    }

    fn list_settings(&self) -> Result<Vec<SettingEntry>, String> {
        self.inner.list_settings()
    }
}

pub(crate) fn session(session_id: &str, media_id: &str, position_ticks: i64) -> PlaybackSession {
    PlaybackSession {
        session_id: session_id.into(),
        user_id: "u1".into(),
        user_name: "alice".into(),
        media_id: media_id.into(),
        media_name: format!("media {media_id}"),
        client_name: "Jellyfin Web".into(),
        device_name: "Chrome".into(),
        play_method: PlayMethod::DirectPlay,
        position_ticks,
        runtime_ticks: Some(1_000 * crate::monitor::TICKS_PER_SECOND),
        is_paused: false,
        remote_address: None,
    }
}

pub(crate) fn user(id: &str, name: &str) -> UserEntry {
    UserEntry {
        id: id.into(),
        name: name.into(),
        is_admin: false,
        last_activity: None,
    }
}

pub(crate) fn media(id: &str, runtime_ticks: Option<i64>) -> MediaEntry {
    MediaEntry {
        id: id.into(),
        name: format!("media {id}"),
        item_type: "Movie".into(),
        series_name: None,
        parent_id: None,
        production_year: None,
        runtime_ticks,
        date_created: None,
    }
}

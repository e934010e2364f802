//! Client side of the upstream media server's session and library API.

mod http;

use futures::future::BoxFuture;
use playwatch_protocol::{MediaEntry, PlayMethod, UserEntry};

use crate::error::EngineError;

pub use http::{HttpMediaServer, API_KEY_HEADER};

/// One active playback as reported by a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub media_id: String,
    pub media_name: String,
    pub client_name: String,
    pub device_name: String,
    pub play_method: PlayMethod,
    pub position_ticks: i64,
    pub runtime_ticks: Option<i64>,
    pub is_paused: bool,
    pub remote_address: Option<String>,
}

/// Primary artwork for a library item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Object-safe view of the upstream media server.
///
/// Every call is bounded by a timeout. A failed call returns an error; it
/// never degrades to an empty result, so callers can tell an outage apart
/// from "nothing is playing".
pub trait MediaServer: Send + Sync + 'static {
    fn list_active_sessions(&self) -> BoxFuture<'_, Result<Vec<PlaybackSession>, EngineError>>;

    /// Ask the upstream to stop a session. Fails with `SessionNotFound` when
    /// the id is not in the current active list.
    fn stop_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), EngineError>>;

    fn list_users(&self) -> BoxFuture<'_, Result<Vec<UserEntry>, EngineError>>;

    fn list_media(&self) -> BoxFuture<'_, Result<Vec<MediaEntry>, EngineError>>;

    fn fetch_item_image<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ItemImage, EngineError>>;
}

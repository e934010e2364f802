use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use playwatch_protocol::{MediaEntry, PlayMethod, UserEntry};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{ItemImage, MediaServer, PlaybackSession};
use crate::error::EngineError;

/// Header carrying the upstream API key. Keys never go in the query string.
pub const API_KEY_HEADER: &str = "X-Emby-Token";

const CATALOG_ITEM_TYPES: &str = "Movie,Episode,Series,Season,Audio,MusicAlbum";
const CATALOG_FIELDS: &str = "DateCreated,ProductionYear,ParentId";

/// reqwest-backed [`MediaServer`] for Jellyfin/Emby style servers.
#[derive(Debug, Clone)]
pub struct HttpMediaServer {
    client: reqwest::Client,
    base: Url,
}

impl HttpMediaServer {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, EngineError> {
        let base = Url::parse(base_url)
            .map_err(|e| EngineError::InvalidInput(format!("upstream url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(EngineError::InvalidInput(format!(
                "upstream url {base_url:?} cannot be a base"
            )));
        }

        let mut key = HeaderValue::from_str(api_key.trim())
            .map_err(|_| EngineError::InvalidInput("upstream api key is not a valid header".into()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout.max(Duration::from_millis(1)))
            .default_headers(headers)
            .build()
            .map_err(EngineError::upstream)?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response, EngineError> {
        let label = format!("{method} {}", url.path());
        let resp = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(|e| describe_transport_error(&label, e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::SessionNotFound(label));
        }
        Err(EngineError::UpstreamUnavailable(format!(
            "{label}: upstream returned {status}"
        )))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, EngineError> {
        let path = url.path().to_string();
        let resp = self.send(Method::GET, url).await.map_err(not_found_is_outage)?;
        resp.json::<T>()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("GET {path}: decode: {e}")))
    }

    async fn sessions(&self) -> Result<Vec<PlaybackSession>, EngineError> {
        let raw: Vec<WireSession> = self.get_json(self.endpoint(&["Sessions"])).await?;
        Ok(raw.into_iter().filter_map(WireSession::into_playback).collect())
    }

    async fn stop(&self, session_id: &str) -> Result<(), EngineError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(EngineError::InvalidInput("missing session id".into()));
        }
        let active = self.sessions().await?;
        if !active.iter().any(|s| s.session_id == session_id) {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }
        let url = self.endpoint(&["Sessions", session_id, "Playing", "Stop"]);
        match self.send(Method::POST, url).await {
            Ok(_) => Ok(()),
            Err(EngineError::SessionNotFound(_)) => {
                Err(EngineError::SessionNotFound(session_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn users(&self) -> Result<Vec<UserEntry>, EngineError> {
        let raw: Vec<WireUser> = self.get_json(self.endpoint(&["Users"])).await?;
        Ok(raw.into_iter().map(WireUser::into_entry).collect())
    }

    async fn media(&self) -> Result<Vec<MediaEntry>, EngineError> {
        let mut url = self.endpoint(&["Items"]);
        url.query_pairs_mut()
            .append_pair("Recursive", "true")
            .append_pair("IncludeItemTypes", CATALOG_ITEM_TYPES)
            .append_pair("Fields", CATALOG_FIELDS);
        let raw: WireItems = self.get_json(url).await?;
        Ok(raw
            .items
            .into_iter()
            .filter_map(WireItem::into_entry)
            .collect())
    }

    async fn image(&self, item_id: &str) -> Result<ItemImage, EngineError> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(EngineError::InvalidInput("missing item id".into()));
        }
        let url = self.endpoint(&["Items", item_id, "Images", "Primary"]);
        let resp = match self.send(Method::GET, url).await {
            Ok(resp) => resp,
            Err(EngineError::SessionNotFound(_)) => {
                return Err(EngineError::InvalidInput(format!("no image for item {item_id}")))
            }
            Err(err) => return Err(err),
        };
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("image body: {e}")))?;
        Ok(ItemImage {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

impl MediaServer for HttpMediaServer {
    fn list_active_sessions(&self) -> BoxFuture<'_, Result<Vec<PlaybackSession>, EngineError>> {
        self.sessions().boxed()
    }

    fn stop_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        self.stop(session_id).boxed()
    }

    fn list_users(&self) -> BoxFuture<'_, Result<Vec<UserEntry>, EngineError>> {
        self.users().boxed()
    }

    fn list_media(&self) -> BoxFuture<'_, Result<Vec<MediaEntry>, EngineError>> {
        self.media().boxed()
    }

    fn fetch_item_image<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ItemImage, EngineError>> {
        self.image(item_id).boxed()
    }
}

fn describe_transport_error(label: &str, err: reqwest::Error) -> EngineError {
    let err = err.without_url();
    if err.is_timeout() {
        EngineError::UpstreamUnavailable(format!("{label}: timed out"))
    } else {
        EngineError::UpstreamUnavailable(format!("{label}: {err}"))
    }
}

/// Listing endpoints have no "missing" case; a 404 there means a bad base URL.
fn not_found_is_outage(err: EngineError) -> EngineError {
    match err {
        EngineError::SessionNotFound(label) => {
            EngineError::UpstreamUnavailable(format!("{label}: upstream returned 404 Not Found"))
        }
        other => other,
    }
}

// ── Upstream wire shapes ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSession {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    remote_end_point: Option<String>,
    #[serde(default)]
    now_playing_item: Option<WireItem>,
    #[serde(default)]
    play_state: Option<WirePlayState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WirePlayState {
    position_ticks: Option<i64>,
    play_method: Option<String>,
    is_paused: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "Type")]
    item_type: Option<String>,
    #[serde(default)]
    series_name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    production_year: Option<i32>,
    #[serde(default)]
    run_time_ticks: Option<i64>,
    #[serde(default)]
    date_created: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireItems {
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    policy: Option<WirePolicy>,
    #[serde(default)]
    last_activity_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WirePolicy {
    is_administrator: bool,
}

impl WireSession {
    /// Idle clients (nothing playing) are not playback sessions.
    fn into_playback(self) -> Option<PlaybackSession> {
        let item = self.now_playing_item?;
        let media_id = item.id?;
        let user_id = self.user_id.filter(|id| !id.is_empty())?;
        let state = self.play_state.unwrap_or_default();
        Some(PlaybackSession {
            session_id: self.id,
            user_id,
            user_name: self.user_name.unwrap_or_default(),
            media_id,
            media_name: item.name.unwrap_or_default(),
            client_name: self.client.unwrap_or_default(),
            device_name: self.device_name.unwrap_or_default(),
            play_method: state
                .play_method
                .as_deref()
                .map(PlayMethod::from_label)
                .unwrap_or(PlayMethod::DirectPlay),
            position_ticks: state.position_ticks.unwrap_or(0).max(0),
            runtime_ticks: item.run_time_ticks.filter(|t| *t > 0),
            is_paused: state.is_paused.unwrap_or(false),
            remote_address: self.remote_end_point.filter(|a| !a.is_empty()),
        })
    }
}

impl WireItem {
    fn into_entry(self) -> Option<MediaEntry> {
        Some(MediaEntry {
            id: self.id?,
            name: self.name.unwrap_or_default(),
            item_type: self.item_type.unwrap_or_else(|| "Unknown".to_string()),
            series_name: self.series_name,
            parent_id: self.parent_id,
            production_year: self.production_year,
            runtime_ticks: self.run_time_ticks.filter(|t| *t > 0),
            date_created: self.date_created,
        })
    }
}

impl WireUser {
    fn into_entry(self) -> UserEntry {
        UserEntry {
            id: self.id,
            name: self.name,
            is_admin: self.policy.map(|p| p.is_administrator).unwrap_or(false),
            last_activity: self.last_activity_date,
        }
    }
}

use serde::{Deserialize, Serialize};

/// How the upstream server delivers a stream to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMethod {
    DirectPlay,
    DirectStream,
    Transcode,
}

impl PlayMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectPlay => "DirectPlay",
            Self::DirectStream => "DirectStream",
            Self::Transcode => "Transcode",
        }
    }

    /// Parse an upstream label. Unknown or missing labels count as direct play.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcode" => Self::Transcode,
            "directstream" | "direct_stream" => Self::DirectStream,
            _ => Self::DirectPlay,
        }
    }
}

/// Coarse device bucket derived from client and device names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Tv,
    Web,
    Mobile,
    Desktop,
    Other,
}

impl DeviceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tv => "tv",
            Self::Web => "web",
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
            Self::Other => "other",
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s {
            "tv" => Self::Tv,
            "web" => Self::Web,
            "mobile" => Self::Mobile,
            "desktop" => Self::Desktop,
            _ => Self::Other,
        }
    }
}

/// Mirror of an upstream user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
}

/// Mirror of an upstream library item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub id: String,
    pub name: String,
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,
    #[serde(default, with = "crate::decimal::option")]
    pub runtime_ticks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
}

/// One playback, open while `ended_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackHistoryRecord {
    pub id: String,
    /// Upstream session id this record was opened for.
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub media_id: String,
    pub media_name: String,
    pub client_name: String,
    pub device_name: String,
    pub device_category: DeviceCategory,
    pub play_method: PlayMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub started_at: u64,
    pub last_seen_at: u64,
    #[serde(default)]
    pub ended_at: Option<u64>,
    #[serde(with = "crate::decimal")]
    pub duration_secs: i64,
    #[serde(with = "crate::decimal")]
    pub position_ticks: i64,
    #[serde(default, with = "crate::decimal::option")]
    pub runtime_ticks: Option<i64>,
    /// Fraction of the runtime reached, `None` when the runtime is unknown.
    #[serde(default)]
    pub completion_ratio: Option<f64>,
}

impl PlaybackHistoryRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

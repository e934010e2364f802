use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::{MediaEntry, PlaybackHistoryRecord, SettingEntry, UserEntry};

/// Current backup document format.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Full data export written by the backup job.
///
/// ```json
/// {"version": 1, "exportDate": "...", "data": {"users": [], "media": [],
///  "playbackHistory": [], "settings": []}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: u32,
    pub export_date: DateTime<Utc>,
    pub data: BackupData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupData {
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub media: Vec<MediaEntry>,
    #[serde(default)]
    pub playback_history: Vec<PlaybackHistoryRecord>,
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
}

impl BackupDocument {
    pub fn new(export_date: DateTime<Utc>, data: BackupData) -> Self {
        Self {
            version: BACKUP_FORMAT_VERSION,
            export_date,
            data,
        }
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a document, refusing versions this build does not understand.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let doc: Self = serde_json::from_slice(bytes)?;
        if doc.version != BACKUP_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                found: doc.version,
                expected: BACKUP_FORMAT_VERSION,
            });
        }
        Ok(doc)
    }
}

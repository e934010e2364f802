use playwatch_protocol::PlayMethod;

pub use playwatch_protocol::{
    DeviceCategory, MediaEntry, PlaybackHistoryRecord, SettingEntry, UserEntry,
};

/// What an upsert-by-external-id did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the row was written.
    pub fn affected(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Fields refreshed each time an open session is observed again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryHeartbeat {
    pub last_seen_at: u64,
    pub position_ticks: i64,
    pub runtime_ticks: Option<i64>,
    pub play_method: PlayMethod,
}

/// Fields written when a session disappears from polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryFinalization {
    pub ended_at: u64,
    pub duration_secs: i64,
    pub position_ticks: i64,
    pub completion_ratio: Option<f64>,
}

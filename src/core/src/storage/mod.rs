mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{
    DeviceCategory, HistoryFinalization, HistoryHeartbeat, MediaEntry, PlaybackHistoryRecord,
    SettingEntry, UpsertOutcome, UserEntry,
};

/// Abstract storage interface for persistence.
///
/// All methods use `&self`; implementations handle interior mutability
/// (e.g. `Mutex<Connection>` for sqlite). The store executes the writes it
/// is told to perform and makes no lifecycle decisions of its own.
pub trait Store: Send + Sync + 'static {
    /// Insert an open history record, or return the id of the record already
    /// open for the same session id. At most one record per session id is open.
    fn open_history(&self, rec: &PlaybackHistoryRecord) -> Result<String, String>;

    /// Refresh position/last-seen/play method of an open record.
    fn touch_history(&self, history_id: &str, beat: &HistoryHeartbeat) -> Result<(), String>;

    /// Close an open record. Closing an already closed record is a no-op.
    fn finalize_history(&self, history_id: &str, fin: &HistoryFinalization) -> Result<(), String>;

    fn get_history(&self, history_id: &str) -> Result<Option<PlaybackHistoryRecord>, String>;

    /// Records with no end timestamp, oldest first.
    fn list_open_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String>;

    /// All records, oldest first.
    fn list_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String>;

    fn upsert_user(&self, user: &UserEntry) -> Result<UpsertOutcome, String>;

    fn list_users(&self) -> Result<Vec<UserEntry>, String>;

    fn upsert_media(&self, media: &MediaEntry) -> Result<UpsertOutcome, String>;

    fn get_media(&self, media_id: &str) -> Result<Option<MediaEntry>, String>;

    fn list_media(&self) -> Result<Vec<MediaEntry>, String>;

    fn put_setting(&self, key: &str, value: &str) -> Result<(), String>;

    fn list_settings(&self) -> Result<Vec<SettingEntry>, String>;
}

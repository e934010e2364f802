use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{
    DeviceCategory, HistoryFinalization, HistoryHeartbeat, MediaEntry, PlaybackHistoryRecord,
    SettingEntry, UpsertOutcome, UserEntry,
};
use super::Store;
use playwatch_protocol::PlayMethod;

const HISTORY_COLUMNS: &str = "id, session_id, user_id, user_name, media_id, media_name,
    client_name, device_name, device_category, play_method, remote_address, location,
    started_at, last_seen_at, ended_at, duration_secs, position_ticks, runtime_ticks,
    completion_ratio";

const MEDIA_COLUMNS: &str = "id, name, item_type, series_name, parent_id, production_year,
    runtime_ticks, date_created";

/// SQLite-backed store for playback history, catalog mirrors and settings.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The schema is created on `open()`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                is_admin      INTEGER NOT NULL DEFAULT 0,
                last_activity TEXT
            );

            CREATE TABLE IF NOT EXISTS media_items (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                item_type       TEXT NOT NULL,
                series_name     TEXT,
                parent_id       TEXT,
                production_year INTEGER,
                runtime_ticks   INTEGER,
                date_created    TEXT
            );

            CREATE TABLE IF NOT EXISTS playback_history (
                id               TEXT PRIMARY KEY,
                session_id       TEXT NOT NULL,
                user_id          TEXT NOT NULL,
                user_name        TEXT NOT NULL,
                media_id         TEXT NOT NULL,
                media_name       TEXT NOT NULL,
                client_name      TEXT NOT NULL,
                device_name      TEXT NOT NULL,
                device_category  TEXT NOT NULL,
                play_method      TEXT NOT NULL,
                remote_address   TEXT,
                location         TEXT,
                started_at       INTEGER NOT NULL,
                last_seen_at     INTEGER NOT NULL,
                ended_at         INTEGER,
                duration_secs    INTEGER NOT NULL DEFAULT 0,
                position_ticks   INTEGER NOT NULL DEFAULT 0,
                runtime_ticks    INTEGER,
                completion_ratio REAL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_history_open_session
                ON playback_history (session_id) WHERE ended_at IS NULL;

            CREATE INDEX IF NOT EXISTS idx_history_started
                ON playback_history (started_at);

            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;

        Ok(())
    }
}

impl Store for SqliteStore {
    fn open_history(&self, rec: &PlaybackHistoryRecord) -> Result<String, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM playback_history WHERE session_id = ?1 AND ended_at IS NULL",
                params![rec.session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("open_history lookup: {e}"))?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            &format!(
                "INSERT INTO playback_history ({HISTORY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL,
                         ?15, ?16, ?17, ?18)"
            ),
            params![
                rec.id,
                rec.session_id,
                rec.user_id,
                rec.user_name,
                rec.media_id,
                rec.media_name,
                rec.client_name,
                rec.device_name,
                rec.device_category.as_str(),
                rec.play_method.as_str(),
                rec.remote_address,
                rec.location,
                rec.started_at as i64,
                rec.last_seen_at as i64,
                rec.duration_secs,
                rec.position_ticks,
                rec.runtime_ticks,
                rec.completion_ratio,
            ],
        )
        .map_err(|e| format!("open_history insert: {e}"))?;
        Ok(rec.id.clone())
    }

    fn touch_history(&self, history_id: &str, beat: &HistoryHeartbeat) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE playback_history SET
                last_seen_at = ?1,
                position_ticks = ?2,
                runtime_ticks = COALESCE(?3, runtime_ticks),
                play_method = ?4
             WHERE id = ?5 AND ended_at IS NULL",
            params![
                beat.last_seen_at as i64,
                beat.position_ticks,
                beat.runtime_ticks,
                beat.play_method.as_str(),
                history_id,
            ],
        )
        .map_err(|e| format!("touch_history: {e}"))?;
        Ok(())
    }

    fn finalize_history(&self, history_id: &str, fin: &HistoryFinalization) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE playback_history SET
                ended_at = ?1,
                duration_secs = ?2,
                position_ticks = ?3,
                completion_ratio = ?4
             WHERE id = ?5 AND ended_at IS NULL",
            params![
                fin.ended_at as i64,
                fin.duration_secs,
                fin.position_ticks,
                fin.completion_ratio,
                history_id,
            ],
        )
        .map_err(|e| format!("finalize_history: {e}"))?;
        Ok(())
    }

    fn get_history(&self, history_id: &str) -> Result<Option<PlaybackHistoryRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.query_row(
            &format!("SELECT {HISTORY_COLUMNS} FROM playback_history WHERE id = ?1"),
            params![history_id],
            history_from_row,
        )
        .optional()
        .map_err(|e| format!("get_history: {e}"))
    }

    fn list_open_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM playback_history
                 WHERE ended_at IS NULL ORDER BY started_at ASC, id ASC"
            ))
            .map_err(|e| format!("list_open_history prepare: {e}"))?;
        let rows = stmt
            .query_map([], history_from_row)
            .map_err(|e| format!("list_open_history query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_open_history collect: {e}"))
    }

    fn list_history(&self) -> Result<Vec<PlaybackHistoryRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM playback_history ORDER BY started_at ASC, id ASC"
            ))
            .map_err(|e| format!("list_history prepare: {e}"))?;
        let rows = stmt
            .query_map([], history_from_row)
            .map_err(|e| format!("list_history query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_history collect: {e}"))
    }

    fn upsert_user(&self, user: &UserEntry) -> Result<UpsertOutcome, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let existing = conn
            .query_row(
                "SELECT id, name, is_admin, last_activity FROM users WHERE id = ?1",
                params![user.id],
                user_from_row,
            )
            .optional()
            .map_err(|e| format!("upsert_user lookup: {e}"))?;

        let outcome = match existing {
            Some(current) if current == *user => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        conn.execute(
            "INSERT INTO users (id, name, is_admin, last_activity)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_admin = excluded.is_admin,
                last_activity = excluded.last_activity",
            params![user.id, user.name, user.is_admin, user.last_activity],
        )
        .map_err(|e| format!("upsert_user: {e}"))?;
        Ok(outcome)
    }

    fn list_users(&self) -> Result<Vec<UserEntry>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT id, name, is_admin, last_activity FROM users ORDER BY id ASC")
            .map_err(|e| format!("list_users prepare: {e}"))?;
        let rows = stmt
            .query_map([], user_from_row)
            .map_err(|e| format!("list_users query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_users collect: {e}"))
    }

    fn upsert_media(&self, media: &MediaEntry) -> Result<UpsertOutcome, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let existing = conn
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media_items WHERE id = ?1"),
                params![media.id],
                media_from_row,
            )
            .optional()
            .map_err(|e| format!("upsert_media lookup: {e}"))?;

        let outcome = match existing {
            Some(current) if current == *media => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        conn.execute(
            &format!(
                "INSERT INTO media_items ({MEDIA_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    item_type = excluded.item_type,
                    series_name = excluded.series_name,
                    parent_id = excluded.parent_id,
                    production_year = excluded.production_year,
                    runtime_ticks = excluded.runtime_ticks,
                    date_created = excluded.date_created"
            ),
            params![
                media.id,
                media.name,
                media.item_type,
                media.series_name,
                media.parent_id,
                media.production_year,
                media.runtime_ticks,
                media.date_created,
            ],
        )
        .map_err(|e| format!("upsert_media: {e}"))?;
        Ok(outcome)
    }

    fn get_media(&self, media_id: &str) -> Result<Option<MediaEntry>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media_items WHERE id = ?1"),
            params![media_id],
            media_from_row,
        )
        .optional()
        .map_err(|e| format!("get_media: {e}"))
    }

    fn list_media(&self) -> Result<Vec<MediaEntry>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEDIA_COLUMNS} FROM media_items ORDER BY id ASC"
            ))
            .map_err(|e| format!("list_media prepare: {e}"))?;
        let rows = stmt
            .query_map([], media_from_row)
            .map_err(|e| format!("list_media query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_media collect: {e}"))
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| format!("put_setting: {e}"))?;
        Ok(())
    }

    fn list_settings(&self) -> Result<Vec<SettingEntry>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings ORDER BY key ASC")
            .map_err(|e| format!("list_settings prepare: {e}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SettingEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(|e| format!("list_settings query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_settings collect: {e}"))
    }
}

fn history_from_row(row: &Row<'_>) -> Result<PlaybackHistoryRecord, rusqlite::Error> {
    Ok(PlaybackHistoryRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        media_id: row.get(4)?,
        media_name: row.get(5)?,
        client_name: row.get(6)?,
        device_name: row.get(7)?,
        device_category: DeviceCategory::from_label(&row.get::<_, String>(8)?),
        play_method: PlayMethod::from_label(&row.get::<_, String>(9)?),
        remote_address: row.get(10)?,
        location: row.get(11)?,
        started_at: row.get::<_, i64>(12)? as u64,
        last_seen_at: row.get::<_, i64>(13)? as u64,
        ended_at: row.get::<_, Option<i64>>(14)?.map(|v| v as u64),
        duration_secs: row.get(15)?,
        position_ticks: row.get(16)?,
        runtime_ticks: row.get(17)?,
        completion_ratio: row.get(18)?,
    })
}

fn user_from_row(row: &Row<'_>) -> Result<UserEntry, rusqlite::Error> {
    Ok(UserEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        is_admin: row.get(2)?,
        last_activity: row.get(3)?,
    })
}

fn media_from_row(row: &Row<'_>) -> Result<MediaEntry, rusqlite::Error> {
    Ok(MediaEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        item_type: row.get(2)?,
        series_name: row.get(3)?,
        parent_id: row.get(4)?,
        production_year: row.get(5)?,
        runtime_ticks: row.get(6)?,
        date_created: row.get(7)?,
    })
}

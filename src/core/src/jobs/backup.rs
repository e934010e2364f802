use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use playwatch_protocol::{BackupData, BackupDocument, BackupListing};
use regex::Regex;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::storage::Store;

/// Writes timestamped full-data exports and manages the automatic ones.
///
/// All methods do blocking file I/O; async callers go through
/// `spawn_blocking`.
#[derive(Clone)]
pub struct BackupJob {
    store: Arc<dyn Store>,
    dir: PathBuf,
    prefix: String,
    automatic: Regex,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Automatic,
    Manual,
}

impl Trigger {
    fn label(self) -> &'static str {
        match self {
            Self::Automatic => "auto",
            Self::Manual => "manual",
        }
    }
}

impl BackupJob {
    pub fn new(store: Arc<dyn Store>, dir: PathBuf, prefix: &str) -> Result<Self, EngineError> {
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(EngineError::InvalidInput(format!(
                "invalid backup prefix: {prefix:?}"
            )));
        }
        let pattern = format!(
            r"^{}-auto-\d{{4}}-\d{{2}}-\d{{2}}(T\d{{2}}-\d{{2}}-\d{{2}}(-\d{{3}})?)?\.json$",
            regex::escape(prefix)
        );
        let automatic = Regex::new(&pattern)
            .map_err(|e| EngineError::InvalidInput(format!("backup name pattern: {e}")))?;
        Ok(Self {
            store,
            dir,
            prefix: prefix.to_string(),
            automatic,
        })
    }

    /// Scheduled backup. Returns the artifact's file name.
    pub fn run_automatic(&self) -> Result<String, EngineError> {
        self.write(Trigger::Automatic, Utc::now())
    }

    /// Operator-requested backup. Manual artifacts never show up in
    /// [`Self::list_automatic`] and cannot be deleted through it.
    pub fn run_manual(&self) -> Result<String, EngineError> {
        self.write(Trigger::Manual, Utc::now())
    }

    /// Snapshot of every persisted entity.
    pub fn export_document(&self) -> Result<BackupDocument, EngineError> {
        let data = BackupData {
            users: self.store.list_users().map_err(EngineError::store)?,
            media: self.store.list_media().map_err(EngineError::store)?,
            playback_history: self.store.list_history().map_err(EngineError::store)?,
            settings: self.store.list_settings().map_err(EngineError::store)?,
        };
        Ok(BackupDocument::new(Utc::now(), data))
    }

    /// Automatic artifacts, newest first.
    pub fn list_automatic(&self) -> Result<Vec<BackupListing>, EngineError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(EngineError::store(format!("read backup dir: {err}"))),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::store(format!("read backup dir: {e}")))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.is_automatic(&name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, file = %name, "skipping unreadable backup");
                    continue;
                }
            };
            let modified: DateTime<Utc> = meta
                .modified()
                .map(DateTime::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            found.push((modified, name, meta.len()));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(found
            .into_iter()
            .map(|(modified, file_name, size_bytes)| BackupListing {
                file_name,
                size_bytes,
                created_at: modified.to_rfc3339(),
            })
            .collect())
    }

    /// Remove one automatic artifact. Only the base file name is considered,
    /// so directory components in `name` cannot reach outside the backup dir.
    pub fn delete(&self, name: &str) -> Result<(), EngineError> {
        let base = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if base.is_empty() || base != name || !self.is_automatic(base) {
            return Err(EngineError::InvalidInput(format!(
                "not an automatic backup: {name:?}"
            )));
        }

        let path = self.dir.join(base);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(file = base, "backup deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                EngineError::InvalidInput(format!("backup does not exist: {base}")),
            ),
            Err(err) => Err(EngineError::store(format!("delete {base}: {err}"))),
        }
    }

    fn is_automatic(&self, name: &str) -> bool {
        self.automatic.is_match(name)
    }

    fn file_name(&self, trigger: Trigger, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}.json",
            self.prefix,
            trigger.label(),
            at.format("%Y-%m-%dT%H-%M-%S-%3f")
        )
    }

    fn write(&self, trigger: Trigger, at: DateTime<Utc>) -> Result<String, EngineError> {
        let doc = self.export_document()?;
        let bytes = doc
            .to_json_pretty()
            .map_err(|e| EngineError::store(format!("encode backup: {e}")))?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::store(format!("create backup dir: {e}")))?;

        let name = self.file_name(trigger, at);
        let mut tmp = tempfile::Builder::new()
            .prefix(".backup-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| EngineError::store(format!("create temp file: {e}")))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| EngineError::store(format!("write backup: {e}")))?;
        tmp.persist_noclobber(self.dir.join(&name))
            .map_err(|e| EngineError::store(format!("persist {name}: {}", e.error)))?;

        info!(
            file = %name,
            trigger = trigger.label(),
            users = doc.data.users.len(),
            media = doc.data.media.len(),
            history = doc.data.playback_history.len(),
            "backup written"
        );
        Ok(name)
    }
}

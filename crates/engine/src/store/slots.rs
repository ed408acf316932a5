// Key-value slots in meta.db: backup document, local file handle, drive file id.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::meta_db::MetaDb;

/// The small set of values that survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Full serialized project, used when no file handle is available.
    ProjectBackup,
    /// Serialized `FileHandle` of the user-chosen project file.
    ProjectFileHandle,
    /// Last-known id of the project file in the user's drive.
    DriveFileId,
}

impl Slot {
    pub fn key(self) -> &'static str {
        match self {
            Self::ProjectBackup => "storyverse.project_backup",
            Self::ProjectFileHandle => "storyverse.project_file_handle",
            Self::DriveFileId => "storyverse.drive_file_id",
        }
    }
}

/// Shared handle over the meta store. Clones share one connection.
#[derive(Debug, Clone)]
pub struct SlotStore {
    db: Arc<Mutex<MetaDb>>,
}

impl SlotStore {
    pub fn new(db: MetaDb) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(MetaDb::open_in_memory()?))
    }

    pub fn get(&self, slot: Slot) -> Result<Option<String>> {
        let db = self.lock()?;
        db.connection()
            .query_row("SELECT value FROM kv_slots WHERE key = ?1", params![slot.key()], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("failed to read slot `{}`", slot.key()))
    }

    pub fn set(&self, slot: Slot, value: &str) -> Result<()> {
        let db = self.lock()?;
        db.connection()
            .execute(
                "INSERT INTO kv_slots (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![slot.key(), value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write slot `{}`", slot.key()))?;
        Ok(())
    }

    /// Remove a slot. Returns whether a value was present.
    pub fn delete(&self, slot: Slot) -> Result<bool> {
        let db = self.lock()?;
        let removed = db
            .connection()
            .execute("DELETE FROM kv_slots WHERE key = ?1", params![slot.key()])
            .with_context(|| format!("failed to delete slot `{}`", slot.key()))?;
        Ok(removed > 0)
    }

    pub fn contains(&self, slot: Slot) -> Result<bool> {
        Ok(self.get(slot)?.is_some())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MetaDb>> {
        self.db.lock().map_err(|_| anyhow!("meta.db lock poisoned"))
    }
}

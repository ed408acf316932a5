use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{BackendError, FailureKind};

/// Save indicator shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    #[default]
    Idle,
    Unsaved,
    Saving,
    /// Cosmetic; reverts to `Idle` shortly after.
    Saved,
    Error,
}

impl SaveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Unsaved => "unsaved",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
        }
    }
}

/// Cause of the most recent failed save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SaveFailure {
    pub fn from_error(error: &BackendError) -> Self {
        Self { kind: error.kind(), message: error.to_string(), at: Utc::now() }
    }
}

impl std::fmt::Display for SaveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SaveFailure {}

/// What a single `save()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Written, but a newer edit arrived during the write.
    SavedWithPendingChanges,
    AlreadySaving,
    NotDirty,
    /// No backend attached; the document stays dirty.
    NoBackend,
    /// The document was replaced while the write was in flight.
    Discarded,
    Failed,
}

/// Host lifecycle signals that force a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    VisibilityHidden,
    CloseRequested,
}

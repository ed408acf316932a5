// On-disk / remote project file format: pretty-printed JSON of `ProjectData`.

use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::sanitize::{sanitize_project, SanitizeError};
use crate::types::ProjectData;

/// Well-known name of the project file in the user's drive.
pub const DEFAULT_PROJECT_FILE_NAME: &str = "storyverse_project.json";
/// Name shown when nothing better can be derived.
pub const UNTITLED_PROJECT: &str = "Untitled Project";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("project file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
}

/// Serialize a project the way every backend writes it.
pub fn to_pretty_json(project: &ProjectData) -> String {
    // Serializing plain data structs with string keys cannot fail.
    serde_json::to_string_pretty(project).unwrap_or_else(|_| String::from("{}"))
}

/// Parse raw bytes and pass them through the sanitizer.
pub fn parse_project(bytes: &[u8]) -> Result<ProjectData, FormatError> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(sanitize_project(&value)?)
}

/// Hex SHA-256 of the serialized project, for comparing two candidates.
pub fn content_digest(project: &ProjectData) -> String {
    let digest = Sha256::digest(to_pretty_json(project).as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Derive a human-readable project name from an imported file name.
///
/// `my_great-novel.json` → `my great-novel`.
pub fn project_name_from_path(path: &Path) -> String {
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
    let name = stem.replace('_', " ");
    let name = name.trim();
    if name.is_empty() {
        UNTITLED_PROJECT.to_string()
    } else {
        name.to_string()
    }
}

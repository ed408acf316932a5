// Sanitizer: the single gate for untrusted project input.
//
// Imported files and remote payloads pass through here before they become a
// live document. Missing or wrong-typed fields fall back to defaults; only a
// non-object root is rejected. The output is a fixed point: sanitizing it
// again yields an equal value.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    Chapter, HistoryEntry, Novel, NovelSketch, ProjectData, Settings, StoryIdea, StoryIdeaStatus,
};
use crate::wordcount::word_count;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("project root must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Sanitize an arbitrary JSON value into a structurally valid project.
pub fn sanitize_project(value: &Value) -> Result<ProjectData, SanitizeError> {
    sanitize_project_at(value, Utc::now())
}

/// Like `sanitize_project` with an explicit clock for defaulted timestamps.
pub fn sanitize_project_at(value: &Value, now: DateTime<Utc>) -> Result<ProjectData, SanitizeError> {
    let root = value.as_object().ok_or_else(|| SanitizeError::NotAnObject(kind_name(value)))?;

    let settings = root.get("settings").and_then(Value::as_object).map(sanitize_settings);

    let mut novel_ids = HashSet::new();
    let novels = objects(root.get("novels"))
        .map(|novel| sanitize_novel(novel, &mut novel_ids, now))
        .collect();

    let mut idea_ids = HashSet::new();
    let story_ideas = objects(root.get("storyIdeas"))
        .map(|idea| sanitize_story_idea(idea, &mut idea_ids, now))
        .collect();

    Ok(ProjectData { settings: settings.unwrap_or_default(), novels, story_ideas })
}

fn sanitize_settings(obj: &Map<String, Value>) -> Settings {
    let defaults = Settings::default();
    let theme = obj
        .get("theme")
        .and_then(Value::as_str)
        .filter(|theme| !theme.trim().is_empty())
        .map(str::to_string)
        .unwrap_or(defaults.theme);
    let base_font_size = obj
        .get("baseFontSize")
        .and_then(Value::as_f64)
        .filter(|size| size.is_finite() && *size > 0.0)
        .unwrap_or(defaults.base_font_size);
    let spellcheck_language = obj
        .get("spellcheckLanguage")
        .and_then(Value::as_str)
        .filter(|lang| !lang.trim().is_empty())
        .map(str::to_string);
    let custom_dictionary: BTreeSet<String> = obj
        .get("customDictionary")
        .and_then(Value::as_array)
        .map(|words| words.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    Settings { theme, base_font_size, spellcheck_language, custom_dictionary }
}

fn sanitize_novel(obj: &Map<String, Value>, seen: &mut HashSet<String>, now: DateTime<Utc>) -> Novel {
    let created_at = timestamp(obj, "createdAt").unwrap_or(now);

    let mut chapter_ids = HashSet::new();
    let chapters = objects(obj.get("chapters"))
        .map(|chapter| sanitize_chapter(chapter, &mut chapter_ids, now))
        .collect();

    let mut sketch_ids = HashSet::new();
    let sketches = objects(obj.get("sketches"))
        .map(|sketch| sanitize_sketch(sketch, &mut sketch_ids, now))
        .collect();

    Novel {
        id: unique_id(obj, seen),
        title: string(obj, "title"),
        description: string(obj, "description"),
        cover_image: obj
            .get("coverImage")
            .and_then(Value::as_str)
            .filter(|image| !image.is_empty())
            .map(str::to_string),
        tags: tags(obj),
        chapters,
        sketches,
        created_at,
    }
}

fn sanitize_chapter(
    obj: &Map<String, Value>,
    seen: &mut HashSet<String>,
    now: DateTime<Utc>,
) -> Chapter {
    let (created_at, updated_at) = lifecycle(obj, now);
    let content = string(obj, "content");
    let history = objects(obj.get("history"))
        .map(|entry| HistoryEntry {
            timestamp: timestamp(entry, "timestamp").unwrap_or(created_at),
            content: string(entry, "content"),
        })
        .collect();

    Chapter {
        id: unique_id(obj, seen),
        title: string(obj, "title"),
        word_count: stored_word_count(obj, &content),
        content,
        created_at,
        updated_at,
        history,
    }
}

fn sanitize_story_idea(
    obj: &Map<String, Value>,
    seen: &mut HashSet<String>,
    now: DateTime<Utc>,
) -> StoryIdea {
    let (created_at, updated_at) = lifecycle(obj, now);
    let synopsis = string(obj, "synopsis");
    StoryIdea {
        id: unique_id(obj, seen),
        title: string(obj, "title"),
        word_count: stored_word_count(obj, &synopsis),
        synopsis,
        tags: tags(obj),
        status: obj
            .get("status")
            .and_then(Value::as_str)
            .and_then(StoryIdeaStatus::parse)
            .unwrap_or_default(),
        created_at,
        updated_at,
    }
}

fn sanitize_sketch(
    obj: &Map<String, Value>,
    seen: &mut HashSet<String>,
    now: DateTime<Utc>,
) -> NovelSketch {
    let (created_at, updated_at) = lifecycle(obj, now);
    NovelSketch {
        id: unique_id(obj, seen),
        title: string(obj, "title"),
        content: string(obj, "content"),
        tags: tags(obj),
        created_at,
        updated_at,
    }
}

// ── Field helpers ──────────────────────────────────────────────────

/// Iterate the object entries of an array field, skipping anything else.
fn objects(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value.and_then(Value::as_array).into_iter().flatten().filter_map(Value::as_object)
}

fn string(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn tags(obj: &Map<String, Value>) -> Vec<String> {
    obj.get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Keep a valid id that is unique within its collection, or mint a new one.
fn unique_id(obj: &Map<String, Value>, seen: &mut HashSet<String>) -> String {
    let candidate = obj
        .get("id")
        .and_then(|id| match id {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !seen.contains(id));

    let id = candidate.unwrap_or_else(|| Uuid::new_v4().to_string());
    seen.insert(id.clone());
    id
}

/// Accepts RFC 3339 strings and epoch milliseconds. Years outside
/// 0..=9999 are dropped since they would not serialize as RFC 3339.
fn timestamp(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let parsed = match obj.get(key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }?;
    (0..=9999).contains(&parsed.year()).then_some(parsed)
}

/// `createdAt` defaults to now; `updatedAt` never precedes `createdAt`.
fn lifecycle(obj: &Map<String, Value>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let created_at = timestamp(obj, "createdAt").unwrap_or(now);
    let updated_at = timestamp(obj, "updatedAt").unwrap_or(created_at).max(created_at);
    (created_at, updated_at)
}

fn stored_word_count(obj: &Map<String, Value>, content: &str) -> u64 {
    obj.get("wordCount").and_then(Value::as_u64).unwrap_or_else(|| word_count(content))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

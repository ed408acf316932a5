// Core document types persisted as one StoryVerse project.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default editor theme for a fresh project.
pub const DEFAULT_THEME: &str = "dark";
/// Default editor font size in pixels.
pub const DEFAULT_BASE_FONT_SIZE: f64 = 18.0;

/// The root document. Every save persists the whole value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectData {
    pub settings: Settings,
    pub novels: Vec<Novel>,
    pub story_ideas: Vec<StoryIdea>,
}

impl ProjectData {
    /// An empty project as created by "new project".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn novel(&self, novel_id: &str) -> Option<&Novel> {
        self.novels.iter().find(|novel| novel.id == novel_id)
    }

    pub fn story_idea(&self, idea_id: &str) -> Option<&StoryIdea> {
        self.story_ideas.iter().find(|idea| idea.id == idea_id)
    }

    /// Sum of chapter word counts across all novels.
    pub fn total_word_count(&self) -> u64 {
        self.novels
            .iter()
            .flat_map(|novel| novel.chapters.iter())
            .map(|chapter| chapter.word_count)
            .sum()
    }
}

/// Editor preferences stored alongside the manuscript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: String,
    pub base_font_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spellcheck_language: Option<String>,
    /// Serialized as a sorted array.
    pub custom_dictionary: BTreeSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: DEFAULT_THEME.to_string(),
            base_font_size: DEFAULT_BASE_FONT_SIZE,
            spellcheck_language: None,
            custom_dictionary: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Novel {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Opaque encoded image (usually a data URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub tags: Vec<String>,
    pub chapters: Vec<Chapter>,
    pub sketches: Vec<NovelSketch>,
    pub created_at: DateTime<Utc>,
}

impl Novel {
    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.id == chapter_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    /// Rich markup owned by the editor; opaque to the persistence core.
    pub content: String,
    pub word_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only log of earlier contents.
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryIdea {
    pub id: String,
    pub title: String,
    pub synopsis: String,
    pub word_count: u64,
    pub tags: Vec<String>,
    pub status: StoryIdeaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StoryIdeaStatus {
    #[default]
    Seedling,
    Developing,
    Archived,
}

impl StoryIdeaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seedling => "Seedling",
            Self::Developing => "Developing",
            Self::Archived => "Archived",
        }
    }

    /// Parse a status label, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "seedling" => Some(Self::Seedling),
            "developing" => Some(Self::Developing),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NovelSketch {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

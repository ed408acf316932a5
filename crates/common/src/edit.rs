// Entity-level edits that keep the document invariants.
//
// These run inside the engine's updater closure on a cloned document, so a
// failed edit never leaves a partially-updated live value behind.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Chapter, HistoryEntry, Novel, NovelSketch, ProjectData, StoryIdea, StoryIdeaStatus};
use crate::wordcount::word_count;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("novel `{0}` not found")]
    NovelNotFound(String),
    #[error("chapter `{0}` not found")]
    ChapterNotFound(String),
    #[error("sketch `{0}` not found")]
    SketchNotFound(String),
    #[error("story idea `{0}` not found")]
    StoryIdeaNotFound(String),
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// `updatedAt` never moves backwards, even if the wall clock does.
fn touch(updated_at: &mut DateTime<Utc>, now: DateTime<Utc>) {
    if now > *updated_at {
        *updated_at = now;
    }
}

impl ProjectData {
    pub fn add_novel(&mut self, title: &str, description: &str, now: DateTime<Utc>) -> String {
        let id = new_id();
        self.novels.push(Novel {
            id: id.clone(),
            title: title.to_string(),
            description: description.to_string(),
            cover_image: None,
            tags: Vec::new(),
            chapters: Vec::new(),
            sketches: Vec::new(),
            created_at: now,
        });
        id
    }

    pub fn remove_novel(&mut self, novel_id: &str) -> Result<Novel, EditError> {
        let index = self
            .novels
            .iter()
            .position(|novel| novel.id == novel_id)
            .ok_or_else(|| EditError::NovelNotFound(novel_id.to_string()))?;
        Ok(self.novels.remove(index))
    }

    pub fn add_chapter(
        &mut self,
        novel_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<String, EditError> {
        let novel = self.novel_mut(novel_id)?;
        let id = new_id();
        novel.chapters.push(Chapter {
            id: id.clone(),
            title: title.to_string(),
            content: String::new(),
            word_count: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        });
        Ok(id)
    }

    /// Replace a chapter's content, logging the previous version in `history`.
    ///
    /// Writing identical content is a no-op so repeated editor events do not
    /// dirty the document.
    pub fn update_chapter_content(
        &mut self,
        novel_id: &str,
        chapter_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EditError> {
        let chapter = self.chapter_mut(novel_id, chapter_id)?;
        if chapter.content == content {
            return Ok(());
        }

        let previous = std::mem::replace(&mut chapter.content, content.to_string());
        if !previous.is_empty() {
            chapter.history.push(HistoryEntry { timestamp: now, content: previous });
        }
        chapter.word_count = word_count(content);
        touch(&mut chapter.updated_at, now);
        Ok(())
    }

    pub fn rename_chapter(
        &mut self,
        novel_id: &str,
        chapter_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EditError> {
        let chapter = self.chapter_mut(novel_id, chapter_id)?;
        if chapter.title != title {
            chapter.title = title.to_string();
            touch(&mut chapter.updated_at, now);
        }
        Ok(())
    }

    pub fn remove_chapter(&mut self, novel_id: &str, chapter_id: &str) -> Result<Chapter, EditError> {
        let novel = self.novel_mut(novel_id)?;
        let index = novel
            .chapters
            .iter()
            .position(|chapter| chapter.id == chapter_id)
            .ok_or_else(|| EditError::ChapterNotFound(chapter_id.to_string()))?;
        Ok(novel.chapters.remove(index))
    }

    pub fn add_sketch(
        &mut self,
        novel_id: &str,
        title: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<String, EditError> {
        let novel = self.novel_mut(novel_id)?;
        let id = new_id();
        novel.sketches.push(NovelSketch {
            id: id.clone(),
            title: title.to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    pub fn update_sketch_content(
        &mut self,
        novel_id: &str,
        sketch_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EditError> {
        let novel = self.novel_mut(novel_id)?;
        let sketch = novel
            .sketches
            .iter_mut()
            .find(|sketch| sketch.id == sketch_id)
            .ok_or_else(|| EditError::SketchNotFound(sketch_id.to_string()))?;
        if sketch.content != content {
            sketch.content = content.to_string();
            touch(&mut sketch.updated_at, now);
        }
        Ok(())
    }

    pub fn add_story_idea(&mut self, title: &str, synopsis: &str, now: DateTime<Utc>) -> String {
        let id = new_id();
        self.story_ideas.push(StoryIdea {
            id: id.clone(),
            title: title.to_string(),
            synopsis: synopsis.to_string(),
            word_count: word_count(synopsis),
            tags: Vec::new(),
            status: StoryIdeaStatus::Seedling,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn set_story_idea_status(
        &mut self,
        idea_id: &str,
        status: StoryIdeaStatus,
        now: DateTime<Utc>,
    ) -> Result<(), EditError> {
        let idea = self
            .story_ideas
            .iter_mut()
            .find(|idea| idea.id == idea_id)
            .ok_or_else(|| EditError::StoryIdeaNotFound(idea_id.to_string()))?;
        if idea.status != status {
            idea.status = status;
            touch(&mut idea.updated_at, now);
        }
        Ok(())
    }

    pub fn remove_story_idea(&mut self, idea_id: &str) -> Result<StoryIdea, EditError> {
        let index = self
            .story_ideas
            .iter()
            .position(|idea| idea.id == idea_id)
            .ok_or_else(|| EditError::StoryIdeaNotFound(idea_id.to_string()))?;
        Ok(self.story_ideas.remove(index))
    }

    fn novel_mut(&mut self, novel_id: &str) -> Result<&mut Novel, EditError> {
        self.novels
            .iter_mut()
            .find(|novel| novel.id == novel_id)
            .ok_or_else(|| EditError::NovelNotFound(novel_id.to_string()))
    }

    fn chapter_mut(&mut self, novel_id: &str, chapter_id: &str) -> Result<&mut Chapter, EditError> {
        self.novel_mut(novel_id)?
            .chapters
            .iter_mut()
            .find(|chapter| chapter.id == chapter_id)
            .ok_or_else(|| EditError::ChapterNotFound(chapter_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn project_with_chapter() -> (ProjectData, String, String) {
        let mut project = ProjectData::empty();
        let novel_id = project.add_novel("Dune", "Spice", t0());
        let chapter_id = project.add_chapter(&novel_id, "Arrakis", t0()).unwrap();
        (project, novel_id, chapter_id)
    }

    #[test]
    fn add_chapter_to_missing_novel_fails() {
        let mut project = ProjectData::empty();
        let error = project.add_chapter("nope", "One", t0()).unwrap_err();
        assert_eq!(error, EditError::NovelNotFound("nope".into()));
    }

    #[test]
    fn content_update_appends_history_and_recounts_words() {
        let (mut project, novel_id, chapter_id) = project_with_chapter();
        let t1 = t0() + Duration::minutes(1);
        let t2 = t0() + Duration::minutes(2);

        project.update_chapter_content(&novel_id, &chapter_id, "<p>first draft</p>", t1).unwrap();
        project.update_chapter_content(&novel_id, &chapter_id, "<p>second draft here</p>", t2).unwrap();

        let chapter = project.novel(&novel_id).unwrap().chapter(&chapter_id).unwrap();
        assert_eq!(chapter.word_count, 3);
        assert_eq!(chapter.updated_at, t2);
        // The empty initial content is not logged.
        assert_eq!(chapter.history.len(), 1);
        assert_eq!(chapter.history[0].content, "<p>first draft</p>");
        assert_eq!(chapter.history[0].timestamp, t2);
    }

    #[test]
    fn identical_content_is_a_no_op() {
        let (mut project, novel_id, chapter_id) = project_with_chapter();
        project.update_chapter_content(&novel_id, &chapter_id, "same", t0()).unwrap();
        let before = project.clone();

        project
            .update_chapter_content(&novel_id, &chapter_id, "same", t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(project, before);
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let (mut project, novel_id, chapter_id) = project_with_chapter();
        let later = t0() + Duration::hours(2);
        project.rename_chapter(&novel_id, &chapter_id, "Dune", later).unwrap();
        project.rename_chapter(&novel_id, &chapter_id, "Caladan", t0()).unwrap();

        let chapter = project.novel(&novel_id).unwrap().chapter(&chapter_id).unwrap();
        assert_eq!(chapter.title, "Caladan");
        assert_eq!(chapter.updated_at, later);
    }

    #[test]
    fn story_idea_status_transitions() {
        let mut project = ProjectData::empty();
        let id = project.add_story_idea("Heist", "<p>On Mars</p>", t0());
        assert_eq!(project.story_idea(&id).unwrap().word_count, 2);

        project.set_story_idea_status(&id, StoryIdeaStatus::Developing, t0() + Duration::days(1)).unwrap();
        let idea = project.story_idea(&id).unwrap();
        assert_eq!(idea.status, StoryIdeaStatus::Developing);
        assert_eq!(idea.updated_at, t0() + Duration::days(1));

        project.remove_story_idea(&id).unwrap();
        assert!(project.story_ideas.is_empty());
    }

    #[test]
    fn sketches_and_removal() {
        let (mut project, novel_id, chapter_id) = project_with_chapter();
        let sketch_id = project.add_sketch(&novel_id, "Paul", "Heir", t0()).unwrap();
        project.update_sketch_content(&novel_id, &sketch_id, "Kwisatz", t0() + Duration::seconds(5)).unwrap();
        assert_eq!(project.novel(&novel_id).unwrap().sketches[0].content, "Kwisatz");

        project.remove_chapter(&novel_id, &chapter_id).unwrap();
        assert!(project.novel(&novel_id).unwrap().chapters.is_empty());
        project.remove_novel(&novel_id).unwrap();
        assert!(project.novels.is_empty());
    }
}

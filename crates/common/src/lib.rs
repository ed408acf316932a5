// storyverse-common: the project document model shared across StoryVerse crates.

pub mod edit;
pub mod format;
pub mod sanitize;
pub mod types;
pub mod wordcount;

// Word counting over opaque editor markup.

use std::sync::OnceLock;

use regex::Regex;

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

fn entity_pattern() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| Regex::new(r"&(nbsp|#160|#xa0);").expect("entity pattern is valid"))
}

/// Count whitespace-separated words after stripping markup tags.
///
/// Block tags are replaced by a space so `<p>one</p><p>two</p>` counts two
/// words, not one.
pub fn word_count(markup: &str) -> u64 {
    if markup.is_empty() {
        return 0;
    }
    let without_tags = tag_pattern().replace_all(markup, " ");
    let text = entity_pattern().replace_all(&without_tags, " ");
    text.split_whitespace().count() as u64
}

//! Tag extraction and normalization.

use std::collections::BTreeSet;

/// Tag attached to every background image request.
pub const BACKGROUND_TAG: &str = "background";

/// Keyword groups: a prompt mentioning any keyword receives the group tag.
const KEYWORD_GROUPS: &[(&str, &[&str])] = &[
    ("dark", &["dark", "shadow", "night", "black"]),
    ("forest", &["forest", "trees", "woods"]),
    ("building", &["house", "building", "room", "door"]),
    ("atmospheric", &["fog", "mist", "smoke"]),
    ("red", &["red", "blood", "crimson"]),
    ("horror", &["scary", "horror", "creepy", "spooky"]),
    ("abandoned", &["abandoned", "empty", "deserted"]),
    ("corridor", &["corridor", "hallway", "tunnel"]),
];

/// Derive descriptive tags from a prompt.
///
/// Matching is case-insensitive and substring based, so "shadows" counts
/// for "shadow".
pub fn extract_tags(prompt: &str) -> BTreeSet<String> {
    let lowered = prompt.to_lowercase();
    KEYWORD_GROUPS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

/// Normalize a single tag: trimmed, lowercased, inner whitespace as `-`.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let normalized = tag
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    (!normalized.is_empty()).then_some(normalized)
}

/// Normalize a collection of tags, dropping empties and duplicates.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| normalize_tag(tag.as_ref()))
        .collect()
}

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

/// Verbs Czech tender templates use in "to be completed by the bidder" placeholders.
const FILL_VERBS: &str = r"doplní|doplnit|doplňte|vyplní|vyplnit|vyplňte";
const FILL_SUBJECTS: &str = r"účastník|dodavatel|uchazeč|zhotovitel|prodávající|poskytovatel";

/// Text a human still has to complete: bracketed fill instructions, "doplní účastník"
/// phrases, filler punctuation and leftover `{{tags}}`.
pub static UNFILLED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\[\s*(?:{FILL_VERBS}|insert|to be filled)[^\]\n]{{0,80}}\]|\(\s*(?:{FILL_VERBS})[^)\n]{{0,80}}\)|(?:{FILL_VERBS})\s+(?:{FILL_SUBJECTS})|_{{3,}}|\.{{4,}}|…+|\{{\{{\s*[\w.\-]+\s*\}}\}}"
    ))
    .expect("unfilled regex")
});

/// `{{ key }}` template tag; group 1 is the key.
pub static SIMPLE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([\w.\-]+)\s*\}\}").expect("simple tag regex"));

/// Anything that can stand where a value belongs right after a field label.
pub const PLACEHOLDER_PATTERN: &str = r"\[[^\]\n]{0,80}\]|<[^>\n]{0,80}>|\((?:doplní|doplnit|vyplní|vyplnit)[^)\n]{0,80}\)|(?:doplní|vyplní)\s+(?:účastník|dodavatel|uchazeč|zhotovitel|prodávající|poskytovatel)|_{3,}|\.{4,}|…+|x{3,}|\?{3,}";

pub fn find_unfilled(text: &str) -> Vec<Range<usize>> {
    UNFILLED_RE.find_iter(text).map(|m| m.range()).collect()
}

pub fn count_unfilled(text: &str) -> usize {
    UNFILLED_RE.find_iter(text).count()
}

pub fn has_unfilled(text: &str) -> bool {
    UNFILLED_RE.is_match(text)
}

pub fn has_simple_tags(text: &str) -> bool {
    SIMPLE_TAG_RE.is_match(text)
}

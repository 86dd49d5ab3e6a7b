use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Edit, MatchContext, ReplacementRequest};
use crate::docx::entities::{decode, encode};
use crate::docx::splice::Splice;
use crate::textutil::{last_words, minimal_change};

/// Markup between two characters of a tolerant pattern.
const ANY_TAGS: &str = "(?:<[^>]*>)*";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

pub(super) fn encoded(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let needle = encode(&req.original);
    replace_in_text(ctx, &needle, &req.replacement)
}

/// The model sometimes quotes already-encoded markup text (`&amp;`).
pub(super) fn direct(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    if encode(&req.original) == req.original.as_str() {
        return None;
    }
    replace_in_text(ctx, &req.original, &decode(&req.replacement))
}

fn replace_in_text(ctx: &MatchContext<'_>, needle: &str, replacement: &str) -> Option<Edit> {
    if needle.is_empty() {
        return None;
    }
    let range = find_in_text(ctx.markup, needle, 0..ctx.markup.len())?;
    Some(Edit::new(vec![Splice::new(range, encode(replacement))], replacement))
}

/// Matches `original` with arbitrary markup allowed between its characters. The text is
/// replaced while every tag inside the match is kept, in order.
pub(super) fn tolerant(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let original = decode(&req.original);
    let original = original.trim();
    if original.chars().count() < 3 || original.chars().count() > ctx.config.tolerant_max_chars {
        return None;
    }
    let re = tolerant_regex(original)?;
    let replacement = decode(&req.replacement);

    for m in re.find_iter(ctx.markup) {
        let matched = m.as_str();
        if matched.contains("<w:delText") || matched.contains("<w:instrText") {
            continue;
        }
        // Cross-paragraph quotes belong to the multi-paragraph strategy.
        if matched.contains("</w:p>") {
            continue;
        }
        if !in_text_content(ctx.markup, m.start()..m.start()) {
            continue;
        }
        let mut text = encode(&replacement).into_owned();
        for tag in TAG_RE.find_iter(matched) {
            text.push_str(tag.as_str());
        }
        return Some(Edit::new(vec![Splice::new(m.range(), text)], &replacement));
    }
    None
}

/// Replaces only the changed words, searched within a window after an anchor taken from
/// the words preceding the change.
pub(super) fn proximity(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let original = decode(&req.original);
    let replacement = decode(&req.replacement);
    let mc = minimal_change(&original, &replacement)?;
    let needle = encode(mc.old.trim());
    if needle.is_empty() {
        return None;
    }

    for n in (1..=ctx.config.anchor_words).rev() {
        let anchor = last_words(&mc.prefix, n);
        if anchor.chars().count() < 2 {
            continue;
        }
        let Some(re) = tolerant_regex(&anchor) else {
            continue;
        };
        for m in re.find_iter(ctx.markup) {
            let mut end = (m.end() + ctx.config.proximity_window).min(ctx.markup.len());
            while !ctx.markup.is_char_boundary(end) {
                end -= 1;
            }
            if let Some(range) = find_in_text(ctx.markup, &needle, m.end()..end) {
                let new = mc.new.trim();
                log::debug!("proximity anchor {anchor:?} at byte {}", m.start());
                return Some(Edit::new(vec![Splice::new(range, encode(new))], new));
            }
        }
    }
    None
}

fn tolerant_regex(text: &str) -> Option<Regex> {
    let mut pattern = String::new();
    for (i, ch) in text.chars().enumerate() {
        if i > 0 {
            pattern.push_str(ANY_TAGS);
        }
        if ch.is_whitespace() {
            pattern.push_str(r"\s+");
        } else {
            pattern.push_str(&regex::escape(&encode(ch.encode_utf8(&mut [0u8; 4]))));
        }
    }
    Regex::new(&pattern)
        .map_err(|e| log::debug!("tolerant pattern rejected: {e}"))
        .ok()
}

/// First occurrence of `needle` inside `window` that lies in the text content of one `w:t`.
fn find_in_text(markup: &str, needle: &str, window: Range<usize>) -> Option<Range<usize>> {
    let hay = markup.get(window.clone())?;
    hay.match_indices(needle)
        .map(|(at, s)| window.start + at..window.start + at + s.len())
        .find(|r| in_text_content(markup, r.clone()))
}

/// True when `range` sits between a `<w:t ...>` opening tag and its closing tag.
fn in_text_content(markup: &str, range: Range<usize>) -> bool {
    if markup[range.clone()].contains(['<', '>']) {
        return false;
    }
    let before = &markup[..range.start];
    let Some(open) = before.rfind('<') else {
        return false;
    };
    let Some(close) = before[open..].find('>') else {
        return false;
    };
    let tag = &before[open..=open + close];
    if !(tag.starts_with("<w:t>") || tag.starts_with("<w:t ")) || tag.ends_with("/>") {
        return false;
    }
    let after = &markup[range.end..];
    after
        .find('<')
        .is_some_and(|i| after[i..].starts_with("</w:t>"))
}

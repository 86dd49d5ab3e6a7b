use std::ops::Range;

use anyhow::{anyhow, bail};

use super::entities::{decode, encode, raw_offset};
use super::paragraphs::{Paragraph, TextFragment};

/// Replace `range` of the markup with `text` (already encoded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Splice {
    pub range: Range<usize>,
    pub text: String,
}

impl Splice {
    pub fn new(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at..at, text)
    }
}

/// Produces a new buffer with every splice applied. Identical splices collapse into one;
/// overlapping or out-of-bounds splices are an error and leave the input untouched.
pub fn apply_splices(markup: &str, splices: &[Splice]) -> anyhow::Result<String> {
    let mut sorted: Vec<&Splice> = splices.iter().collect();
    sorted.sort_by(|a, b| {
        (a.range.start, a.range.end)
            .cmp(&(b.range.start, b.range.end))
            .then(a.text.cmp(&b.text))
    });
    sorted.dedup();

    let growth: usize = sorted.iter().map(|s| s.text.len()).sum();
    let mut out = String::with_capacity(markup.len() + growth);
    let mut pos = 0usize;
    for s in sorted {
        let Range { start, end } = s.range;
        if start < pos || end < start || end > markup.len() {
            bail!("splice {start}..{end} overlaps or exceeds markup (cursor={pos}, len={})", markup.len());
        }
        if !markup.is_char_boundary(start) || !markup.is_char_boundary(end) {
            return Err(anyhow!("splice {start}..{end} is not on a char boundary"));
        }
        out.push_str(&markup[pos..start]);
        out.push_str(&s.text);
        pos = end;
    }
    out.push_str(&markup[pos..]);
    Ok(out)
}

/// Splices replacing `range` of a paragraph's plain text with `replacement`.
///
/// The first overlapped fragment receives the whole encoded replacement; the overlapped
/// bytes of later fragments are removed. An empty range inserts at that offset.
pub fn splices_for_plain_range(
    markup: &str,
    paragraph: &Paragraph,
    range: Range<usize>,
    replacement: &str,
) -> Option<Vec<Splice>> {
    let frags: Vec<&TextFragment> = if range.is_empty() {
        vec![paragraph.fragment_at(range.start)?]
    } else {
        paragraph.fragments_overlapping(range.clone()).collect()
    };
    let first = *frags.first()?;
    let last = *frags.last()?;

    let start = markup_offset(markup, first, range.start);
    let end = markup_offset(markup, last, range.end);
    let encoded = encode(replacement).into_owned();

    let mut splices: Vec<Splice> = Vec::with_capacity(frags.len() + 2);
    if std::ptr::eq(first, last) {
        splices.push(Splice::new(start..end, encoded));
        let text = spliced_text(markup, first, start..end, replacement);
        splices.extend(preserve_space_splice(markup, first, &text));
        return Some(splices);
    }

    splices.push(Splice::new(start..first.markup_text_end, encoded));
    let head = spliced_text(markup, first, start..first.markup_text_end, replacement);
    splices.extend(preserve_space_splice(markup, first, &head));
    for f in &frags[1..frags.len() - 1] {
        splices.push(Splice::new(f.markup_range(), String::new()));
    }
    splices.push(Splice::new(last.markup_text_start..end, String::new()));
    let tail = spliced_text(markup, last, last.markup_text_start..end, "");
    splices.extend(preserve_space_splice(markup, last, &tail));
    Some(splices)
}

/// Markup byte offset of a plain-text offset that falls within (or at an edge of) `frag`.
fn markup_offset(markup: &str, frag: &TextFragment, plain: usize) -> usize {
    let raw = &markup[frag.markup_range()];
    let local = plain.clamp(frag.plain_start, frag.plain_end) - frag.plain_start;
    frag.markup_text_start + raw_offset(raw, local)
}

/// Decoded text of `frag` after replacing the markup bytes `cut` with `replacement`.
fn spliced_text(markup: &str, frag: &TextFragment, cut: Range<usize>, replacement: &str) -> String {
    let before = decode(&markup[frag.markup_text_start..cut.start]);
    let after = decode(&markup[cut.end..frag.markup_text_end]);
    format!("{before}{replacement}{after}")
}

fn preserve_space_splice(markup: &str, frag: &TextFragment, new_text: &str) -> Option<Splice> {
    let edge_ws = new_text.starts_with(char::is_whitespace) || new_text.ends_with(char::is_whitespace);
    if !edge_ws {
        return None;
    }
    let tag = &markup[frag.open_tag.clone()];
    if tag.contains("xml:space") || !tag.ends_with('>') || tag.ends_with("/>") {
        return None;
    }
    Some(Splice::insert(frag.open_tag.end - 1, r#" xml:space="preserve""#))
}

use std::collections::HashSet;
use std::ops::Range;

/// Whitespace-collapsed, typography-folded view of a string that remembers where each
/// character came from.
#[derive(Clone, Debug, Default)]
pub struct NormalizedText {
    pub text: String,
    /// `(normalized byte offset, source byte range)` for every normalized char.
    spans: Vec<(usize, Range<usize>)>,
}

impl NormalizedText {
    pub fn new(source: &str) -> Self {
        let mut out = Self::default();
        let mut pending_ws: Option<Range<usize>> = None;
        for (i, ch) in source.char_indices() {
            let src = i..i + ch.len_utf8();
            if is_space(ch) {
                pending_ws = Some(match pending_ws {
                    Some(r) => r.start..src.end,
                    None => src,
                });
                continue;
            }
            if let Some(ws) = pending_ws.take() {
                if !out.text.is_empty() {
                    out.push(' ', ws);
                }
            }
            out.push(fold(ch), src);
        }
        out
    }

    fn push(&mut self, ch: char, src: Range<usize>) {
        self.spans.push((self.text.len(), src));
        self.text.push(ch);
    }

    /// Source byte range covered by `range` of the normalized text.
    pub fn source_range(&self, range: Range<usize>) -> Option<Range<usize>> {
        if range.is_empty() {
            return None;
        }
        let first = self.spans.binary_search_by_key(&range.start, |(n, _)| *n).ok()?;
        let last = self
            .spans
            .iter()
            .rposition(|(n, _)| *n < range.end)
            .filter(|&i| i >= first)?;
        Some(self.spans[first].1.start..self.spans[last].1.end)
    }

    /// First occurrence of the (already normalized) needle, as a source range.
    pub fn find(&self, needle: &str) -> Option<Range<usize>> {
        if needle.is_empty() {
            return None;
        }
        let at = self.text.find(needle)?;
        self.source_range(at..at + needle.len())
    }
}

pub fn normalize(text: &str) -> String {
    NormalizedText::new(text).text
}

fn is_space(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '\u{a0}' | '\u{202f}' | '\u{2007}' | '\u{200b}')
}

fn fold(ch: char) -> char {
    match ch {
        '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{00ab}' | '\u{00bb}' => '"',
        '\u{2018}' | '\u{2019}' | '\u{201a}' => '\'',
        '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
        _ => ch,
    }
}

/// Lowercased words with surrounding punctuation stripped.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(is_space)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Share of the distinct tokens of `needle` that also occur in `haystack` (0.0 when `needle` has none).
pub fn token_overlap(needle: &str, haystack: &str) -> f64 {
    let wanted: HashSet<String> = tokens(needle).into_iter().collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let have: HashSet<String> = tokens(haystack).into_iter().collect();
    wanted.iter().filter(|t| have.contains(*t)).count() as f64 / wanted.len() as f64
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinimalChange {
    pub prefix: String,
    pub old: String,
    pub new: String,
    pub suffix: String,
}

/// Trims the common prefix and suffix of `old`/`new`, widened to whole words.
///
/// Returns `None` when the strings are equal or the changed part of `old` is empty even
/// after widening (nothing to locate).
pub fn minimal_change(old: &str, new: &str) -> Option<MinimalChange> {
    if old == new {
        return None;
    }
    let mut prefix = old
        .char_indices()
        .zip(new.chars())
        .find(|((_, a), b)| a != b)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| old.len().min(new.len()));
    // `old` and `new` share `old[..prefix]`, so the same boundary is valid in `new`.
    let max_suffix = old.len().min(new.len()) - prefix;
    let mut suffix = old[prefix..]
        .chars()
        .rev()
        .zip(new[prefix..].chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum::<usize>()
        .min(max_suffix);
    while !old.is_char_boundary(old.len() - suffix) {
        suffix -= 1;
    }

    prefix = old[..prefix]
        .rfind(is_space)
        .map(|i| i + old[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    let tail = &old[old.len() - suffix..];
    suffix = tail.find(is_space).map(|i| tail.len() - i).unwrap_or(0);

    if prefix == old.len() - suffix {
        // Pure insertion at a word gap: pull in the preceding word as context.
        let head = old[..prefix].trim_end_matches(is_space);
        prefix = head
            .rfind(is_space)
            .map(|i| i + head[i..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(0);
    }

    let old_mid = &old[prefix..old.len() - suffix];
    if old_mid.trim().is_empty() {
        return None;
    }
    Some(MinimalChange {
        prefix: old[..prefix].to_string(),
        old: old_mid.to_string(),
        new: new[prefix..new.len() - suffix].to_string(),
        suffix: old[old.len() - suffix..].to_string(),
    })
}

/// Last `n` whitespace-separated words of `text`, joined by single spaces.
pub fn last_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split(is_space).filter(|w| !w.is_empty()).collect();
    words[words.len().saturating_sub(n)..].join(" ")
}

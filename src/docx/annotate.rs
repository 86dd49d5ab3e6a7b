use std::collections::{BTreeSet, HashSet};
use std::ops::Range;

use serde::Serialize;

use super::consolidate::analyze_text_run;
use super::entities::{decode, raw_offset};
use super::paragraphs::{map_tokens, Paragraph};
use super::splice::{apply_splices, Splice};
use super::xml::{subtree_end, tag_attr, tokenize, Token, TokenKind};
use crate::markers::UNFILLED_RE;

/// `w:rPr` children that must come after `w:highlight` (ECMA-376 CT_RPr sequence).
const AFTER_HIGHLIGHT: [&str; 14] = [
    "w:u",
    "w:effect",
    "w:bdr",
    "w:shd",
    "w:fitText",
    "w:vertAlign",
    "w:rtl",
    "w:cs",
    "w:em",
    "w:lang",
    "w:eastAsianLayout",
    "w:specVanish",
    "w:oMath",
    "w:rPrChange",
];

#[derive(Clone, Debug)]
pub struct AnnotateOptions {
    pub review_color: String,
    pub manual_color: String,
    /// Passes allowed without progress; successful markings do not count.
    pub iteration_cap: usize,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            review_color: "yellow".to_string(),
            manual_color: "red".to_string(),
            iteration_cap: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    pub review_highlighted: usize,
    pub manual_marked: usize,
    pub runs_split: usize,
    pub markers_skipped: usize,
    /// Markers still without the manual highlight when annotation finished.
    pub markers_unmarked: usize,
}

pub fn annotate(markup: &str, applied_values: &BTreeSet<String>) -> anyhow::Result<String> {
    Ok(annotate_with(markup, applied_values, &AnnotateOptions::default())?.0)
}

/// Marks the first occurrence of every applied value for review, then every remaining
/// unfilled marker for manual input.
pub fn annotate_with(
    markup: &str,
    applied_values: &BTreeSet<String>,
    opts: &AnnotateOptions,
) -> anyhow::Result<(String, AnnotationStats)> {
    let mut stats = AnnotationStats::default();
    let mut markup = markup.to_string();

    for value in applied_values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let tokens = tokenize(&markup)?;
        let paragraphs = map_tokens(&markup, &tokens);
        let Some((p, range)) = paragraphs
            .iter()
            .find_map(|p| p.plain_text.find(value).map(|at| (p, at..at + value.len())))
        else {
            log::debug!("applied value not found for review highlight: {value:?}");
            continue;
        };
        let splices = highlight_overlapped_runs(&markup, &tokens, p, range, &opts.review_color);
        if splices.is_empty() {
            continue;
        }
        markup = apply_splices(&markup, &splices)?;
        stats.review_highlighted += 1;
    }

    let markers: usize = map_tokens(&markup, &tokenize(&markup)?)
        .iter()
        .map(|p| UNFILLED_RE.find_iter(&p.plain_text).count())
        .sum();
    // Each marker needs at most a split and a re-highlight.
    let pass_limit = 2 * markers + opts.iteration_cap;
    let mut skipped: HashSet<(usize, usize)> = HashSet::new();
    let mut stalled = 0usize;
    let mut passes = 0usize;
    loop {
        if stalled >= opts.iteration_cap || passes >= pass_limit {
            log::warn!("annotation stopped after {passes} passes ({stalled} without progress)");
            break;
        }
        passes += 1;

        let tokens = tokenize(&markup)?;
        let paragraphs = map_tokens(&markup, &tokens);
        let Some((p, range)) = next_unmarked(&markup, &tokens, &paragraphs, &skipped, &opts.manual_color)
        else {
            break;
        };

        let (splices, split) = match isolate_marker(&markup, &tokens, p, range.clone(), &opts.manual_color) {
            Some(splice) => (vec![splice], true),
            None => (
                highlight_overlapped_runs(&markup, &tokens, p, range.clone(), &opts.manual_color),
                false,
            ),
        };
        let patched = if splices.is_empty() {
            None
        } else {
            apply_splices(&markup, &splices).ok().filter(|m| *m != markup)
        };
        match patched {
            Some(next) => {
                markup = next;
                stats.manual_marked += 1;
                if split {
                    stats.runs_split += 1;
                }
            }
            None => {
                skipped.insert((p.index, range.start));
                stats.markers_skipped += 1;
                stalled += 1;
            }
        }
    }

    let tokens = tokenize(&markup)?;
    let paragraphs = map_tokens(&markup, &tokens);
    stats.markers_unmarked = count_unmarked(&markup, &tokens, &paragraphs, &opts.manual_color);
    if stats.markers_unmarked > 0 {
        log::warn!(
            "{} unfilled marker(s) could not be highlighted for manual input",
            stats.markers_unmarked
        );
    }

    log::debug!(
        "annotated: {} review, {} manual ({} split), {} skipped, {} unmarked",
        stats.review_highlighted,
        stats.manual_marked,
        stats.runs_split,
        stats.markers_skipped,
        stats.markers_unmarked
    );
    Ok((markup, stats))
}

fn next_unmarked<'p>(
    markup: &str,
    tokens: &[Token],
    paragraphs: &'p [Paragraph],
    skipped: &HashSet<(usize, usize)>,
    color: &str,
) -> Option<(&'p Paragraph, Range<usize>)> {
    paragraphs.iter().find_map(|p| {
        UNFILLED_RE
            .find_iter(&p.plain_text)
            .filter(|m| !skipped.contains(&(p.index, m.start())))
            .find(|m| !is_marked(markup, tokens, p, m.range(), color))
            .map(|m| (p, m.range()))
    })
}

fn count_unmarked(markup: &str, tokens: &[Token], paragraphs: &[Paragraph], color: &str) -> usize {
    paragraphs
        .iter()
        .map(|p| {
            UNFILLED_RE
                .find_iter(&p.plain_text)
                .filter(|m| !is_marked(markup, tokens, p, m.range(), color))
                .count()
        })
        .sum()
}

fn is_marked(markup: &str, tokens: &[Token], p: &Paragraph, range: Range<usize>, color: &str) -> bool {
    p.fragments_overlapping(range).all(|f| {
        enclosing_run(tokens, f.open_tag.start)
            .and_then(|run| run_highlight(markup, tokens, run))
            .is_some_and(|c| c == color)
    })
}

fn highlight_overlapped_runs(
    markup: &str,
    tokens: &[Token],
    p: &Paragraph,
    range: Range<usize>,
    color: &str,
) -> Vec<Splice> {
    let mut runs: Vec<usize> = p
        .fragments_overlapping(range)
        .filter_map(|f| enclosing_run(tokens, f.open_tag.start))
        .collect();
    runs.dedup();
    runs.into_iter()
        .filter_map(|run| highlight_run(markup, tokens, run, color))
        .collect()
}

/// Splits a single-text run around the marker so only the marker carries the highlight.
fn isolate_marker(
    markup: &str,
    tokens: &[Token],
    p: &Paragraph,
    range: Range<usize>,
    color: &str,
) -> Option<Splice> {
    let frags: Vec<_> = p.fragments_overlapping(range.clone()).collect();
    let [frag] = frags.as_slice() else {
        return None;
    };
    let run_idx = enclosing_run(tokens, frag.open_tag.start)?;
    let run = analyze_text_run(markup, tokens, run_idx)?;
    if run.text != frag.markup_range() {
        return None;
    }

    let raw = &markup[run.text.clone()];
    let a = raw_offset(raw, range.start - frag.plain_start);
    let b = raw_offset(raw, range.end - frag.plain_start);
    let open = &markup[run.open_tag.clone()];
    let rpr = run.rpr.clone().map(|r| &markup[r]);

    let mut out = String::new();
    for (part, highlight) in [(&raw[..a], false), (&raw[a..b], true), (&raw[b..], false)] {
        if part.is_empty() {
            continue;
        }
        out.push_str(open);
        if highlight {
            out.push_str(&rpr_with_highlight(rpr, color).ok()?);
        } else if let Some(rpr) = rpr {
            out.push_str(rpr);
        }
        let text = decode(part);
        if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
            out.push_str(r#"<w:t xml:space="preserve">"#);
        } else {
            out.push_str("<w:t>");
        }
        out.push_str(part);
        out.push_str("</w:t></w:r>");
    }
    Some(Splice::new(run.span, out))
}

/// Token index of the innermost `w:r` that contains the token starting at `pos`.
fn enclosing_run(tokens: &[Token], pos: usize) -> Option<usize> {
    let idx = tokens.binary_search_by_key(&pos, |t| t.span.start).ok()?;
    let mut depth = 0usize;
    for i in (0..idx).rev() {
        let t = &tokens[i];
        match t.kind {
            TokenKind::End => depth += 1,
            TokenKind::Start if depth > 0 => depth -= 1,
            TokenKind::Start if t.name == "w:r" => return Some(i),
            TokenKind::Start if t.name == "w:p" => return None,
            _ => {}
        }
    }
    None
}

/// Span of the run's direct `w:rPr` child, if any.
fn run_properties(tokens: &[Token], run: usize) -> Option<Range<usize>> {
    let end = subtree_end(tokens, run);
    let mut i = run + 1;
    while i + 1 < end {
        let t = &tokens[i];
        if t.opens("w:rPr") {
            let rpr_end = subtree_end(tokens, i);
            return Some(t.span.start..tokens[rpr_end - 1].span.end);
        }
        if matches!(t.kind, TokenKind::Start | TokenKind::Empty) {
            return None;
        }
        i += 1;
    }
    None
}

fn run_highlight(markup: &str, tokens: &[Token], run: usize) -> Option<String> {
    let rpr = run_properties(tokens, run)?;
    let start = rpr.start;
    let inner = tokens.binary_search_by_key(&start, |t| t.span.start).ok()?;
    tokens[inner..subtree_end(tokens, inner)]
        .iter()
        .find(|t| t.opens("w:highlight"))
        .and_then(|t| tag_attr(&markup[t.span.clone()], "w:val"))
}

fn highlight_run(markup: &str, tokens: &[Token], run: usize, color: &str) -> Option<Splice> {
    match run_properties(tokens, run) {
        Some(rpr) => {
            let updated = rpr_with_highlight(Some(&markup[rpr.clone()]), color).ok()?;
            Some(Splice::new(rpr, updated))
        }
        None => {
            let at = tokens.get(run)?.span.end;
            Some(Splice::insert(at, rpr_with_highlight(None, color).ok()?))
        }
    }
}

/// `w:rPr` markup with its highlight set to `color`, keeping schema order.
pub(crate) fn rpr_with_highlight(rpr: Option<&str>, color: &str) -> anyhow::Result<String> {
    let hl = format!(r#"<w:highlight w:val="{color}"/>"#);
    let Some(rpr) = rpr else {
        return Ok(format!("<w:rPr>{hl}</w:rPr>"));
    };
    let tokens = tokenize(rpr)?;
    let Some(open) = tokens.first() else {
        return Ok(format!("<w:rPr>{hl}</w:rPr>"));
    };
    if open.kind == TokenKind::Empty {
        let head = rpr.trim_end_matches('>').trim_end_matches('/').trim_end();
        return Ok(format!("{head}>{hl}</w:rPr>"));
    }

    let end = subtree_end(&tokens, 0);
    let mut i = 1usize;
    while i + 1 < end {
        let t = &tokens[i];
        if matches!(t.kind, TokenKind::Start | TokenKind::Empty) {
            let child_end = subtree_end(&tokens, i);
            if t.name == "w:highlight" {
                let span = t.span.start..tokens[child_end - 1].span.end;
                return apply_splices(rpr, &[Splice::new(span, hl)]);
            }
            if AFTER_HIGHLIGHT.contains(&t.name.as_str()) {
                return apply_splices(rpr, &[Splice::insert(t.span.start, hl)]);
            }
            i = child_end;
            continue;
        }
        i += 1;
    }
    let close = tokens[end - 1].span.start;
    apply_splices(rpr, &[Splice::insert(close, hl)])
}

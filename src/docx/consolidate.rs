use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::entities::decode;
use super::splice::{apply_splices, Splice};
use super::xml::{subtree_end, tag_attr, tokenize, Token, TokenKind};

pub const DEFAULT_IGNORABLE_ELEMENTS: [&str; 5] = [
    "w:proofErr",
    "w:bookmarkStart",
    "w:bookmarkEnd",
    "w:permStart",
    "w:permEnd",
];

#[derive(Clone, Debug, Deserialize)]
pub struct ConsolidateRules {
    /// Paragraph-level markers that may sit between two mergeable runs and are dropped on merge.
    #[serde(default = "default_ignorable_elements")]
    pub ignorable_elements: Vec<String>,
}

impl Default for ConsolidateRules {
    fn default() -> Self {
        Self {
            ignorable_elements: default_ignorable_elements(),
        }
    }
}

fn default_ignorable_elements() -> Vec<String> {
    DEFAULT_IGNORABLE_ELEMENTS.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub groups: usize,
    pub runs_merged: usize,
    /// Runs merged into a predecessor with different run properties.
    pub lossy_merges: usize,
    pub ignorables_dropped: usize,
}

/// A `w:r` holding nothing but optional `w:rPr` and a single `w:t`.
#[derive(Clone, Debug)]
pub(crate) struct TextRun {
    pub span: Range<usize>,
    pub open_tag: Range<usize>,
    pub rpr: Option<Range<usize>>,
    /// Encoded text content (empty range for `<w:t/>`).
    pub text: Range<usize>,
    pub fingerprint: Vec<String>,
    pub preserve: bool,
}

/// An ignorable element sitting between two runs of a merge group.
#[derive(Clone, Debug)]
struct Marker {
    span: Range<usize>,
    open_tag: Range<usize>,
    name: String,
}

/// Merges adjacent plain-text runs inside each paragraph using the default rules.
pub fn consolidate(markup: &str) -> anyhow::Result<String> {
    Ok(consolidate_with_rules(markup, &ConsolidateRules::default())?.0)
}

pub fn consolidate_with_rules(
    markup: &str,
    rules: &ConsolidateRules,
) -> anyhow::Result<(String, MergeStats)> {
    let tokens = tokenize(markup)?;
    let ignorable: HashSet<&str> = rules.ignorable_elements.iter().map(|s| s.as_str()).collect();

    let mut stats = MergeStats::default();
    let mut splices: Vec<Splice> = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut group: Vec<TextRun> = Vec::new();
    let mut markers: Vec<Marker> = Vec::new();
    let mut pending: Vec<Marker> = Vec::new();

    let mut i = 0usize;
    while i < tokens.len() {
        let tok = &tokens[i];
        if stack.last() == Some(&"w:p") {
            if tok.is_start("w:r") {
                let end = subtree_end(&tokens, i);
                match analyze_text_run(markup, &tokens, i) {
                    Some(run) => {
                        if group.is_empty() {
                            pending.clear();
                        } else {
                            markers.append(&mut pending);
                        }
                        group.push(run);
                    }
                    None => {
                        flush_group(markup, &mut group, &mut markers, &mut splices, &mut stats);
                        pending.clear();
                    }
                }
                i = end;
                continue;
            }
            let is_ignorable = matches!(tok.kind, TokenKind::Start | TokenKind::Empty)
                && ignorable.contains(tok.name.as_str());
            if is_ignorable {
                let end = subtree_end(&tokens, i);
                pending.push(Marker {
                    span: tok.span.start..tokens[end - 1].span.end,
                    open_tag: tok.span.clone(),
                    name: tok.name.clone(),
                });
                i = end;
                continue;
            }
            if tok.is_whitespace_text(markup) {
                i += 1;
                continue;
            }
            flush_group(markup, &mut group, &mut markers, &mut splices, &mut stats);
            pending.clear();
        }

        match tok.kind {
            TokenKind::Start => stack.push(tok.name.as_str()),
            TokenKind::End => {
                stack.pop();
            }
            _ => {}
        }
        i += 1;
    }
    flush_group(markup, &mut group, &mut markers, &mut splices, &mut stats);

    if splices.is_empty() {
        return Ok((markup.to_string(), stats));
    }
    log::debug!(
        "consolidated {} run groups ({} runs, {} lossy, {} markers dropped)",
        stats.groups,
        stats.runs_merged,
        stats.lossy_merges,
        stats.ignorables_dropped
    );
    Ok((apply_splices(markup, &splices)?, stats))
}

fn flush_group(
    markup: &str,
    group: &mut Vec<TextRun>,
    markers: &mut Vec<Marker>,
    splices: &mut Vec<Splice>,
    stats: &mut MergeStats,
) {
    if group.len() >= 2 {
        let first = &group[0];
        let last = &group[group.len() - 1];
        stats.groups += 1;
        stats.runs_merged += group.len();
        stats.lossy_merges += group[1..]
            .iter()
            .filter(|r| r.fingerprint != first.fingerprint)
            .count();

        let kept = unpaired_markers(markup, markers);
        stats.ignorables_dropped += markers.len() - kept.len();
        let mut merged = render_merged(markup, group);
        for m in kept {
            merged.push_str(&markup[m.span.clone()]);
        }
        splices.push(Splice::new(first.span.start..last.span.end, merged));
    }
    group.clear();
    markers.clear();
}

/// Start/end markers (bookmarks, permissions) whose partner with the same `w:id` lies
/// outside the group. They are re-emitted after the merged run.
fn unpaired_markers<'m>(markup: &str, markers: &'m [Marker]) -> Vec<&'m Marker> {
    let keys: Vec<Option<(&str, bool, String)>> = markers
        .iter()
        .map(|m| {
            let (base, is_start) = match m.name.strip_suffix("Start") {
                Some(base) => (base, true),
                None => (m.name.strip_suffix("End")?, false),
            };
            let id = tag_attr(&markup[m.open_tag.clone()], "w:id")?;
            Some((base, is_start, id))
        })
        .collect();
    markers
        .iter()
        .zip(&keys)
        .filter(|(_, key)| {
            let Some((base, is_start, id)) = key else {
                return false;
            };
            !keys
                .iter()
                .flatten()
                .any(|(b, s, i)| b == base && s != is_start && i == id)
        })
        .map(|(m, _)| m)
        .collect()
}

fn render_merged(markup: &str, group: &[TextRun]) -> String {
    let first = &group[0];
    let text: String = group.iter().map(|r| &markup[r.text.clone()]).collect();
    let decoded = decode(&text);
    let preserve = group.iter().any(|r| r.preserve)
        || decoded.starts_with(char::is_whitespace)
        || decoded.ends_with(char::is_whitespace);

    let mut out = String::with_capacity(text.len() + 64);
    out.push_str(&markup[first.open_tag.clone()]);
    if let Some(rpr) = first.rpr.clone() {
        out.push_str(&markup[rpr]);
    }
    out.push_str(if preserve {
        r#"<w:t xml:space="preserve">"#
    } else {
        "<w:t>"
    });
    out.push_str(&text);
    out.push_str("</w:t></w:r>");
    out
}

pub(crate) fn analyze_text_run(markup: &str, tokens: &[Token], start: usize) -> Option<TextRun> {
    let open = tokens.get(start)?;
    if !open.is_start("w:r") {
        return None;
    }
    let end = subtree_end(tokens, start);
    if end <= start + 1 || !tokens[end - 1].is_end("w:r") {
        return None;
    }

    let mut rpr: Option<Range<usize>> = None;
    let mut fingerprint: Vec<String> = Vec::new();
    let mut text: Option<Range<usize>> = None;
    let mut preserve = false;

    let mut i = start + 1;
    while i < end - 1 {
        let tok = &tokens[i];
        match tok.kind {
            TokenKind::Text if tok.is_whitespace_text(markup) => {
                i += 1;
            }
            TokenKind::Empty if tok.name == "w:rPr" && rpr.is_none() && text.is_none() => {
                rpr = Some(tok.span.clone());
                i += 1;
            }
            TokenKind::Start if tok.name == "w:rPr" && rpr.is_none() && text.is_none() => {
                let rpr_end = subtree_end(tokens, i);
                for inner in &tokens[i + 1..rpr_end - 1] {
                    if inner.kind != TokenKind::Text {
                        fingerprint.push(markup[inner.span.clone()].to_string());
                    }
                }
                rpr = Some(tok.span.start..tokens[rpr_end - 1].span.end);
                i = rpr_end;
            }
            TokenKind::Empty if tok.name == "w:t" && text.is_none() => {
                text = Some(tok.span.end..tok.span.end);
                i += 1;
            }
            TokenKind::Start if tok.name == "w:t" && text.is_none() => {
                let t_end = subtree_end(tokens, i);
                let inner = &tokens[i + 1..t_end - 1];
                if inner.iter().any(|t| t.kind != TokenKind::Text) {
                    return None;
                }
                preserve = tag_attr(&markup[tok.span.clone()], "xml:space").as_deref() == Some("preserve");
                text = Some(tok.span.end..tokens[t_end - 1].span.start);
                i = t_end;
            }
            _ => return None,
        }
    }

    Some(TextRun {
        span: open.span.start..tokens[end - 1].span.end,
        open_tag: open.span.clone(),
        rpr,
        text: text?,
        fingerprint,
        preserve,
    })
}

#[cfg(test)]
mod tests {
    use super::{consolidate, consolidate_with_rules, ConsolidateRules};
    use crate::docx::paragraphs::build_paragraph_map;

    #[test]
    fn no_mergeable_runs_is_a_byte_identical_noop() {
        let doc = concat!(
            r#"<w:body><w:p w:rsidR="00AB"><w:r><w:rPr><w:b /></w:rPr><w:t>Label:</w:t></w:r>"#,
            r#"<w:r><w:tab/></w:r><w:r><w:t xml:space='preserve'> &quot;x&quot; </w:t></w:r></w:p>"#,
            "\n  <w:p/></w:body>"
        );
        assert_eq!(consolidate(doc).expect("consolidate"), doc);
    }

    #[test]
    fn merges_through_bookmarks_and_proof_marks() {
        let doc = concat!(
            r#"<w:p><w:r w:rsidR="1"><w:rPr><w:i/></w:rPr><w:t>dopl</w:t></w:r>"#,
            r#"<w:proofErr w:type="spellStart"/><w:bookmarkStart w:id="0" w:name="a"/>"#,
            r#"<w:r w:rsidR="2"><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">ní </w:t></w:r>"#,
            r#"<w:bookmarkEnd w:id="0"/><w:r><w:t>účastník</w:t></w:r></w:p>"#
        );
        let (out, stats) =
            consolidate_with_rules(doc, &ConsolidateRules::default()).expect("consolidate");
        assert_eq!(
            out,
            r#"<w:p><w:r w:rsidR="1"><w:rPr><w:i/></w:rPr><w:t xml:space="preserve">doplní účastník</w:t></w:r></w:p>"#
        );
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.runs_merged, 3);
        assert_eq!(stats.lossy_merges, 2);
        assert_eq!(stats.ignorables_dropped, 3);

        let paras = build_paragraph_map(&out).expect("map");
        assert_eq!(paras[0].text_fragments.len(), 1);
    }

    #[test]
    fn non_text_runs_break_the_chain() {
        let doc = concat!(
            "<w:p><w:r><w:t>a</w:t></w:r><w:r><w:t>b</w:t></w:r>",
            "<w:r><w:br/></w:r>",
            "<w:r><w:t>c</w:t></w:r><w:hyperlink><w:r><w:t>d</w:t></w:r></w:hyperlink>",
            "<w:r><w:t>e</w:t></w:r></w:p>"
        );
        let out = consolidate(doc).expect("consolidate");
        assert_eq!(
            out,
            concat!(
                "<w:p><w:r><w:t>ab</w:t></w:r>",
                "<w:r><w:br/></w:r>",
                "<w:r><w:t>c</w:t></w:r><w:hyperlink><w:r><w:t>d</w:t></w:r></w:hyperlink>",
                "<w:r><w:t>e</w:t></w:r></w:p>"
            )
        );
    }

    #[test]
    fn keeps_bookmark_whose_end_lies_outside_the_merge() {
        let doc = concat!(
            "<w:p><w:r><w:t>a</w:t></w:r>",
            r#"<w:bookmarkStart w:id="0" w:name="x"/><w:proofErr w:type="spellStart"/>"#,
            "<w:r><w:t>b</w:t></w:r><w:r><w:tab/></w:r>",
            r#"<w:bookmarkEnd w:id="0"/></w:p>"#
        );
        let (out, stats) =
            consolidate_with_rules(doc, &ConsolidateRules::default()).expect("consolidate");
        assert_eq!(
            out,
            concat!(
                "<w:p><w:r><w:t>ab</w:t></w:r>",
                r#"<w:bookmarkStart w:id="0" w:name="x"/>"#,
                "<w:r><w:tab/></w:r>",
                r#"<w:bookmarkEnd w:id="0"/></w:p>"#
            )
        );
        assert_eq!(stats.ignorables_dropped, 1);
    }
}

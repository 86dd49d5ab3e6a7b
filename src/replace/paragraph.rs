use std::ops::Range;

use super::{Edit, MatchContext, ReplacementRequest};
use crate::docx::entities::decode;
use crate::docx::paragraphs::Paragraph;
use crate::docx::splice::{splices_for_plain_range, Splice};
use crate::textutil::{last_words, minimal_change, normalize, token_overlap, NormalizedText};

pub(super) fn exact(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    ctx.paragraphs.iter().find_map(|p| {
        let at = p.plain_text.find(&req.original)?;
        let splices =
            splices_for_plain_range(ctx.markup, p, at..at + req.original.len(), &req.replacement)?;
        Some(Edit::new(splices, &req.replacement))
    })
}

pub(super) fn normalized(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let needle = normalize(&decode(&req.original));
    if needle.is_empty() {
        return None;
    }
    let replacement = decode(&req.replacement);
    ctx.paragraphs.iter().find_map(|p| {
        let range = NormalizedText::new(&p.plain_text).find(&needle)?;
        let splices = splices_for_plain_range(ctx.markup, p, range, &replacement)?;
        Some(Edit::new(splices, &replacement))
    })
}

/// `original` quotes several paragraphs: find them in order, then patch only what changed.
pub(super) fn multi_paragraph(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    if !req.original.contains('\n') {
        return None;
    }
    let lines: Vec<&str> = req
        .original
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return None;
    }
    let located = locate_lines(ctx, &lines)?;

    let mc = minimal_change(&req.original, &req.replacement);
    if let Some(mc) = mc.filter(|mc| !mc.old.contains('\n')) {
        // Line of `original` the change sits in.
        let prefix_lines = mc.prefix.lines().filter(|l| !l.trim().is_empty()).count();
        let line_idx = if mc.prefix.ends_with('\n') || mc.prefix.trim().is_empty() {
            prefix_lines
        } else {
            prefix_lines.saturating_sub(1)
        };
        let (p, window) = located.get(line_idx)?.clone();
        let line_prefix = mc.prefix.rsplit('\n').next().unwrap_or("");
        let anchor = last_words(line_prefix, ctx.config.anchor_words);
        let splices = edit_in_paragraph(ctx, p, window, &anchor, &mc.old, &mc.new)?;
        return Some(Edit::new(splices, &mc.new));
    }

    // The change spans lines: patch line by line.
    let new_lines: Vec<&str> = req
        .replacement
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if new_lines.len() != lines.len() {
        return None;
    }
    let mut splices = Vec::new();
    let mut applied = Vec::new();
    for ((old, new), (p, window)) in lines.iter().zip(&new_lines).zip(&located) {
        let Some(mc) = minimal_change(old, new) else {
            continue;
        };
        let anchor = last_words(&mc.prefix, ctx.config.anchor_words);
        splices.extend(edit_in_paragraph(ctx, p, window.clone(), &anchor, &mc.old, &mc.new)?);
        let new = mc.new.trim();
        if !new.is_empty() {
            applied.push(new.to_string());
        }
    }
    if splices.is_empty() {
        return None;
    }
    Some(Edit {
        splices,
        applied_text: applied,
    })
}

/// Places each line in document order: in the same paragraph after the previous line, or
/// in one of the next `multi_paragraph_gap + 1` paragraphs.
fn locate_lines<'p>(
    ctx: &MatchContext<'p>,
    lines: &[&str],
) -> Option<Vec<(&'p Paragraph, Range<usize>)>> {
    let paragraphs = ctx.paragraphs;
    'start: for (first_idx, first) in paragraphs.iter().enumerate() {
        let Some(r) = locate_in(&first.plain_text, lines[0], 0) else {
            continue;
        };
        let mut found = vec![(first, r.clone())];
        let (mut cur, mut cur_end) = (first_idx, r.end);
        for line in &lines[1..] {
            let last = (cur + ctx.config.multi_paragraph_gap + 1).min(paragraphs.len() - 1);
            let hit = (cur..=last).find_map(|j| {
                let from = if j == cur { cur_end } else { 0 };
                locate_in(&paragraphs[j].plain_text, line, from).map(|r| (j, r))
            });
            let Some((j, r)) = hit else {
                continue 'start;
            };
            cur = j;
            cur_end = r.end;
            found.push((&paragraphs[j], r));
        }
        return Some(found);
    }
    None
}

/// Paragraph sharing enough words with `original`, patched with the minimal change.
pub(super) fn fuzzy(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let threshold = ctx.config.fuzzy_token_threshold;
    let mut best: Option<(&Paragraph, f64)> = None;
    for p in ctx.paragraphs.iter().filter(|p| !p.is_blank()) {
        let score = token_overlap(&req.original, &p.plain_text);
        if score >= threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((p, score));
        }
    }
    let (p, score) = best?;
    let mc = minimal_change(&req.original, &req.replacement)?;
    let anchor = last_words(&mc.prefix, ctx.config.anchor_words);
    let splices = edit_in_paragraph(ctx, p, 0..p.plain_text.len(), &anchor, &mc.old, &mc.new)?;
    log::debug!("fuzzy match in paragraph {} (overlap {score:.2})", p.index);
    Some(Edit::new(splices, &mc.new))
}

/// Replaces `old` with `new` inside `window` of the paragraph, preferring the occurrence
/// right after `anchor`.
fn edit_in_paragraph(
    ctx: &MatchContext<'_>,
    p: &Paragraph,
    window: Range<usize>,
    anchor: &str,
    old: &str,
    new: &str,
) -> Option<Vec<Splice>> {
    let text = &p.plain_text;
    let anchored_from = if anchor.is_empty() {
        None
    } else {
        locate_in(text, anchor, window.start)
            .filter(|r| r.end <= window.end)
            .map(|r| r.end)
    };
    let within = |r: &Range<usize>| r.end <= window.end;
    let range = anchored_from
        .and_then(|from| locate_in(text, old, from).filter(within))
        .or_else(|| locate_in(text, old, window.start).filter(within))?;
    splices_for_plain_range(ctx.markup, p, range, new)
}

/// First occurrence of `needle` in `text[from..]`: exact, then whitespace-normalized.
fn locate_in(text: &str, needle: &str, from: usize) -> Option<Range<usize>> {
    let hay = text.get(from..)?;
    if needle.is_empty() {
        return None;
    }
    if let Some(at) = hay.find(needle) {
        return Some(from + at..from + at + needle.len());
    }
    let needle = normalize(needle);
    let r = NormalizedText::new(hay).find(&needle)?;
    Some(from + r.start..from + r.end)
}

#[cfg(test)]
mod tests {
    use crate::docx::paragraphs::build_paragraph_map;
    use crate::replace::{LabelValues, MatchConfig, ReplacementRequest, Replacer, Snapshot, Strategy};

    fn doc(paragraphs: &[&str]) -> String {
        paragraphs
            .iter()
            .map(|t| format!("<w:p><w:r><w:t xml:space=\"preserve\">{t}</w:t></w:r></w:p>"))
            .collect()
    }

    fn apply(markup: String, req: ReplacementRequest) -> (Vec<String>, Option<Strategy>) {
        let cfg = MatchConfig::default();
        let labels = LabelValues::default();
        let (snap, outcome) = Replacer::new(&cfg, &labels).apply(Snapshot::new(markup).expect("snap"), &req);
        let texts = build_paragraph_map(snap.markup())
            .expect("map")
            .into_iter()
            .map(|p| p.plain_text)
            .collect();
        (texts, outcome.strategy)
    }

    #[test]
    fn quoted_paragraphs_patch_only_the_changed_line() {
        let markup = doc(&[
            "Obchodní firma: Alfa s.r.o.",
            "",
            "Sídlo: [doplní účastník]",
            "IČO: 12345678",
        ]);
        let (texts, strategy) = apply(
            markup,
            ReplacementRequest::new(
                "Obchodní firma: Alfa s.r.o.\nSídlo: [doplní účastník]",
                "Obchodní firma: Alfa s.r.o.\nSídlo: Praha 1, Na Příkopě 5",
            ),
        );
        assert_eq!(strategy, Some(Strategy::MultiParagraph));
        assert_eq!(texts[2], "Sídlo: Praha 1, Na Příkopě 5");
        assert_eq!(texts[0], "Obchodní firma: Alfa s.r.o.");
        assert_eq!(texts[3], "IČO: 12345678");
    }

    #[test]
    fn changes_on_several_lines_patch_each_line() {
        let markup = doc(&["Telefon: ____", "E-mail: ____"]);
        let (texts, strategy) = apply(
            markup,
            ReplacementRequest::new("Telefon: ____\nE-mail: ____", "Telefon: 777 123 456\nE-mail: a@b.cz"),
        );
        assert_eq!(strategy, Some(Strategy::MultiParagraph));
        assert_eq!(texts, vec!["Telefon: 777 123 456", "E-mail: a@b.cz"]);
    }

    #[test]
    fn paraphrased_original_falls_back_to_token_overlap() {
        let markup = doc(&[
            "Účastník prohlašuje, že je plátcem DPH: [ANO/NE] a předkládá nabídku.",
            "Jiný odstavec.",
        ]);
        let (texts, strategy) = apply(
            markup,
            ReplacementRequest::new(
                "Účastník prohlašuje že je plátcem DPH: [ANO/NE] a předkládá nabídku",
                "Účastník prohlašuje že je plátcem DPH: ANO a předkládá nabídku",
            ),
        );
        assert_eq!(strategy, Some(Strategy::FuzzyTokens));
        assert_eq!(
            texts[0],
            "Účastník prohlašuje, že je plátcem DPH: ANO a předkládá nabídku."
        );
    }
}

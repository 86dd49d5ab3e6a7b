use std::ops::Range;

use serde::Serialize;

use super::entities::decode;
use super::xml::{tokenize, Token, TokenKind};

/// One decoded run of visible text inside a paragraph.
///
/// `decode(markup[markup_text_start..markup_text_end]) == paragraph.plain_text[plain_start..plain_end]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TextFragment {
    pub plain_start: usize,
    pub plain_end: usize,
    pub markup_text_start: usize,
    pub markup_text_end: usize,
    /// Span of the `<w:t ...>` opening tag that owns this text.
    pub open_tag: Range<usize>,
}

impl TextFragment {
    pub fn plain_range(&self) -> Range<usize> {
        self.plain_start..self.plain_end
    }

    pub fn markup_range(&self) -> Range<usize> {
        self.markup_text_start..self.markup_text_end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Paragraph {
    pub index: usize,
    pub plain_text: String,
    pub text_fragments: Vec<TextFragment>,
    pub markup_start: usize,
    pub markup_end: usize,
}

impl Paragraph {
    /// Fragments sharing at least one plain-text byte with `range`.
    pub fn fragments_overlapping(&self, range: Range<usize>) -> impl Iterator<Item = &TextFragment> {
        self.text_fragments
            .iter()
            .filter(move |f| f.plain_end > range.start && f.plain_start < range.end)
    }

    /// Fragment an insertion at `offset` lands in (end of the previous fragment wins at a boundary).
    pub fn fragment_at(&self, offset: usize) -> Option<&TextFragment> {
        self.text_fragments
            .iter()
            .find(|f| f.plain_start <= offset && offset <= f.plain_end)
    }

    pub fn is_blank(&self) -> bool {
        self.plain_text.trim().is_empty()
    }
}

struct ParagraphCapture {
    markup_start: usize,
    plain_text: String,
    fragments: Vec<TextFragment>,
    open_text_tag: Option<Range<usize>>,
}

impl ParagraphCapture {
    fn new(markup_start: usize) -> Self {
        Self {
            markup_start,
            plain_text: String::new(),
            fragments: Vec::new(),
            open_text_tag: None,
        }
    }

    fn push_text(&mut self, raw: &str, span: Range<usize>) {
        let Some(open_tag) = self.open_text_tag.clone() else {
            return;
        };
        let decoded = decode(raw);
        if decoded.is_empty() {
            return;
        }
        let plain_start = self.plain_text.len();
        self.plain_text.push_str(&decoded);
        let plain_end = self.plain_text.len();

        if let Some(last) = self.fragments.last_mut() {
            if last.markup_text_end == span.start && last.open_tag == open_tag {
                last.markup_text_end = span.end;
                last.plain_end = plain_end;
                return;
            }
        }
        self.fragments.push(TextFragment {
            plain_start,
            plain_end,
            markup_text_start: span.start,
            markup_text_end: span.end,
            open_tag,
        });
    }

    fn finish(self, markup_end: usize) -> Paragraph {
        Paragraph {
            index: 0,
            plain_text: self.plain_text,
            text_fragments: self.fragments,
            markup_start: self.markup_start,
            markup_end,
        }
    }
}

pub fn build_paragraph_map(markup: &str) -> anyhow::Result<Vec<Paragraph>> {
    let tokens = tokenize(markup)?;
    Ok(map_tokens(markup, &tokens))
}

/// Same as [`build_paragraph_map`] for callers that already hold the token stream.
pub fn map_tokens(markup: &str, tokens: &[Token]) -> Vec<Paragraph> {
    let mut open: Vec<ParagraphCapture> = Vec::new();
    let mut done: Vec<Paragraph> = Vec::new();
    let mut fallback_depth = 0usize;

    for tok in tokens {
        if tok.is_start("mc:Fallback") {
            fallback_depth += 1;
            continue;
        }
        if tok.is_end("mc:Fallback") {
            fallback_depth = fallback_depth.saturating_sub(1);
            continue;
        }
        if fallback_depth > 0 {
            continue;
        }

        match tok.kind {
            TokenKind::Start if tok.name == "w:p" => {
                open.push(ParagraphCapture::new(tok.span.start));
            }
            TokenKind::Empty if tok.name == "w:p" => {
                done.push(ParagraphCapture::new(tok.span.start).finish(tok.span.end));
            }
            TokenKind::End if tok.name == "w:p" => {
                if let Some(cap) = open.pop() {
                    done.push(cap.finish(tok.span.end));
                }
            }
            TokenKind::Start if tok.name == "w:t" => {
                if let Some(cap) = open.last_mut() {
                    cap.open_text_tag = Some(tok.span.clone());
                }
            }
            TokenKind::End if tok.name == "w:t" => {
                if let Some(cap) = open.last_mut() {
                    cap.open_text_tag = None;
                }
            }
            TokenKind::Text => {
                if let Some(cap) = open.last_mut() {
                    cap.push_text(&markup[tok.span.clone()], tok.span.clone());
                }
            }
            _ => {}
        }
    }

    if !open.is_empty() {
        log::debug!("{} unterminated paragraph(s) ignored", open.len());
    }

    done.sort_by_key(|p| p.markup_start);
    for (i, p) in done.iter_mut().enumerate() {
        p.index = i;
    }
    done
}

/// Paragraph texts joined with newlines, in document order.
pub fn plain_text(paragraphs: &[Paragraph]) -> String {
    paragraphs
        .iter()
        .map(|p| p.plain_text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

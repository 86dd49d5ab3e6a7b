use std::ops::Range;

use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Start,
    End,
    Empty,
    Text,
    /// Declarations, comments, processing instructions, CDATA, doctype.
    Other,
}

/// One lexical unit of the markup. Every byte of the input belongs to exactly one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub name: String,
    pub span: Range<usize>,
}

impl Token {
    pub fn is_start(&self, name: &str) -> bool {
        self.kind == TokenKind::Start && self.name == name
    }

    pub fn is_end(&self, name: &str) -> bool {
        self.kind == TokenKind::End && self.name == name
    }

    pub fn is_empty_elem(&self, name: &str) -> bool {
        self.kind == TokenKind::Empty && self.name == name
    }

    /// Start or empty element with the given name.
    pub fn opens(&self, name: &str) -> bool {
        matches!(self.kind, TokenKind::Start | TokenKind::Empty) && self.name == name
    }

    pub fn is_whitespace_text(&self, markup: &str) -> bool {
        self.kind == TokenKind::Text
            && markup[self.span.clone()].chars().all(|c| c.is_whitespace())
    }
}

pub fn tokenize(markup: &str) -> anyhow::Result<Vec<Token>> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut tokens: Vec<Token> = Vec::new();
    loop {
        let start = reader.buffer_position() as usize;
        let ev = reader
            .read_event()
            .with_context(|| format!("read xml event at byte {start}"))?;
        let end = reader.buffer_position() as usize;
        let (kind, name) = match ev {
            Event::Eof => break,
            Event::Start(s) => (TokenKind::Start, bytes_to_string(s.name().as_ref())),
            Event::End(e) => (TokenKind::End, bytes_to_string(e.name().as_ref())),
            Event::Empty(s) => (TokenKind::Empty, bytes_to_string(s.name().as_ref())),
            Event::Text(_) => (TokenKind::Text, String::new()),
            _ => (TokenKind::Other, String::new()),
        };
        tokens.push(Token {
            kind,
            name,
            span: start..end,
        });
    }
    Ok(tokens)
}

/// Index one past the element opened at `start` (a `Start` or `Empty` token).
pub fn subtree_end(tokens: &[Token], start: usize) -> usize {
    if tokens
        .get(start)
        .map(|t| t.kind != TokenKind::Start)
        .unwrap_or(true)
    {
        return (start + 1).min(tokens.len());
    }
    let mut depth = 0i32;
    let mut i = start;
    while i < tokens.len() {
        match tokens[i].kind {
            TokenKind::Start => depth += 1,
            TokenKind::End => depth -= 1,
            _ => {}
        }
        i += 1;
        if depth == 0 {
            break;
        }
    }
    i
}

/// Raw (still escaped) attribute value of a start/empty tag slice such as `<w:highlight w:val="red"/>`.
pub fn tag_attr(tag: &str, key: &str) -> Option<String> {
    let inner = tag
        .strip_prefix('<')?
        .trim_end_matches('>')
        .trim_end_matches('/');
    let name_len = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let start = BytesStart::from_content(inner, name_len);
    for a in start.attributes().with_checks(false).flatten() {
        if a.key.as_ref() == key.as_bytes() {
            return Some(bytes_to_string(a.value.as_ref()));
        }
    }
    None
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{subtree_end, tag_attr, tokenize, TokenKind};

    #[test]
    fn tokens_cover_every_byte() {
        let xml = r#"<?xml version="1.0"?><w:p><w:r><w:t xml:space="preserve"> a &amp; b</w:t></w:r><w:r/></w:p>"#;
        let tokens = tokenize(xml).expect("tokenize");
        let mut pos = 0usize;
        for t in &tokens {
            assert_eq!(t.span.start, pos);
            pos = t.span.end;
        }
        assert_eq!(pos, xml.len());

        let text = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Text)
            .expect("text token");
        assert_eq!(&xml[text.span.clone()], " a &amp; b");
    }

    #[test]
    fn subtree_end_skips_nested_elements() {
        let xml = "<w:p><w:r><w:t>x</w:t></w:r><w:r/></w:p>";
        let tokens = tokenize(xml).expect("tokenize");
        let r = tokens.iter().position(|t| t.is_start("w:r")).expect("run");
        let end = subtree_end(&tokens, r);
        assert!(tokens[end - 1].is_end("w:r"));
        assert!(tokens[end].is_empty_elem("w:r"));
    }

    #[test]
    fn reads_raw_attribute_values() {
        let tag = r#"<w:highlight w:val="yellow"/>"#;
        assert_eq!(tag_attr(tag, "w:val").as_deref(), Some("yellow"));
        assert_eq!(tag_attr(tag, "w:color"), None);
    }
}

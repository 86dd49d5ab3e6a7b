//! Canonical encode/decode for text content inside `w:t`.
//!
//! All plain-text offsets in the paragraph map are produced by [`decode`], and all
//! plain-to-markup offset translation goes through [`raw_offset`], which walks the
//! same units. Nothing else in the crate interprets entity references.

use std::borrow::Cow;

use quick_xml::escape::{partial_escape, resolve_predefined_entity};

/// Escapes `&`, `<` and `>` for use as element text.
pub fn encode(text: &str) -> Cow<'_, str> {
    partial_escape(text)
}

pub fn decode(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    for unit in Units::new(raw) {
        match unit.decoded {
            Some(ch) => out.push(ch),
            None => out.push_str(&raw[unit.raw.clone()]),
        }
    }
    Cow::Owned(out)
}

/// Byte offset in `raw` corresponding to byte offset `plain_offset` of `decode(raw)`.
///
/// Offsets that fall inside a decoded character snap to the start of its unit.
pub fn raw_offset(raw: &str, plain_offset: usize) -> usize {
    let mut plain = 0usize;
    for unit in Units::new(raw) {
        if plain >= plain_offset {
            return unit.raw.start;
        }
        plain += unit.decoded_len();
        if plain > plain_offset {
            return unit.raw.start;
        }
    }
    raw.len()
}

struct Unit {
    raw: std::ops::Range<usize>,
    /// `None` means the raw bytes are kept literally (plain character or unknown reference).
    decoded: Option<char>,
}

impl Unit {
    fn decoded_len(&self) -> usize {
        match self.decoded {
            Some(ch) => ch.len_utf8(),
            None => self.raw.len(),
        }
    }
}

struct Units<'a> {
    raw: &'a str,
    pos: usize,
}

impl<'a> Units<'a> {
    fn new(raw: &'a str) -> Self {
        Self { raw, pos: 0 }
    }
}

impl Iterator for Units<'_> {
    type Item = Unit;

    fn next(&mut self) -> Option<Unit> {
        let rest = &self.raw[self.pos..];
        let ch = rest.chars().next()?;
        let start = self.pos;
        if ch == '&' {
            if let Some(semi) = rest[1..].find(';').filter(|&i| i <= 10) {
                let name = &rest[1..1 + semi];
                if let Some(decoded) = resolve_reference(name) {
                    self.pos += semi + 2;
                    return Some(Unit {
                        raw: start..self.pos,
                        decoded: Some(decoded),
                    });
                }
            }
        }
        self.pos += ch.len_utf8();
        Some(Unit {
            raw: start..self.pos,
            decoded: None,
        })
    }
}

fn resolve_reference(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    resolve_predefined_entity(name).and_then(|s| s.chars().next())
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, raw_offset};

    #[test]
    fn decodes_predefined_and_numeric_references() {
        assert_eq!(
            decode("a &amp; b &lt;c&gt; &quot;d&quot; &apos;e&apos;"),
            "a & b <c> \"d\" 'e'"
        );
        assert_eq!(decode("&#268;&#x10D;"), "Čč");
    }

    #[test]
    fn keeps_unknown_references_literally() {
        assert_eq!(decode("R&D; &nbsp; & done"), "R&D; &nbsp; & done");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let s = "Smith & Wesson <s.r.o.> \"quoted\"";
        assert_eq!(decode(&encode(s)), s);
        assert_eq!(encode(s), "Smith &amp; Wesson &lt;s.r.o.&gt; \"quoted\"");
    }

    #[test]
    fn maps_plain_offsets_back_to_raw_offsets() {
        let raw = "A&amp;B č&lt;";
        let plain = decode(raw);
        assert_eq!(plain, "A&B č<");
        assert_eq!(raw_offset(raw, 0), 0);
        assert_eq!(raw_offset(raw, 1), 1);
        assert_eq!(raw_offset(raw, 2), 6);
        assert_eq!(raw_offset(raw, plain.find('č').expect("č")), 8);
        assert_eq!(raw_offset(raw, plain.len()), raw.len());
    }
}

use std::collections::HashMap;

use super::paragraphs::build_paragraph_map;
use super::splice::{apply_splices, splices_for_plain_range};
use crate::markers::SIMPLE_TAG_RE;

#[derive(Clone, Debug, Default)]
pub struct TagFill {
    pub markup: String,
    /// Values written into the document, in document order.
    pub filled: Vec<String>,
    /// Keys with no value; their tags are left in place.
    pub missing: Vec<String>,
}

/// Substitutes every `{{ key }}` tag found in paragraph text, including tags split across runs.
///
/// Keys are matched case-insensitively against `values` (whose keys must be lowercase).
pub fn fill_simple_tags(markup: &str, values: &HashMap<String, String>) -> anyhow::Result<TagFill> {
    let paragraphs = build_paragraph_map(markup)?;
    let mut splices = Vec::new();
    let mut out = TagFill::default();

    for p in &paragraphs {
        for caps in SIMPLE_TAG_RE.captures_iter(&p.plain_text) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let key = key.as_str().to_lowercase();
            let Some(value) = values.get(&key) else {
                if !out.missing.contains(&key) {
                    out.missing.push(key);
                }
                continue;
            };
            match splices_for_plain_range(markup, p, whole.range(), value) {
                Some(s) => {
                    splices.extend(s);
                    out.filled.push(value.clone());
                }
                None => log::debug!("tag {{{{{key}}}}} in paragraph {} has no text fragment", p.index),
            }
        }
    }

    out.markup = if splices.is_empty() {
        markup.to_string()
    } else {
        apply_splices(markup, &splices)?
    };
    Ok(out)
}

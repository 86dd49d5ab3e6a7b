use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::docx::package::DocxPackage;
use crate::docx::paragraphs::{build_paragraph_map, Paragraph};
use crate::markers::count_unfilled;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PureFragment {
    pub plain_start: usize,
    pub plain_end: usize,
    pub markup_start: usize,
    pub markup_end: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PureParagraph {
    pub index: usize,
    pub text: String,
    pub unfilled: usize,
    pub fragments: Vec<PureFragment>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PureTextJson {
    pub version: u32,
    pub paragraphs: Vec<PureParagraph>,
}

pub struct PureTextOutputs {
    pub text_json_path: PathBuf,
}

impl From<&Paragraph> for PureParagraph {
    fn from(p: &Paragraph) -> Self {
        Self {
            index: p.index,
            text: p.plain_text.clone(),
            unfilled: count_unfilled(&p.plain_text),
            fragments: p
                .text_fragments
                .iter()
                .map(|f| PureFragment {
                    plain_start: f.plain_start,
                    plain_end: f.plain_end,
                    markup_start: f.markup_text_start,
                    markup_end: f.markup_text_end,
                })
                .collect(),
        }
    }
}

pub fn pure_text_from_markup(markup: &str) -> anyhow::Result<PureTextJson> {
    let paragraphs = build_paragraph_map(markup)?;
    Ok(PureTextJson {
        version: 1,
        paragraphs: paragraphs.iter().map(PureParagraph::from).collect(),
    })
}

pub fn extract_pure_text(input_docx: &Path) -> anyhow::Result<PureTextJson> {
    let pkg = DocxPackage::read(input_docx)?;
    let markup = pkg.main_document()?;
    pure_text_from_markup(&markup).with_context(|| format!("map paragraphs: {}", input_docx.display()))
}

pub fn extract_pure_text_json(input_docx: &Path, output_json: &Path) -> anyhow::Result<()> {
    let out = extract_pure_text(input_docx)?;
    fs::write(
        output_json,
        serde_json::to_vec_pretty(&out).context("serialize pure text json")?,
    )
    .with_context(|| format!("write pure text json: {}", output_json.display()))?;
    Ok(())
}

pub fn default_text_output_for(input_docx: &Path) -> PureTextOutputs {
    let stem = input_docx
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("docx");
    let dir = input_docx.parent().unwrap_or_else(|| Path::new("."));
    PureTextOutputs {
        text_json_path: dir.join(format!("{stem}.text.json")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{default_text_output_for, pure_text_from_markup};

    #[test]
    fn reports_fragments_and_unfilled_markers() {
        let markup = concat!(
            r#"<w:p><w:r><w:t xml:space="preserve">Sídlo: </w:t></w:r>"#,
            r#"<w:r><w:t>__________</w:t></w:r></w:p>"#
        );
        let json = pure_text_from_markup(markup).expect("json");
        let p = &json.paragraphs[0];
        assert_eq!(p.text, "Sídlo: __________");
        assert_eq!(p.unfilled, 1);
        assert_eq!(p.fragments.len(), 2);
        let f = &p.fragments[1];
        assert_eq!(&markup[f.markup_start..f.markup_end], "__________");
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let out = default_text_output_for(Path::new("/tmp/forms/krycí list.docx"));
        assert_eq!(out.text_json_path, Path::new("/tmp/forms/krycí list.text.json"));
    }
}

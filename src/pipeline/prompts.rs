use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use super::data::FillData;
use crate::config::{AppConfig, PromptsSection};
use crate::docx::paragraphs::Paragraph;
use crate::proposals::ProposalRound;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_FILL: &str = "fill.txt";
pub const DEFAULT_FILL_STRICT: &str = "fill_strict.txt";

#[derive(Clone, Debug)]
pub struct PromptSet {
    pub fill: String,
    pub fill_strict: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            fill: DEFAULT_FILL_TEXT.to_string(),
            fill_strict: DEFAULT_FILL_STRICT_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in prompts, overridden per key by files named in `[prompts]`.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        let defaults = Self::default();
        Ok(Self {
            fill: read_prompt(config_dir, p, "fill")?.unwrap_or(defaults.fill),
            fill_strict: read_prompt(config_dir, p, "fill_strict")?.unwrap_or(defaults.fill_strict),
        })
    }

    pub fn template(&self, round: ProposalRound) -> &str {
        match round {
            ProposalRound::First => &self.fill,
            ProposalRound::Strict => &self.fill_strict,
        }
    }
}

fn read_prompt(config_dir: &Path, p: &PromptsSection, key: &str) -> anyhow::Result<Option<String>> {
    let configured = match key {
        "fill" => p.fill.clone(),
        "fill_strict" => p.fill_strict.clone(),
        other => return Err(anyhow!("unknown prompt key: {other}")),
    };
    let Some(path) = configured.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let mut p = PathBuf::from(path);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: tender-fill --init-config)",
            p.display()
        ));
    }
    let text = std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(Some(text))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// One `[P0001] text` line per non-blank paragraph.
pub fn paragraph_block(paragraphs: &[Paragraph]) -> String {
    let mut out = String::new();
    for p in paragraphs.iter().filter(|p| !p.is_blank()) {
        out.push_str(&format!("[P{:04}] {}\n", p.index + 1, p.plain_text));
    }
    out
}

pub fn build_prompt(
    prompts: &PromptSet,
    round: ProposalRound,
    paragraphs: &[Paragraph],
    data: &FillData,
    unfilled: usize,
) -> anyhow::Result<String> {
    let company = serde_json::to_string_pretty(&data.company).context("serialize company")?;
    let tender = serde_json::to_string_pretty(&data.tender).context("serialize tender")?;
    let extra = serde_json::to_string_pretty(&data.extra).context("serialize extra")?;
    let unfilled = unfilled.to_string();
    let block = paragraph_block(paragraphs);
    Ok(render_template(
        prompts.template(round),
        &[
            ("company_json", &company),
            ("tender_json", &tender),
            ("extra_json", &extra),
            ("unfilled_count", &unfilled),
            ("paragraphs", &block),
        ],
    ))
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_FILL, DEFAULT_FILL_TEXT),
        (DEFAULT_FILL_STRICT, DEFAULT_FILL_STRICT_TEXT),
    ]
}

pub const DEFAULT_FILL_TEXT: &str = r#"You fill in a Czech public tender form on behalf of the bidder.

Rules:
- Find every place where the bidder must supply information: bracketed notes such as
  [doplní účastník], (vyplní dodavatel), <doplnit>, runs of underscores, dots or ellipses.
- Use ONLY the data below. If a value is not in the data, leave that placeholder alone.
- "original" must be copied EXACTLY from one paragraph (without the [P0001] prefix),
  long enough to be unique: include the label before the placeholder.
- "replacement" is the same text with the placeholder replaced by the value.
- Do NOT rewrite the rest of the sentence.

Return STRICT JSON only, a list:
[{"original": "IČO: [doplní účastník]", "replacement": "IČO: 12345678"}]

COMPANY:
{{company_json}}

TENDER:
{{tender_json}}

OTHER:
{{extra_json}}

DOCUMENT:
{{paragraphs}}"#;

pub const DEFAULT_FILL_STRICT_TEXT: &str = r#"The tender form below still contains {{unfilled_count}} unfilled places.
Fill in only those that the data covers.

Rules:
- "original" must be an EXACT copy of text from ONE paragraph (no [P0001] prefix).
- Keep "original" short: the label plus the placeholder, nothing else.
- "replacement" differs from "original" only where the placeholder was.
- Skip placeholders the data does not cover. Never invent values.

Return STRICT JSON only, a list:
[{"original": "...", "replacement": "..."}]

COMPANY:
{{company_json}}

TENDER:
{{tender_json}}

OTHER:
{{extra_json}}

DOCUMENT:
{{paragraphs}}"#;

#[cfg(test)]
mod tests {
    use super::{build_prompt, paragraph_block, render_template, PromptSet};
    use crate::config::parse_config;
    use crate::docx::paragraphs::build_paragraph_map;
    use crate::pipeline::data::FillData;
    use crate::proposals::ProposalRound;

    #[test]
    fn renders_known_variables_only() {
        let out = render_template("{{a}} and {{b}} and {{c}}", &[("a", "1"), ("b", "2")]);
        assert_eq!(out, "1 and 2 and {{c}}");
    }

    #[test]
    fn prompt_lists_indexed_paragraphs_and_data() {
        let markup = concat!(
            r#"<w:p><w:r><w:t>Krycí list</w:t></w:r></w:p><w:p/>"#,
            r#"<w:p><w:r><w:t>IČO: [doplní účastník]</w:t></w:r></w:p>"#
        );
        let paragraphs = build_paragraph_map(markup).expect("map");
        assert_eq!(paragraph_block(&paragraphs), "[P0001] Krycí list\n[P0003] IČO: [doplní účastník]\n");

        let mut data = FillData::default();
        data.company.registration_number = "07023987".to_string();
        let prompt =
            build_prompt(&PromptSet::default(), ProposalRound::Strict, &paragraphs, &data, 4).expect("prompt");
        assert!(prompt.contains("still contains 4 unfilled"));
        assert!(prompt.contains("\"registration_number\": \"07023987\""));
        assert!(prompt.contains("[P0003] IČO: [doplní účastník]"));
    }

    #[test]
    fn configured_prompt_file_overrides_default_and_missing_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = dir.path().join("tender-fill.toml");
        std::fs::create_dir_all(dir.path().join("prompts")).expect("mkdir");
        std::fs::write(dir.path().join("prompts/fill.txt"), "custom {{paragraphs}}").expect("write");

        let cfg = parse_config("[prompts]\nfill = \"prompts/fill.txt\"\n").expect("cfg");
        let set = PromptSet::load(&cfg_path, &cfg).expect("load");
        assert_eq!(set.fill, "custom {{paragraphs}}");
        assert_eq!(set.fill_strict, PromptSet::default().fill_strict);

        let cfg = parse_config("[prompts]\nfill_strict = \"prompts/missing.txt\"\n").expect("cfg");
        assert!(PromptSet::load(&cfg_path, &cfg).is_err());
    }
}

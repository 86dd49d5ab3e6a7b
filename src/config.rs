use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::docx::consolidate::ConsolidateRules;
use crate::proposals::ProposerConfig;
use crate::replace::MatchConfig;

pub const CONFIG_FILENAME: &str = "tender-fill.toml";
pub const CONFIG_ENV: &str = "TENDER_FILL_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub fill: FillSection,
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub consolidate: ConsolidateRules,
    #[serde(default)]
    pub proposer: ProposerConfig,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub classify: ClassifySection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FillSection {
    /// Merge adjacent same-run text fragments before matching.
    #[serde(default)]
    pub consolidate_runs: Option<bool>,
    /// A second proposal round runs when at least this many unfilled markers remain.
    #[serde(default)]
    pub second_pass_min_markers: Option<usize>,
    #[serde(default)]
    pub review_color: Option<String>,
    #[serde(default)]
    pub manual_color: Option<String>,
    #[serde(default)]
    pub annotation_iteration_cap: Option<usize>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub fill_strict: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ClassifySection {
    #[serde(default)]
    pub max_per_category: Option<usize>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV, CONFIG_FILENAME};
use crate::docx::annotate::AnnotateOptions;
use crate::docx::consolidate::ConsolidateRules;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::proposals::ProposerConfig;
use crate::replace::MatchConfig;

/// Fully resolved settings for one fill run.
#[derive(Clone, Debug)]
pub struct FillConfig {
    pub config_path: PathBuf,

    pub consolidate_runs: bool,
    pub second_pass_min_markers: usize,
    pub max_per_category: usize,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,

    pub matching: MatchConfig,
    pub consolidate: ConsolidateRules,
    pub annotate: AnnotateOptions,
    pub proposer: ProposerConfig,
    pub prompts: PromptSet,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self::from_app_config(PathBuf::from(CONFIG_FILENAME), Path::new("."), &AppConfig::default(), PromptSet::default())
    }
}

impl FillConfig {
    /// `--config`, then `TENDER_FILL_CONFIG`, then a `tender-fill.toml` found upwards.
    /// Without any file the built-in defaults apply.
    pub fn from_paths_and_args(
        input: &Path,
        output: &Path,
        config_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                log::info!("config: {}", p.display());
            } else {
                log::warn!("config file not found, using defaults: {}", p.display());
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));

        let output_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| workdir.clone());

        let prompts = PromptSet::load(&cfg_path, &file_cfg).context("load prompts")?;
        Ok(Self::from_app_config(cfg_path, &output_dir, &file_cfg, prompts))
    }

    pub fn from_app_config(
        config_path: PathBuf,
        output_dir: &Path,
        file_cfg: &AppConfig,
        prompts: PromptSet,
    ) -> Self {
        let fill = &file_cfg.fill;
        let trace_dir = fill.trace_dir.clone().unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            output_dir.join(trace_dir)
        };

        let defaults = AnnotateOptions::default();
        let annotate = AnnotateOptions {
            review_color: fill.review_color.clone().unwrap_or(defaults.review_color),
            manual_color: fill.manual_color.clone().unwrap_or(defaults.manual_color),
            iteration_cap: fill
                .annotation_iteration_cap
                .unwrap_or(defaults.iteration_cap)
                .max(1),
        };

        Self {
            config_path,
            consolidate_runs: fill.consolidate_runs.unwrap_or(true),
            second_pass_min_markers: fill.second_pass_min_markers.unwrap_or(3).max(1),
            max_per_category: file_cfg.classify.max_per_category.unwrap_or(4).max(1),
            trace_dir,
            trace_prompts: fill.trace_prompts.unwrap_or(false),
            matching: file_cfg.matching.clone(),
            consolidate: file_cfg.consolidate.clone(),
            annotate,
            proposer: file_cfg.proposer.clone(),
            prompts,
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[fill]
consolidate_runs = true
# A second, stricter proposal round runs when at least this many unfilled markers remain.
second_pass_min_markers = 3
review_color = "yellow"
manual_color = "red"
annotation_iteration_cap = 500

trace_dir = "_trace"
trace_prompts = false

[matching]
fuzzy_token_threshold = 0.8
# Bytes of markup searched after an anchor phrase.
proximity_window = 400
multi_paragraph_gap = 2
tolerant_max_chars = 300
anchor_words = 3

[consolidate]
ignorable_elements = [
  "w:proofErr",
  "w:bookmarkStart",
  "w:bookmarkEnd",
  "w:permStart",
  "w:permEnd",
]

[proposer]
# The command reads the prompt on stdin and prints JSON proposals on stdout.
# TENDER_FILL_ROUND and TENDER_FILL_TEMPERATURE are set in its environment.
# command = "llm"
# args = ["-m", "gpt-4o-mini"]
max_attempts = 3
backoff_ms = 500
# Seconds per attempt before the command is killed; 0 waits forever.
timeout_secs = 300
temperature = 0.3
strict_temperature = 0.0

[prompts]
fill = "prompts/fill.txt"
fill_strict = "prompts/fill_strict.txt"

[classify]
max_per_category = 4
"#;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{init_default_config, FillConfig};
    use crate::config::load_config;

    #[test]
    fn init_writes_loadable_config_and_prompts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = init_default_config(dir.path(), false).expect("init");
        assert!(dir.path().join("prompts/fill.txt").exists());
        assert!(dir.path().join("prompts/fill_strict.txt").exists());

        std::fs::write(dir.path().join("prompts/fill.txt"), "edited").expect("edit");
        init_default_config(dir.path(), false).expect("re-init");
        assert_eq!(std::fs::read_to_string(dir.path().join("prompts/fill.txt")).expect("read"), "edited");

        let input = dir.path().join("form.docx");
        let cfg = FillConfig::from_paths_and_args(&input, &dir.path().join("out/form_filled.docx"), Some(cfg_path.clone()))
            .expect("resolve");
        assert_eq!(cfg.prompts.fill, "edited");
        assert_eq!(cfg.second_pass_min_markers, 3);
        assert_eq!(cfg.annotate.review_color, "yellow");
        assert!(cfg.trace_dir.ends_with(Path::new("out/_trace")));

        let app = load_config(&cfg_path).expect("load");
        assert_eq!(app.consolidate.ignorable_elements.len(), 5);
    }

    #[test]
    fn defaults_without_any_file() {
        let cfg = FillConfig::default();
        assert!(cfg.consolidate_runs);
        assert_eq!(cfg.max_per_category, 4);
        assert_eq!(cfg.annotate.iteration_cap, 500);
        assert!(!cfg.trace_prompts);
    }
}

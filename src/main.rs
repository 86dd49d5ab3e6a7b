use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};

use tender_fill::classify::classify_dir;
use tender_fill::docx::pure_text::extract_pure_text_json;
use tender_fill::pipeline::{
    consolidate_template, init_default_config, BatchJob, FillConfig, FillData, TemplateFiller,
};
use tender_fill::progress::ConsoleProgress;
use tender_fill::proposals::{CommandProposer, Proposer, ReplayProposer, UnconfiguredProposer};

#[derive(Parser, Debug)]
#[command(name = "tender-fill")]
#[command(about = "Fill bidder placeholders in tender .docx templates", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Template .docx files
    #[arg(value_name = "DOCX")]
    templates: Vec<PathBuf>,

    /// Fill data JSON (company, tender, extra)
    #[arg(long, value_name = "JSON")]
    data: Option<PathBuf>,

    /// Output .docx (default: <stem>_filled.docx); a directory when several templates are given
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Recorded proposal responses, one per round (instead of the proposer command)
    #[arg(long, value_name = "JSON")]
    proposals: Vec<PathBuf>,

    /// Write the fill report as JSON
    #[arg(long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// Config file path (default: search for tender-fill.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Classify the templates in DIR and print the result as JSON
    #[arg(long, value_name = "DIR")]
    classify_dir: Option<PathBuf>,

    /// Extract the paragraph map JSON of the (single) template, then exit
    #[arg(long, value_name = "JSON")]
    extract_text_json: Option<PathBuf>,

    /// Only merge fragmented runs, then exit (no proposals)
    #[arg(long)]
    consolidate_only: bool,
}

fn default_output_for(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let name = format!("{stem}_filled.docx");
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

fn build_proposer(args: &Args, cfg: &FillConfig) -> anyhow::Result<Box<dyn Proposer>> {
    if !args.proposals.is_empty() {
        return Ok(Box::new(ReplayProposer::from_files(&args.proposals)?));
    }
    if let Some(p) = CommandProposer::from_config(&cfg.proposer) {
        return Ok(Box::new(p));
    }
    log::warn!("no proposer configured; templates without {{{{tags}}}} will fail");
    Ok(Box::new(UnconfiguredProposer))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(dir) = args.classify_dir.as_ref() {
        let cfg = FillConfig::from_paths_and_args(&dir.join("."), dir, args.config.clone())
            .context("build config")?;
        let result = classify_dir(dir, cfg.max_per_category)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize classification")?
        );
        return Ok(());
    }

    let Some(first) = args.templates.first().cloned() else {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nUSAGE:\n  tender-fill <template.docx>... --data company.json\n\nTIPS:\n  - Default config search: tender-fill.toml (upwards), or set TENDER_FILL_CONFIG.\n  - Run with --init-config to write an editable config and prompts.\n"
        );
        return Ok(());
    };

    if let Some(text_json) = args.extract_text_json.as_ref() {
        extract_pure_text_json(&first, text_json)?;
        return Ok(());
    }

    let batch = args.templates.len() > 1;
    let jobs: Vec<BatchJob> = args
        .templates
        .iter()
        .map(|input| BatchJob {
            input: input.clone(),
            output: match (&args.output, batch) {
                (Some(dir), true) => default_output_for(input, Some(dir)),
                (Some(out), false) => out.clone(),
                (None, _) => default_output_for(input, None),
            },
        })
        .collect();

    let cfg = FillConfig::from_paths_and_args(&first, &jobs[0].output, args.config.clone())
        .context("build config")?;

    if args.consolidate_only {
        for job in &jobs {
            let stats = consolidate_template(&job.input, &job.output, &cfg)?;
            progress.info(format!(
                "{}: merged {} run(s) in {} group(s)",
                job.output.display(),
                stats.runs_merged,
                stats.groups
            ));
        }
        return Ok(());
    }

    let data = match args.data.as_ref() {
        Some(p) => FillData::load(p)?,
        None => {
            progress.warn("no --data given; only the template structure will be annotated");
            FillData::default()
        }
    };

    let proposer = build_proposer(&args, &cfg)?;
    let mut filler = TemplateFiller::new(cfg, proposer, progress)?;
    let items = filler.fill_batch(&jobs, &data);

    if let Some(report) = args.report.as_ref() {
        std::fs::write(
            report,
            serde_json::to_vec_pretty(&items).context("serialize report")?,
        )
        .with_context(|| format!("write report: {}", report.display()))?;
    }

    let failed = items.iter().filter(|i| !i.is_ok()).count();
    if failed > 0 {
        return Err(anyhow::anyhow!("{failed} of {} template(s) failed", items.len()));
    }
    Ok(())
}

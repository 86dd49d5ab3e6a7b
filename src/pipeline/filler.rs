use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use super::config::FillConfig;
use super::data::FillData;
use super::prompts::build_prompt;
use super::trace::TraceWriter;
use crate::docx::annotate::{annotate_with, AnnotationStats};
use crate::docx::consolidate::{consolidate_with_rules, MergeStats};
use crate::docx::package::{DocxPackage, MAIN_DOCUMENT};
use crate::docx::paragraphs::{build_paragraph_map, plain_text};
use crate::docx::tags::fill_simple_tags;
use crate::markers::{count_unfilled, has_simple_tags};
use crate::progress::ConsoleProgress;
use crate::proposals::{parse_proposals, ProposalRequest, ProposalRound, Proposer};
use crate::replace::{LabelValues, ReplacementOutcome, Replacer, Snapshot, NOT_FOUND};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// `{{tag}}` substitution only; no proposals were requested.
    SimpleTags,
    Pipeline,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoundReport {
    pub round: ProposalRound,
    pub proposals: usize,
    pub applied: usize,
    pub unfilled_after: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct FillReport {
    pub template: String,
    pub mode: FillMode,
    pub rounds: Vec<RoundReport>,
    /// Matches per strategy name, `not-found` included.
    pub strategies: BTreeMap<String, usize>,
    pub not_found: Vec<String>,
    pub missing_tags: Vec<String>,
    pub merge: MergeStats,
    pub unfilled_remaining: usize,
    pub annotation: AnnotationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_round_error: Option<String>,
}

impl FillReport {
    fn new(template: &str, mode: FillMode) -> Self {
        Self {
            template: template.to_string(),
            mode,
            rounds: Vec::new(),
            strategies: BTreeMap::new(),
            not_found: Vec::new(),
            missing_tags: Vec::new(),
            merge: MergeStats::default(),
            unfilled_remaining: 0,
            annotation: AnnotationStats::default(),
            second_round_error: None,
        }
    }

    fn record(&mut self, outcomes: &[ReplacementOutcome]) {
        for o in outcomes {
            *self.strategies.entry(o.strategy_name().to_string()).or_insert(0) += 1;
            if !o.is_found() {
                self.not_found.push(o.request.original.clone());
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchItem {
    pub template: PathBuf,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FillReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct TemplateFiller {
    cfg: FillConfig,
    proposer: Box<dyn Proposer>,
    progress: ConsoleProgress,
    trace: TraceWriter,
}

impl TemplateFiller {
    pub fn new(
        cfg: FillConfig,
        proposer: Box<dyn Proposer>,
        progress: ConsoleProgress,
    ) -> anyhow::Result<Self> {
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)?;
        Ok(Self {
            cfg,
            proposer,
            progress,
            trace,
        })
    }

    pub fn fill_template(
        &mut self,
        input: &Path,
        output: &Path,
        data: &FillData,
    ) -> anyhow::Result<FillReport> {
        self.progress.info(format!("Read DOCX: {}", input.display()));
        let pkg = DocxPackage::read(input)?;
        let markup = pkg.main_document()?;

        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("template")
            .to_string();
        let (filled, mut report) = self.fill_markup(&stem, &markup, data)?;
        report.template = input.display().to_string();

        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        replacements.insert(MAIN_DOCUMENT.to_string(), filled.into_bytes());
        pkg.write_with_replacements(output, &replacements)?;
        self.progress.info(format!(
            "Wrote {} ({} unfilled marker(s) left)",
            output.display(),
            report.unfilled_remaining
        ));
        Ok(report)
    }

    /// Fills every job in order. A failing template is reported and the batch goes on.
    pub fn fill_batch(&mut self, jobs: &[BatchJob], data: &FillData) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            self.progress.progress("Templates", i, jobs.len());
            let mut item = BatchItem {
                template: job.input.clone(),
                output: job.output.clone(),
                report: None,
                error: None,
            };
            match self.fill_template(&job.input, &job.output, data) {
                Ok(report) => item.report = Some(report),
                Err(e) => {
                    self.progress.warn(format!("{}: {e:#}", job.input.display()));
                    item.error = Some(format!("{e:#}"));
                }
            }
            items.push(item);
        }
        self.progress.progress("Templates", jobs.len(), jobs.len());
        let failed = items.iter().filter(|i| !i.is_ok()).count();
        self.progress.summary("Templates", items.len() - failed, failed);
        items
    }

    /// Fills the main document markup. `name` labels trace files and the report.
    pub fn fill_markup(
        &mut self,
        name: &str,
        markup: &str,
        data: &FillData,
    ) -> anyhow::Result<(String, FillReport)> {
        let text = plain_text(&build_paragraph_map(markup)?);
        if has_simple_tags(&text) {
            return self.fill_tags(name, markup, data);
        }

        let mut report = FillReport::new(name, FillMode::Pipeline);
        let markup = if self.cfg.consolidate_runs {
            let (merged, stats) = consolidate_with_rules(markup, &self.cfg.consolidate)?;
            log::debug!(
                "consolidated {} run(s) in {} group(s), {} marker(s) dropped",
                stats.runs_merged,
                stats.groups,
                stats.ignorables_dropped
            );
            report.merge = stats;
            merged
        } else {
            markup.to_string()
        };

        let labels = data.company.label_values();
        let mut snapshot = Snapshot::new(markup)?;
        let mut applied: BTreeSet<String> = BTreeSet::new();

        let response = self
            .request_proposals(name, ProposalRound::First, &snapshot, data)
            .with_context(|| format!("proposals for {name}"))?;
        snapshot = self.run_round(ProposalRound::First, snapshot, &response, &labels, &mut applied, &mut report);

        let remaining = count_unfilled(&snapshot.plain_text());
        if remaining >= self.cfg.second_pass_min_markers {
            self.progress.info(format!("{remaining} unfilled marker(s) left, strict round"));
            match self.request_proposals(name, ProposalRound::Strict, &snapshot, data) {
                Ok(response) => {
                    snapshot = self.run_round(
                        ProposalRound::Strict,
                        snapshot,
                        &response,
                        &labels,
                        &mut applied,
                        &mut report,
                    );
                }
                Err(e) => {
                    self.progress.warn(format!("strict round failed, keeping first round: {e:#}"));
                    report.second_round_error = Some(format!("{e:#}"));
                }
            }
        }

        report.unfilled_remaining = count_unfilled(&snapshot.plain_text());
        let annotated = self.annotate(name, snapshot.markup(), &applied, &mut report)?;
        Ok((annotated, report))
    }

    fn fill_tags(
        &mut self,
        name: &str,
        markup: &str,
        data: &FillData,
    ) -> anyhow::Result<(String, FillReport)> {
        let mut report = FillReport::new(name, FillMode::SimpleTags);
        let fill = fill_simple_tags(markup, &data.template_values())?;
        self.progress.info(format!(
            "Template tags: {} filled, {} without value",
            fill.filled.len(),
            fill.missing.len()
        ));
        report.missing_tags = fill.missing;

        let applied: BTreeSet<String> = fill.filled.into_iter().collect();
        let text = plain_text(&build_paragraph_map(&fill.markup)?);
        report.unfilled_remaining = count_unfilled(&text);
        let annotated = self.annotate(name, &fill.markup, &applied, &mut report)?;
        Ok((annotated, report))
    }

    fn annotate(
        &self,
        name: &str,
        markup: &str,
        applied: &BTreeSet<String>,
        report: &mut FillReport,
    ) -> anyhow::Result<String> {
        let (annotated, stats) = annotate_with(markup, applied, &self.cfg.annotate)?;
        if stats.markers_unmarked > 0 {
            self.progress.warn(format!(
                "{name}: {} unfilled marker(s) left without a manual-input highlight",
                stats.markers_unmarked
            ));
        }
        report.annotation = stats;
        Ok(annotated)
    }

    fn request_proposals(
        &mut self,
        name: &str,
        round: ProposalRound,
        snapshot: &Snapshot,
        data: &FillData,
    ) -> anyhow::Result<String> {
        let unfilled = count_unfilled(&snapshot.plain_text());
        let prompt = build_prompt(&self.cfg.prompts, round, snapshot.paragraphs(), data, unfilled)?;
        self.trace.write_round_text(name, round, "prompt", &prompt)?;

        let temperature = match round {
            ProposalRound::First => self.cfg.proposer.temperature,
            ProposalRound::Strict => self.cfg.proposer.strict_temperature,
        };
        self.progress.info(format!("Requesting proposals (round {})", round.number()));
        let response = self.proposer.propose(&ProposalRequest {
            round,
            prompt,
            temperature,
        })?;
        self.trace.write_round_text(name, round, "response", &response)?;
        Ok(response)
    }

    fn run_round(
        &self,
        round: ProposalRound,
        snapshot: Snapshot,
        response: &str,
        labels: &LabelValues,
        applied: &mut BTreeSet<String>,
        report: &mut FillReport,
    ) -> Snapshot {
        let requests = parse_proposals(response);
        if requests.is_empty() {
            log::warn!("round {}: no usable proposals in response", round.number());
        }
        let replacer = Replacer::new(&self.cfg.matching, labels);
        let (snapshot, outcomes) = replacer.apply_batch(snapshot, &requests);

        let found = outcomes.iter().filter(|o| o.is_found()).count();
        for o in outcomes.iter().filter(|o| o.is_found()) {
            applied.extend(o.applied_text.iter().cloned());
        }
        report.record(&outcomes);
        let unfilled_after = count_unfilled(&snapshot.plain_text());
        self.progress.info(format!(
            "Round {}: {found}/{} applied, {} {NOT_FOUND}",
            round.number(),
            requests.len(),
            requests.len() - found
        ));
        report.rounds.push(RoundReport {
            round,
            proposals: requests.len(),
            applied: found,
            unfilled_after,
        });
        snapshot
    }
}

/// Writes a copy of `input` whose main document only had its runs consolidated.
pub fn consolidate_template(
    input: &Path,
    output: &Path,
    cfg: &FillConfig,
) -> anyhow::Result<MergeStats> {
    let pkg = DocxPackage::read(input)?;
    let markup = pkg.main_document()?;
    let (merged, stats) = consolidate_with_rules(&markup, &cfg.consolidate)?;
    let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
    replacements.insert(MAIN_DOCUMENT.to_string(), merged.into_bytes());
    pkg.write_with_replacements(output, &replacements)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::{FillMode, TemplateFiller};
    use crate::docx::paragraphs::build_paragraph_map;
    use crate::pipeline::config::FillConfig;
    use crate::pipeline::data::FillData;
    use crate::progress::ConsoleProgress;
    use crate::proposals::{ProposalRequest, ProposalRound, Proposer, ReplayProposer};

    struct FailingProposer {
        calls: Rc<Cell<usize>>,
        fail_round: ProposalRound,
        response: String,
    }

    impl Proposer for FailingProposer {
        fn propose(&mut self, req: &ProposalRequest) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            if req.round == self.fail_round {
                anyhow::bail!("proposer offline");
            }
            Ok(self.response.clone())
        }
    }

    fn filler(proposer: Box<dyn Proposer>) -> TemplateFiller {
        TemplateFiller::new(FillConfig::default(), proposer, ConsoleProgress::new(false)).expect("filler")
    }

    fn doc(paragraphs: &[&str]) -> String {
        let body: String = paragraphs
            .iter()
            .map(|t| format!("<w:p><w:r><w:t xml:space=\"preserve\">{t}</w:t></w:r></w:p>"))
            .collect();
        format!("<w:document><w:body>{body}</w:body></w:document>")
    }

    #[test]
    fn fills_and_marks_review_and_manual_input() {
        let markup = doc(&["IČO: [doplní účastník]", "Podpis: ..........", "Den: ___"]);
        let response = r#"[{"original": "IČO: [doplní účastník]", "replacement": "IČO: 07023987"}]"#;
        let mut f = filler(Box::new(ReplayProposer::new(vec![response.to_string()])));
        let (out, report) = f.fill_markup("form", &markup, &FillData::default()).expect("fill");

        assert_eq!(report.mode, FillMode::Pipeline);
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.strategies.get("exact-paragraph"), Some(&1));
        assert_eq!(report.unfilled_remaining, 2);
        assert_eq!(report.annotation.review_highlighted, 1);
        assert_eq!(report.annotation.manual_marked, 2);
        let texts: Vec<String> = build_paragraph_map(&out).expect("map").into_iter().map(|p| p.plain_text).collect();
        assert_eq!(texts[0], "IČO: 07023987");
        assert!(out.contains(r#"<w:highlight w:val="yellow"/>"#));
        assert!(out.contains(r#"<w:highlight w:val="red"/>"#));
    }

    #[test]
    fn first_round_failure_is_an_error() {
        let calls = Rc::new(Cell::new(0));
        let mut f = filler(Box::new(FailingProposer {
            calls: calls.clone(),
            fail_round: ProposalRound::First,
            response: String::new(),
        }));
        let markup = doc(&["IČO: [doplní účastník]"]);
        assert!(f.fill_markup("form", &markup, &FillData::default()).is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn strict_round_failure_keeps_first_round_result() {
        let calls = Rc::new(Cell::new(0));
        let mut f = filler(Box::new(FailingProposer {
            calls: calls.clone(),
            fail_round: ProposalRound::Strict,
            response: r#"[{"original": "Název: ___", "replacement": "Název: Alfa s.r.o."}]"#.to_string(),
        }));
        let markup = doc(&["Název: ___", "A: ___", "B: ___", "C: ___"]);
        let (out, report) = f.fill_markup("form", &markup, &FillData::default()).expect("fill");
        assert_eq!(calls.get(), 2);
        assert_eq!(report.rounds.len(), 1);
        assert!(report.second_round_error.is_some());
        assert!(out.contains("Název: Alfa s.r.o."));
    }

    #[test]
    fn simple_tags_bypass_the_proposer() {
        let calls = Rc::new(Cell::new(0));
        let mut f = filler(Box::new(FailingProposer {
            calls: calls.clone(),
            fail_round: ProposalRound::First,
            response: String::new(),
        }));
        let mut data = FillData::default();
        data.company.name = "Alfa s.r.o.".to_string();
        let markup = doc(&["Dodavatel: {{company.name}}", "Cena: {{price}}"]);
        let (out, report) = f.fill_markup("form", &markup, &data).expect("fill");
        assert_eq!(calls.get(), 0);
        assert_eq!(report.mode, FillMode::SimpleTags);
        assert_eq!(report.missing_tags, vec!["price".to_string()]);
        assert_eq!(report.unfilled_remaining, 1);
        assert!(out.contains("Dodavatel: Alfa s.r.o."));
    }
}

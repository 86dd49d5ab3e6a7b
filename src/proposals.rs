use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::replace::ReplacementRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalRound {
    First,
    /// Re-run over a still partly unfilled document, at lower temperature.
    Strict,
}

impl ProposalRound {
    pub fn number(self) -> usize {
        match self {
            ProposalRound::First => 1,
            ProposalRound::Strict => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProposalRound::First => "first",
            ProposalRound::Strict => "strict",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProposalRequest {
    pub round: ProposalRound,
    pub prompt: String,
    pub temperature: f32,
}

/// Source of `(original, replacement)` proposals, usually a language model.
pub trait Proposer {
    /// Raw response text; parsing is done by [`parse_proposals`].
    fn propose(&mut self, req: &ProposalRequest) -> anyhow::Result<String>;
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProposerConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Per-attempt limit; 0 waits forever.
    pub timeout_secs: u64,
    pub temperature: f32,
    pub strict_temperature: f32,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 300,
            temperature: 0.3,
            strict_temperature: 0.0,
        }
    }
}

/// Runs an external command: prompt on stdin, response on stdout.
pub struct CommandProposer {
    program: String,
    args: Vec<String>,
    max_attempts: u32,
    backoff: Duration,
    timeout: Option<Duration>,
}

impl CommandProposer {
    pub fn from_config(cfg: &ProposerConfig) -> Option<Self> {
        let program = cfg.command.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: program.to_string(),
            args: cfg.args.clone(),
            max_attempts: cfg.max_attempts.max(1),
            backoff: Duration::from_millis(cfg.backoff_ms),
            timeout: (cfg.timeout_secs > 0).then(|| Duration::from_secs(cfg.timeout_secs)),
        })
    }

    fn run_once(&self, req: &ProposalRequest) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("TENDER_FILL_ROUND", req.round.as_str())
            .env("TENDER_FILL_TEMPERATURE", format!("{:.2}", req.temperature))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn proposer command: {}", self.program))?;
        let mut stdin = child.stdin.take().context("open proposer stdin")?;
        let mut stdout = child.stdout.take().context("open proposer stdout")?;
        let prompt = req.prompt.as_bytes();

        // stdin is fed while stdout drains so a chatty child cannot fill both pipes.
        let (waited, written, read) = std::thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(prompt));
            let reader = s.spawn(move || {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).map(|_| buf)
            });
            let waited = wait_with_timeout(&mut child, self.timeout);
            if waited.is_err() {
                let _ = child.kill();
                let _ = child.wait();
            }
            (waited, writer.join(), reader.join())
        });

        let Some(status) = waited? else {
            bail!(
                "proposer command timed out after {}s: {}",
                self.timeout.map_or(0, |t| t.as_secs()),
                self.program
            );
        };
        if let Ok(Err(e)) = written {
            log::debug!("proposer closed stdin early: {e}");
        }
        if !status.success() {
            bail!("proposer command failed: {} ({})", self.program, status);
        }
        let stdout = match read {
            Ok(r) => r.context("read proposer stdout")?,
            Err(_) => bail!("proposer stdout reader panicked"),
        };
        let stdout = String::from_utf8(stdout).context("proposer stdout is not valid UTF-8")?;
        if stdout.trim().is_empty() {
            bail!("proposer command returned no output: {}", self.program);
        }
        Ok(stdout)
    }
}

/// `None` when the child was killed for running past `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> anyhow::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return Ok(Some(child.wait().context("wait proposer process")?));
    };
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("poll proposer process")? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

impl Proposer for CommandProposer {
    fn propose(&mut self, req: &ProposalRequest) -> anyhow::Result<String> {
        let mut delay = self.backoff;
        let mut attempt = 1u32;
        loop {
            match self.run_once(req) {
                Ok(out) => return Ok(out),
                Err(e) if attempt < self.max_attempts => {
                    log::warn!(
                        "proposal attempt {attempt}/{} failed: {e:#}; retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("proposals failed after {attempt} attempt(s)")))
                }
            }
        }
    }
}

/// Returns pre-recorded responses, one per round, in order.
pub struct ReplayProposer {
    responses: Vec<String>,
    next: usize,
}

impl ReplayProposer {
    pub fn new(responses: Vec<String>) -> Self {
        Self { responses, next: 0 }
    }

    pub fn from_files(paths: &[PathBuf]) -> anyhow::Result<Self> {
        let responses = paths
            .iter()
            .map(|p| read_response(p))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(responses))
    }
}

fn read_response(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read proposals: {}", path.display()))
}

impl Proposer for ReplayProposer {
    fn propose(&mut self, req: &ProposalRequest) -> anyhow::Result<String> {
        let Some(out) = self.responses.get(self.next) else {
            bail!("no recorded proposals for round {}", req.round.number());
        };
        self.next += 1;
        Ok(out.clone())
    }
}

/// Used when neither recorded proposals nor a proposer command are configured.
pub struct UnconfiguredProposer;

impl Proposer for UnconfiguredProposer {
    fn propose(&mut self, _req: &ProposalRequest) -> anyhow::Result<String> {
        bail!("no proposer configured (set [proposer].command or pass --proposals)")
    }
}

static PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\{\s*"original"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,\s*"replacement"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,?\s*\}"#,
    )
    .expect("pair regex")
});

static PAIR_REVERSED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\{\s*"replacement"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,\s*"original"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,?\s*\}"#,
    )
    .expect("reversed pair regex")
});

#[derive(Deserialize)]
struct RawProposal {
    #[serde(default)]
    original: String,
    #[serde(default)]
    replacement: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProposals {
    List(Vec<RawProposal>),
    Wrapped { replacements: Vec<RawProposal> },
}

/// Lenient parse of a proposal response. Never fails: unusable input yields an empty list.
pub fn parse_proposals(raw: &str) -> Vec<ReplacementRequest> {
    let body = strip_code_fence(raw);
    let candidates = [
        body.to_string(),
        bracket_slice(body).unwrap_or(body).to_string(),
    ];
    for cand in &candidates {
        if let Some(found) = parse_json(cand).or_else(|| parse_json(&repair_json(cand))) {
            return found;
        }
    }
    let found = extract_pairs(body);
    if found.is_empty() {
        log::warn!("could not parse any proposals from response ({} bytes)", raw.len());
    } else {
        log::debug!("recovered {} proposals by pattern extraction", found.len());
    }
    found
}

fn parse_json(text: &str) -> Option<Vec<ReplacementRequest>> {
    let parsed: RawProposals = serde_json::from_str(text.trim()).ok()?;
    let list = match parsed {
        RawProposals::List(l) => l,
        RawProposals::Wrapped { replacements } => replacements,
    };
    Some(clean(list.into_iter().map(|p| (p.original, p.replacement))))
}

fn clean(pairs: impl Iterator<Item = (String, String)>) -> Vec<ReplacementRequest> {
    pairs
        .filter(|(o, _)| !o.trim().is_empty())
        .map(|(o, r)| ReplacementRequest::new(o, r))
        .collect()
}

pub(crate) fn strip_code_fence(text: &str) -> &str {
    let s = text.trim();
    let Some(open) = s.find("```") else {
        return s;
    };
    let after = &s[open + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn bracket_slice(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Escapes raw newlines/tabs inside string literals and drops trailing commas.
pub(crate) fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => {
                    escaped = false;
                    out.push(ch);
                }
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
        } else {
            match ch {
                '"' => in_string = true,
                ']' | '}' => {
                    let end = out.trim_end().len();
                    if out[..end].ends_with(',') {
                        out.remove(end - 1);
                    }
                }
                _ => {}
            }
            out.push(ch);
        }
    }
    out
}

fn extract_pairs(text: &str) -> Vec<ReplacementRequest> {
    let mut pairs: Vec<(usize, String, String)> = Vec::new();
    for caps in PAIR_RE.captures_iter(text) {
        let at = caps.get(0).map_or(0, |m| m.start());
        pairs.push((at, unescape(&caps[1]), unescape(&caps[2])));
    }
    for caps in PAIR_REVERSED_RE.captures_iter(text) {
        let at = caps.get(0).map_or(0, |m| m.start());
        pairs.push((at, unescape(&caps[2]), unescape(&caps[1])));
    }
    pairs.sort_by_key(|(at, _, _)| *at);
    clean(pairs.into_iter().map(|(_, o, r)| (o, r)))
}

fn unescape(s: &str) -> String {
    let quoted = format!(
        "\"{}\"",
        s.replace('\n', "\\n").replace('\r', "\\r").replace('\t', "\\t")
    );
    serde_json::from_str::<String>(&quoted).unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::{
        parse_proposals, repair_json, CommandProposer, ProposalRequest, ProposalRound, Proposer,
        ProposerConfig, ReplayProposer,
    };

    #[test]
    fn parses_bare_and_fenced_lists() {
        let bare = r#"[{"original": "IČO: ___", "replacement": "IČO: 07023987"}]"#;
        assert_eq!(parse_proposals(bare).len(), 1);

        let fenced = "Here you go:\n```json\n[{\"original\": \"a\", \"replacement\": \"b\"}]\n```\nDone.";
        let got = parse_proposals(fenced);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].original, "a");
    }

    #[test]
    fn slices_between_brackets_and_repairs() {
        let raw = "Návrhy: [{\"original\": \"Sídlo:\n___\", \"replacement\": \"Sídlo:\tPraha\",},] konec";
        let got = parse_proposals(raw);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].original, "Sídlo:\n___");
        assert_eq!(got[0].replacement, "Sídlo:\tPraha");
    }

    #[test]
    fn falls_back_to_pattern_extraction() {
        let raw = r#"{"original": "x", "replacement": "y"} garbage {"replacement": "2", "original": "1"} {"original": "", "replacement": "z"}"#;
        let got = parse_proposals(raw);
        let pairs: Vec<(&str, &str)> = got
            .iter()
            .map(|r| (r.original.as_str(), r.replacement.as_str()))
            .collect();
        assert_eq!(pairs, vec![("x", "y"), ("1", "2")]);
    }

    #[test]
    fn total_failure_is_an_empty_list() {
        assert!(parse_proposals("I cannot help with that.").is_empty());
        assert!(parse_proposals("").is_empty());
    }

    #[test]
    fn repair_leaves_valid_json_alone() {
        let ok = r#"[{"original": "a, b]", "replacement": "c"}]"#;
        assert_eq!(repair_json(ok), ok);
    }

    #[test]
    fn repair_keeps_commas_inside_strings() {
        let raw = "[{\"original\": \"Cena: ___, ]\", \"replacement\": \"Cena:\n1 000 Kč, }\",},]";
        assert_eq!(
            repair_json(raw),
            r#"[{"original": "Cena: ___, ]", "replacement": "Cena:\n1 000 Kč, }"}]"#
        );
        let got = parse_proposals(raw);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].original, "Cena: ___, ]");
    }

    fn shell_proposer(script: &str, extra: &[&str], max_attempts: u32, timeout_secs: u64) -> CommandProposer {
        let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        args.extend(extra.iter().map(|a| a.to_string()));
        let cfg = ProposerConfig {
            command: Some("sh".to_string()),
            args,
            max_attempts,
            backoff_ms: 10,
            timeout_secs,
            ..ProposerConfig::default()
        };
        CommandProposer::from_config(&cfg).expect("configured")
    }

    fn request(round: ProposalRound, prompt: &str, temperature: f32) -> ProposalRequest {
        ProposalRequest {
            round,
            prompt: prompt.to_string(),
            temperature,
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_retries_after_a_failed_attempt_and_sets_round_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seen = dir.path().join("attempted");
        let seen = seen.to_str().expect("utf8 path");
        let script = r#"if [ -f "$1" ]; then cat >/dev/null; printf '%s|%s' "$TENDER_FILL_ROUND" "$TENDER_FILL_TEMPERATURE"; else touch "$1"; exit 1; fi"#;
        let mut p = shell_proposer(script, &[seen], 3, 30);
        let out = p
            .propose(&request(ProposalRound::Strict, "prompt", 0.0))
            .expect("second attempt succeeds");
        assert_eq!(out, "strict|0.00");
    }

    #[cfg(unix)]
    #[test]
    fn command_streams_large_prompts() {
        let prompt = "[P0001] Jméno: ____\n".repeat(15_000);
        let mut p = shell_proposer("cat", &[], 1, 30);
        let out = p
            .propose(&request(ProposalRound::First, &prompt, 0.3))
            .expect("echo");
        assert_eq!(out.len(), prompt.len());
    }

    #[cfg(unix)]
    #[test]
    fn command_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("attempts");
        let log = log.to_str().expect("utf8 path");
        let mut p = shell_proposer(r#"cat >/dev/null; echo x >> "$1"; exit 3"#, &[log], 2, 30);
        let err = p
            .propose(&request(ProposalRound::First, "prompt", 0.3))
            .expect_err("always fails");
        assert!(format!("{err:#}").contains("after 2 attempt(s)"));
        assert_eq!(std::fs::read_to_string(log).expect("log").lines().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn command_with_empty_output_fails() {
        let mut p = shell_proposer("cat >/dev/null", &[], 1, 30);
        let err = p
            .propose(&request(ProposalRound::First, "prompt", 0.3))
            .expect_err("empty stdout");
        assert!(format!("{err:#}").contains("no output"));
    }

    #[cfg(unix)]
    #[test]
    fn command_past_timeout_is_killed() {
        let mut p = shell_proposer("exec sleep 30", &[], 1, 1);
        let started = std::time::Instant::now();
        let err = p
            .propose(&request(ProposalRound::First, "prompt", 0.3))
            .expect_err("timed out");
        assert!(format!("{err:#}").contains("timed out after 1s"));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn replay_returns_rounds_in_order_then_fails() {
        let mut p = ReplayProposer::new(vec!["[]".to_string(), "[{}]".to_string()]);
        let req = |round| ProposalRequest {
            round,
            prompt: String::new(),
            temperature: 0.0,
        };
        assert_eq!(p.propose(&req(ProposalRound::First)).expect("first"), "[]");
        assert_eq!(p.propose(&req(ProposalRound::Strict)).expect("second"), "[{}]");
        assert!(p.propose(&req(ProposalRound::Strict)).is_err());
    }
}

//! Ordered matching cascade that locates a proposed `original` in the document and patches it.
//!
//! Every strategy reads an immutable [`Snapshot`] and returns the splices it would make;
//! only the first strategy whose splices actually change the markup wins, and the snapshot
//! is rebuilt from the new buffer before the next request.

mod label;
mod paragraph;
mod raw;

use serde::{Deserialize, Serialize};

use crate::docx::paragraphs::{build_paragraph_map, plain_text, Paragraph};
use crate::docx::splice::{apply_splices, Splice};

pub use label::{CompanyField, LabelValues};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    ExactParagraph,
    Normalized,
    MultiParagraph,
    FuzzyTokens,
    Label,
    RawEncoded,
    RawDirect,
    RawTolerant,
    RawProximity,
}

impl Strategy {
    pub const CASCADE: [Strategy; 9] = [
        Strategy::ExactParagraph,
        Strategy::Normalized,
        Strategy::MultiParagraph,
        Strategy::FuzzyTokens,
        Strategy::Label,
        Strategy::RawEncoded,
        Strategy::RawDirect,
        Strategy::RawTolerant,
        Strategy::RawProximity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::ExactParagraph => "exact-paragraph",
            Strategy::Normalized => "normalized",
            Strategy::MultiParagraph => "multi-paragraph",
            Strategy::FuzzyTokens => "fuzzy-tokens",
            Strategy::Label => "label",
            Strategy::RawEncoded => "raw-encoded",
            Strategy::RawDirect => "raw-direct",
            Strategy::RawTolerant => "raw-tolerant",
            Strategy::RawProximity => "raw-proximity",
        }
    }

    pub fn try_match(self, ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
        match self {
            Strategy::ExactParagraph => paragraph::exact(ctx, req),
            Strategy::Normalized => paragraph::normalized(ctx, req),
            Strategy::MultiParagraph => paragraph::multi_paragraph(ctx, req),
            Strategy::FuzzyTokens => paragraph::fuzzy(ctx, req),
            Strategy::Label => label::label(ctx, req),
            Strategy::RawEncoded => raw::encoded(ctx, req),
            Strategy::RawDirect => raw::direct(ctx, req),
            Strategy::RawTolerant => raw::tolerant(ctx, req),
            Strategy::RawProximity => raw::proximity(ctx, req),
        }
    }
}

pub const NOT_FOUND: &str = "not-found";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRequest {
    pub original: String,
    pub replacement: String,
}

impl ReplacementRequest {
    pub fn new(original: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplacementOutcome {
    pub request: ReplacementRequest,
    /// `None` means no strategy matched ("not-found").
    pub strategy: Option<Strategy>,
    /// Text actually written into the document (input for review highlighting).
    pub applied_text: Vec<String>,
}

impl ReplacementOutcome {
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.map(Strategy::as_str).unwrap_or(NOT_FOUND)
    }

    pub fn is_found(&self) -> bool {
        self.strategy.is_some()
    }
}

/// What a strategy wants to do: splices against the snapshot markup plus the inserted text.
#[derive(Clone, Debug)]
pub struct Edit {
    pub splices: Vec<Splice>,
    pub applied_text: Vec<String>,
}

impl Edit {
    pub fn new(splices: Vec<Splice>, applied: &str) -> Self {
        let applied = applied.trim();
        Self {
            splices,
            applied_text: if applied.is_empty() {
                Vec::new()
            } else {
                vec![applied.to_string()]
            },
        }
    }
}

/// Heuristic thresholds for the fallback strategies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub fuzzy_token_threshold: f64,
    /// Bytes searched after an anchor phrase.
    pub proximity_window: usize,
    /// Paragraphs that may sit between two consecutive quoted lines.
    pub multi_paragraph_gap: usize,
    pub tolerant_max_chars: usize,
    pub anchor_words: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            fuzzy_token_threshold: 0.8,
            proximity_window: 400,
            multi_paragraph_gap: 2,
            tolerant_max_chars: 300,
            anchor_words: 3,
        }
    }
}

pub struct MatchContext<'a> {
    pub markup: &'a str,
    pub paragraphs: &'a [Paragraph],
    pub config: &'a MatchConfig,
    pub labels: &'a LabelValues,
}

/// Markup plus the paragraph map derived from it. Never mutated; edits produce a new snapshot.
#[derive(Clone, Debug)]
pub struct Snapshot {
    markup: String,
    paragraphs: Vec<Paragraph>,
}

impl Snapshot {
    pub fn new(markup: String) -> anyhow::Result<Self> {
        let paragraphs = build_paragraph_map(&markup)?;
        Ok(Self { markup, paragraphs })
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    pub fn plain_text(&self) -> String {
        plain_text(&self.paragraphs)
    }

    pub fn into_markup(self) -> String {
        self.markup
    }

    /// New snapshot with `edit` applied, or `None` if it fails or changes nothing.
    fn apply_edit(&self, edit: &Edit) -> Option<Snapshot> {
        let next = match apply_splices(&self.markup, &edit.splices) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("edit rejected: {e:#}");
                return None;
            }
        };
        if next == self.markup {
            return None;
        }
        match Snapshot::new(next) {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("edit produced unreadable markup, discarded: {e:#}");
                None
            }
        }
    }
}

pub struct Replacer<'a> {
    pub config: &'a MatchConfig,
    pub labels: &'a LabelValues,
}

impl<'a> Replacer<'a> {
    pub fn new(config: &'a MatchConfig, labels: &'a LabelValues) -> Self {
        Self { config, labels }
    }

    /// Runs the cascade for one request. The returned snapshot is the input itself when nothing matched.
    pub fn apply(&self, snapshot: Snapshot, req: &ReplacementRequest) -> (Snapshot, ReplacementOutcome) {
        let mut outcome = ReplacementOutcome {
            request: req.clone(),
            strategy: None,
            applied_text: Vec::new(),
        };
        if req.original.trim().is_empty() || req.original == req.replacement {
            log::debug!("skipping no-op request {:?}", req.original);
            return (snapshot, outcome);
        }

        let next = {
            let ctx = MatchContext {
                markup: &snapshot.markup,
                paragraphs: &snapshot.paragraphs,
                config: self.config,
                labels: self.labels,
            };
            Strategy::CASCADE.iter().find_map(|&strategy| {
                let edit = strategy.try_match(&ctx, req)?;
                let next = snapshot.apply_edit(&edit)?;
                Some((strategy, edit.applied_text, next))
            })
        };

        match next {
            Some((strategy, applied_text, next)) => {
                log::debug!("{} <- {:?}", strategy.as_str(), req.original);
                outcome.strategy = Some(strategy);
                outcome.applied_text = applied_text;
                (next, outcome)
            }
            None => {
                log::debug!("{NOT_FOUND} <- {:?}", req.original);
                (snapshot, outcome)
            }
        }
    }

    /// Applies requests in order; unmatched requests never stop the batch.
    pub fn apply_batch(
        &self,
        mut snapshot: Snapshot,
        requests: &[ReplacementRequest],
    ) -> (Snapshot, Vec<ReplacementOutcome>) {
        let mut outcomes = Vec::with_capacity(requests.len());
        for req in requests {
            let (next, outcome) = self.apply(snapshot, req);
            snapshot = next;
            outcomes.push(outcome);
        }
        (snapshot, outcomes)
    }
}

use std::path::PathBuf;

use anyhow::Context;

use crate::proposals::ProposalRound;

/// Optional on-disk record of every proposal exchange.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(sanitize_filename(name));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    /// `<stem>.round<N>.<kind>.txt`, kind being `prompt` or `response`.
    pub fn write_round_text(
        &self,
        stem: &str,
        round: ProposalRound,
        kind: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let name = format!("{stem}.round{}.{kind}.txt", round.number());
        self.write_named_text(&name, text)
    }
}

fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => out.push(ch),
        }
    }
    out
}

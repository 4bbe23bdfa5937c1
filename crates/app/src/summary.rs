use ledgerlink_core::Money;
use ledgerlink_storage::WriteMode;
use serde::Serialize;

use crate::reconcile::MatchOutcome;

/// Counts reported at the end of every pass. A zero-match run and a run that
/// died early never look alike: the latter exits non-zero without a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub committed: bool,
    pub ingested: usize,
    pub duplicates: usize,
    pub reclassified: usize,
    pub incomplete: usize,
    pub suggestions: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub below_threshold: usize,
    pub no_candidates: usize,
    pub conflicts: usize,
    pub errored: usize,
    pub matched_amount: Money,
}

impl RunSummary {
    pub fn new(run_id: &str, mode: WriteMode) -> Self {
        Self {
            run_id: run_id.to_string(),
            committed: mode.is_write(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &MatchOutcome) {
        match outcome {
            MatchOutcome::Matched(link) => {
                self.matched += 1;
                self.matched_amount = self.matched_amount + link.amount;
            }
            MatchOutcome::Ambiguous { .. } => self.ambiguous += 1,
            MatchOutcome::BelowThreshold { .. } => self.below_threshold += 1,
            MatchOutcome::NoCandidates => self.no_candidates += 1,
            MatchOutcome::Conflict { .. } => self.conflicts += 1,
            MatchOutcome::Incomplete { .. } => self.incomplete += 1,
            MatchOutcome::Error { .. } => self.errored += 1,
        }
    }

    /// Records that looked at a source but did not link it.
    pub fn unmatched(&self) -> usize {
        self.ambiguous + self.below_threshold + self.no_candidates + self.conflicts
    }

    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("run", self.run_id.clone()),
            ("mode", if self.committed { "write" } else { "dry-run" }.to_string()),
            ("ingested", self.ingested.to_string()),
            ("duplicates", self.duplicates.to_string()),
            ("reclassified", self.reclassified.to_string()),
            ("incomplete", self.incomplete.to_string()),
            ("suggestions", self.suggestions.to_string()),
            ("matched", self.matched.to_string()),
            ("ambiguous", self.ambiguous.to_string()),
            ("below threshold", self.below_threshold.to_string()),
            ("no candidates", self.no_candidates.to_string()),
            ("conflicts", self.conflicts.to_string()),
            ("errored", self.errored.to_string()),
            ("matched amount", self.matched_amount.to_string()),
        ]
    }

    pub fn render_table(&self) -> String {
        let rows = self.rows();
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, value)| value.len()).max().unwrap_or(0);

        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push("-".repeat(width + 2 + value_width));
        for (label, value) in rows {
            lines.push(format!("{label:<width$}  {value:>value_width$}"));
        }
        lines.join("\n")
    }
}

use ledgerlink_core::{
    day_gap, AmountField, MatchConfig, Money, ReconciliationWindow, SourceId, SourceRecord,
    TargetId, TargetRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const WEIGHT_PRIMARY_EXACT: i32 = 50;
pub const WEIGHT_SECONDARY_EXACT: i32 = 40;
pub const WEIGHT_WITHIN_TOLERANCE: i32 = 30;
pub const WEIGHT_WITHIN_WEEK: i32 = 20;
pub const WEIGHT_WITHIN_WINDOW: i32 = 10;
pub const WEIGHT_IDENTIFIER_HINT: i32 = 40;

const WEEK_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum AmountMatch {
    Exact(AmountField),
    WithinTolerance(AmountField),
    /// Only reachable for targets named by an identifier hint.
    Mismatch,
}

impl AmountMatch {
    pub fn field(self) -> Option<AmountField> {
        match self {
            AmountMatch::Exact(f) | AmountMatch::WithinTolerance(f) => Some(f),
            AmountMatch::Mismatch => None,
        }
    }
}

/// Ephemeral pairing produced during one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub amount_match: AmountMatch,
    /// Distance between the source amount and the matched field.
    pub amount_delta: Money,
    pub day_gap: i64,
    /// The source is dated on or before the target's event.
    pub precedes_event: bool,
    pub window: ReconciliationWindow,
    pub hint_hit: bool,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    Accepted(MatchCandidate),
    /// More than one candidate at the top score.
    Ambiguous { score: i32, tied: Vec<TargetId> },
    BelowThreshold { best: MatchCandidate },
    NoCandidates,
}

/// Compares a source amount against a target's fields: the first exact field
/// in priority order, otherwise the first field within tolerance.
pub fn compare_amount(amount: Money, target: &TargetRecord, tolerance: Money) -> Option<(AmountMatch, Money)> {
    let amount = amount.abs();
    let fields = target.amount_fields();
    if let Some((field, _)) = fields.iter().find(|(_, value)| value.distance(amount).is_zero()) {
        return Some((AmountMatch::Exact(*field), Money::zero()));
    }
    fields
        .iter()
        .map(|(field, value)| (*field, value.distance(amount)))
        .find(|(_, delta)| *delta <= tolerance)
        .map(|(field, delta)| (AmountMatch::WithinTolerance(field), delta))
}

/// Whether `target` still has enough outstanding to absorb `amount`.
pub fn covers_outstanding(target: &TargetRecord, amount: Money, tolerance: Money) -> bool {
    target.balance + tolerance >= amount.abs()
}

/// Searches `pool` for targets that could explain `source`.
///
/// Targets named in `hinted` are tried first: if any of them qualifies, only
/// hinted candidates are returned. Otherwise every target is checked by
/// amount and date. Retainer matches and hinted targets use the
/// advance-payment window; everything else uses the standard window.
/// Targets whose outstanding balance cannot absorb the amount are skipped.
pub fn find_candidates(
    source: &SourceRecord,
    pool: &[TargetRecord],
    config: &MatchConfig,
    hinted: &[TargetId],
) -> Vec<MatchCandidate> {
    let hinted: HashSet<TargetId> = hinted.iter().copied().collect();
    let wanted_kind = source.source_kind.target_kind();
    let eligible = pool.iter().filter(|t| t.kind == wanted_kind);

    if !hinted.is_empty() {
        let by_hint: Vec<MatchCandidate> = eligible
            .clone()
            .filter(|t| hinted.contains(&t.id))
            .filter_map(|t| evaluate(source, t, config, true))
            .collect();
        if !by_hint.is_empty() {
            return by_hint;
        }
    }

    eligible
        .filter_map(|t| evaluate(source, t, config, false))
        .collect()
}

fn evaluate(
    source: &SourceRecord,
    target: &TargetRecord,
    config: &MatchConfig,
    hint_hit: bool,
) -> Option<MatchCandidate> {
    if !covers_outstanding(target, source.amount, config.amount_tolerance) {
        return None;
    }
    let (amount_match, amount_delta) =
        match compare_amount(source.amount, target, config.amount_tolerance) {
            Some(found) => found,
            None if hint_hit => (AmountMatch::Mismatch, target.due_amount.distance(source.amount.abs())),
            None => return None,
        };

    let window = if hint_hit || amount_match.field() == Some(AmountField::Retainer) {
        ReconciliationWindow::AdvancePayment
    } else {
        ReconciliationWindow::Standard
    };
    if !window.range(source.occurred_on, config).contains(target.event_date) {
        return None;
    }

    let mut candidate = MatchCandidate {
        source_id: source.id,
        target_id: target.id,
        amount_match,
        amount_delta,
        day_gap: day_gap(source.occurred_on, target.event_date),
        precedes_event: source.occurred_on <= target.event_date,
        window,
        hint_hit,
        score: 0,
    };
    candidate.score = score(&candidate, config);
    Some(candidate)
}

/// Additive, unnormalized confidence score.
pub fn score(candidate: &MatchCandidate, config: &MatchConfig) -> i32 {
    let amount = match candidate.amount_match {
        AmountMatch::Exact(field) if field.is_primary() => WEIGHT_PRIMARY_EXACT,
        AmountMatch::Exact(_) => WEIGHT_SECONDARY_EXACT,
        AmountMatch::WithinTolerance(_) => WEIGHT_WITHIN_TOLERANCE,
        AmountMatch::Mismatch => 0,
    };
    let date = date_weight(candidate, config);
    let hint = if candidate.hint_hit { WEIGHT_IDENTIFIER_HINT } else { 0 };
    amount + date + hint
}

/// Buckets date proximity against the window the candidate was found in. An
/// advance payment made ahead of its event is on time anywhere in its window.
fn date_weight(candidate: &MatchCandidate, config: &MatchConfig) -> i32 {
    if candidate.window == ReconciliationWindow::AdvancePayment && candidate.precedes_event {
        return WEIGHT_WITHIN_WEEK;
    }
    if candidate.day_gap <= WEEK_DAYS {
        WEIGHT_WITHIN_WEEK
    } else if candidate.day_gap <= candidate.window.days(config) {
        WEIGHT_WITHIN_WINDOW
    } else {
        0
    }
}

/// Accepts the top candidate only when it clears `min_accept_score` and no
/// other candidate shares its score.
pub fn decide(mut candidates: Vec<MatchCandidate>, config: &MatchConfig) -> MatchDecision {
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.target_id.cmp(&b.target_id)));
    let Some(top) = candidates.first() else {
        return MatchDecision::NoCandidates;
    };
    if top.score < config.min_accept_score {
        return MatchDecision::BelowThreshold { best: top.clone() };
    }
    let tied: Vec<TargetId> = candidates
        .iter()
        .take_while(|c| c.score == top.score)
        .map(|c| c.target_id)
        .collect();
    if tied.len() > 1 {
        return MatchDecision::Ambiguous {
            score: top.score,
            tied,
        };
    }
    MatchDecision::Accepted(top.clone())
}

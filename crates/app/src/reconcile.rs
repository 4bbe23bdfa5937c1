use ledgerlink_core::{MatchConfig, ReconciliationWindow, SourceId, SourceKind, SourceRecord, TargetId};
use ledgerlink_import::{decide, extract_hints, find_candidates, MatchDecision};
use ledgerlink_storage::{
    apply_link, get_target_pool, get_targets_by_ids, get_unlinked_sources, is_fatal,
    resolve_hints, DbPool, LinkError, LinkRequest, LinkResult, WriteMode,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::summary::RunSummary;

/// What happened to one source during a matching pass. Only `Matched` changes
/// anything; every other outcome leaves the source unlinked and eligible for
/// the next pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(LinkResult),
    Ambiguous { score: i32, tied: Vec<TargetId> },
    BelowThreshold { best_score: i32, target_id: TargetId },
    NoCandidates,
    /// Another run linked the source between search and apply.
    Conflict { linked_to: Option<TargetId> },
    Incomplete { reason: String },
    Error { reason: String },
}

impl MatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MatchOutcome::Matched(_) => "matched",
            MatchOutcome::Ambiguous { .. } => "ambiguous",
            MatchOutcome::BelowThreshold { .. } => "below_threshold",
            MatchOutcome::NoCandidates => "no_candidates",
            MatchOutcome::Conflict { .. } => "conflict",
            MatchOutcome::Incomplete { .. } => "incomplete",
            MatchOutcome::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub kind: Option<SourceKind>,
    pub config: MatchConfig,
    pub mode: WriteMode,
}

/// One matching pass over every unlinked source. Each accepted match is its
/// own transaction; a fatal error stops the pass with earlier links intact.
pub async fn run_reconcile(
    pool: &DbPool,
    options: &ReconcileOptions,
    summary: &mut RunSummary,
) -> anyhow::Result<Vec<(SourceId, MatchOutcome)>> {
    let sources = get_unlinked_sources(pool, options.kind).await?;
    info!(run = %summary.run_id, sources = sources.len(), mode = ?options.mode, "Starting reconcile pass");

    let mut outcomes = Vec::with_capacity(sources.len());
    for source in &sources {
        let outcome = match_source(pool, source, &options.config, options.mode, &summary.run_id).await?;
        log_outcome(source, &outcome);
        summary.record(&outcome);
        outcomes.push((source.id, outcome));
    }

    info!(
        run = %summary.run_id,
        matched = summary.matched,
        ambiguous = summary.ambiguous,
        unmatched = summary.unmatched(),
        errored = summary.errored,
        "Reconcile pass finished"
    );
    Ok(outcomes)
}

/// Search, score, gate and apply for a single source. Returns `Err` only for
/// errors that make continuing pointless.
pub async fn match_source(
    pool: &DbPool,
    source: &SourceRecord,
    config: &MatchConfig,
    mode: WriteMode,
    process: &str,
) -> anyhow::Result<MatchOutcome> {
    if source.amount.is_zero() {
        return Ok(MatchOutcome::Incomplete {
            reason: "zero amount".to_string(),
        });
    }

    let hints = extract_hints(&source.hint_text());
    let hinted = if hints.is_empty() {
        Vec::new()
    } else {
        match resolve_hints(pool, &hints).await {
            Ok(ids) => ids,
            Err(e) => return per_record(e),
        }
    };

    let kind = source.source_kind.target_kind();
    let range = ReconciliationWindow::AdvancePayment.range(source.occurred_on, config);
    let mut targets = match get_target_pool(pool, kind, range, source.amount, config.amount_tolerance).await {
        Ok(targets) => targets,
        Err(e) => return per_record(e),
    };
    let missing: Vec<TargetId> = hinted
        .iter()
        .copied()
        .filter(|id| !targets.iter().any(|t| t.id == *id))
        .collect();
    if !missing.is_empty() {
        match get_targets_by_ids(pool, &missing).await {
            Ok(extra) => targets.extend(extra),
            Err(e) => return per_record(e),
        }
    }

    let candidates = find_candidates(source, &targets, config, &hinted);
    for c in &candidates {
        debug!(
            source = %source.id,
            target = %c.target_id,
            score = c.score,
            day_gap = c.day_gap,
            window = %c.window,
            hint = c.hint_hit,
            "Candidate"
        );
    }

    let accepted = match decide(candidates, config) {
        MatchDecision::Accepted(c) => c,
        MatchDecision::Ambiguous { score, tied } => return Ok(MatchOutcome::Ambiguous { score, tied }),
        MatchDecision::BelowThreshold { best } => {
            return Ok(MatchOutcome::BelowThreshold {
                best_score: best.score,
                target_id: best.target_id,
            })
        }
        MatchDecision::NoCandidates => return Ok(MatchOutcome::NoCandidates),
    };

    let request = LinkRequest {
        source_id: source.id,
        target_id: accepted.target_id,
        amount: source.amount,
        matched_field: accepted.amount_match.field(),
        score: Some(accepted.score),
    };
    match apply_link(pool, &request, mode, process).await {
        Ok(result) => Ok(MatchOutcome::Matched(result)),
        Err(LinkError::ConcurrentLinkConflict { linked_to, .. }) => Ok(MatchOutcome::Conflict { linked_to }),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => Ok(MatchOutcome::Error {
            reason: e.to_string(),
        }),
    }
}

fn per_record(e: sqlx::Error) -> anyhow::Result<MatchOutcome> {
    if is_fatal(&e) {
        return Err(e.into());
    }
    Ok(MatchOutcome::Error {
        reason: e.to_string(),
    })
}

fn log_outcome(source: &SourceRecord, outcome: &MatchOutcome) {
    match outcome {
        MatchOutcome::Matched(_) => {}
        MatchOutcome::Error { reason } => {
            error!(source = %source.id, date = %source.occurred_on, amount = %source.amount, %reason, "Match failed")
        }
        other => warn!(
            source = %source.id,
            date = %source.occurred_on,
            amount = %source.amount,
            reason = other.label(),
            "Left unlinked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ledgerlink_core::{fingerprint, Classification, Money, NewSourceRecord, TargetKind};
    use ledgerlink_storage::{
        count_links, create_db, get_target, insert_ledger_entry, insert_source, insert_target,
        register_short_code, NewTargetRecord,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn open() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("ledger.db")).await.unwrap();
        (dir, pool)
    }

    async fn charter(pool: &DbPool, reference: &str, cents: i64, on: NaiveDate) -> TargetId {
        insert_target(
            pool,
            &NewTargetRecord {
                kind: TargetKind::Charter,
                reference: Some(reference.to_string()),
                event_date: on,
                due_amount: Money::from_cents(cents),
                retainer_amount: None,
            },
        )
        .await
        .unwrap()
    }

    async fn credit(pool: &DbPool, description: &str, cents: i64, on: NaiveDate) -> SourceId {
        let amount = Money::from_cents(cents);
        let record = NewSourceRecord {
            occurred_on: on,
            raw_description: description.to_string(),
            memo: None,
            amount,
            source_kind: SourceKind::BankCredit,
            fingerprint: fingerprint(Some(on), description, Some(amount)).unwrap(),
        };
        let mut conn = pool.acquire().await.unwrap();
        insert_source(&mut conn, &record, None, Classification::Unclassified)
            .await
            .unwrap()
            .unwrap()
    }

    fn options(mode: WriteMode) -> ReconcileOptions {
        ReconcileOptions {
            kind: None,
            config: MatchConfig::default(),
            mode,
        }
    }

    #[tokio::test]
    async fn scenario_a_links_and_reduces_balance() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "INTERAC E-TRANSFER J SMITH", 120_000, date(2013, 6, 10)).await;

        let mut summary = RunSummary::new("run-a", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut summary).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, source);
        assert!(matches!(&outcomes[0].1, MatchOutcome::Matched(r) if r.target_id == target));
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.matched_amount, Money::from_cents(120_000));
        assert_eq!(get_target(&pool, target).await.unwrap().unwrap().balance, Money::zero());
    }

    #[tokio::test]
    async fn repeat_payment_does_not_overpay_a_settled_charter() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        credit(&pool, "INTERAC E-TRANSFER J SMITH", 120_000, date(2013, 6, 10)).await;

        let mut first = RunSummary::new("first", WriteMode::Write);
        run_reconcile(&pool, &options(WriteMode::Write), &mut first).await.unwrap();
        assert_eq!(first.matched, 1);

        let repeat = credit(&pool, "INTERAC E-TRANSFER K JONES", 120_000, date(2013, 6, 14)).await;
        let mut second = RunSummary::new("second", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut second).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, repeat);
        assert_eq!(outcomes[0].1, MatchOutcome::NoCandidates);
        assert_eq!(second.matched, 0);
        assert_eq!(count_links(&pool).await.unwrap(), 1);
        assert_eq!(get_target(&pool, target).await.unwrap().unwrap().balance, Money::zero());
    }

    #[tokio::test]
    async fn settled_charter_does_not_tie_with_an_open_one() {
        let (_dir, pool) = open().await;
        let settled = charter(&pool, "019233", 50_000, date(2013, 6, 12)).await;
        credit(&pool, "E-TRANSFER 019233", 50_000, date(2013, 6, 11)).await;
        let mut first = RunSummary::new("first", WriteMode::Write);
        run_reconcile(&pool, &options(WriteMode::Write), &mut first).await.unwrap();
        assert_eq!(first.matched, 1);

        let open_charter = charter(&pool, "019300", 50_000, date(2013, 6, 12)).await;
        credit(&pool, "DEPOSIT", 50_000, date(2013, 6, 10)).await;
        let mut second = RunSummary::new("second", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut second).await.unwrap();

        assert!(matches!(&outcomes[0].1, MatchOutcome::Matched(r) if r.target_id == open_charter));
        assert_eq!(get_target(&pool, settled).await.unwrap().unwrap().balance, Money::zero());
        assert_eq!(get_target(&pool, open_charter).await.unwrap().unwrap().balance, Money::zero());
    }

    #[tokio::test]
    async fn scenario_b_tie_leaves_source_unlinked() {
        let (_dir, pool) = open().await;
        charter(&pool, "019233", 50_000, date(2013, 6, 12)).await;
        charter(&pool, "019234", 50_000, date(2013, 6, 12)).await;
        credit(&pool, "DEPOSIT", 50_000, date(2013, 6, 10)).await;

        let mut summary = RunSummary::new("run-b", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut summary).await.unwrap();

        assert_eq!(outcomes[0].1.label(), "ambiguous");
        assert_eq!(summary.ambiguous, 1);
        assert_eq!(summary.matched, 0);
        assert_eq!(count_links(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scenario_c_second_pass_creates_nothing() {
        let (_dir, pool) = open().await;
        charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        credit(&pool, "E-TRANSFER", 120_000, date(2013, 6, 10)).await;

        let mut first = RunSummary::new("first", WriteMode::Write);
        run_reconcile(&pool, &options(WriteMode::Write), &mut first).await.unwrap();
        let after_first = count_links(&pool).await.unwrap();

        let mut second = RunSummary::new("second", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut second).await.unwrap();

        assert_eq!(after_first, 1);
        assert!(outcomes.is_empty());
        assert_eq!(second.matched, 0);
        assert_eq!(count_links(&pool).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn dry_run_pass_reports_but_does_not_link() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        credit(&pool, "E-TRANSFER", 120_000, date(2013, 6, 10)).await;

        let mut summary = RunSummary::new("dry", WriteMode::DryRun);
        run_reconcile(&pool, &options(WriteMode::DryRun), &mut summary).await.unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(count_links(&pool).await.unwrap(), 0);
        assert_eq!(get_target(&pool, target).await.unwrap().unwrap().balance, Money::from_cents(120_000));
    }

    #[tokio::test]
    async fn short_code_hint_breaks_a_tie() {
        let (_dir, pool) = open().await;
        charter(&pool, "019233", 50_000, date(2013, 6, 12)).await;
        let hinted = charter(&pool, "019234", 50_000, date(2013, 6, 12)).await;
        let entry = insert_ledger_entry(&pool, "019234").await.unwrap();
        register_short_code(&pool, "K7QX2", entry).await.unwrap();
        credit(&pool, "E-TRANSFER ref: k7qx2", 50_000, date(2013, 6, 10)).await;

        let mut summary = RunSummary::new("hint", WriteMode::Write);
        let outcomes = run_reconcile(&pool, &options(WriteMode::Write), &mut summary).await.unwrap();

        assert!(matches!(&outcomes[0].1, MatchOutcome::Matched(r) if r.target_id == hinted));
    }

    #[tokio::test]
    async fn zero_amount_is_incomplete() {
        let (_dir, pool) = open().await;
        credit(&pool, "ADJUSTMENT", 0, date(2013, 6, 10)).await;

        let mut summary = RunSummary::new("zero", WriteMode::Write);
        run_reconcile(&pool, &options(WriteMode::Write), &mut summary).await.unwrap();
        assert_eq!(summary.incomplete, 1);
    }
}

use chrono::NaiveDate;
use ledgerlink_core::{DateRange, Money, TargetId, TargetKind, TargetRecord};
use ledgerlink_import::IdentifierHint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{decode_error, DbPool};

/// A target as handed over by the booking or receipt workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTargetRecord {
    pub kind: TargetKind,
    pub reference: Option<String>,
    pub event_date: NaiveDate,
    pub due_amount: Money,
    pub retainer_amount: Option<Money>,
}

type TargetRow = (i64, String, Option<String>, NaiveDate, i64, Option<i64>, i64, i64);

const TARGET_COLUMNS: &str =
    "id, kind, reference, event_date, due_cents, retainer_cents, paid_cents, balance_cents";

fn target_from_row(r: TargetRow) -> Result<TargetRecord, sqlx::Error> {
    Ok(TargetRecord {
        id: TargetId(r.0),
        kind: r.1.parse().map_err(decode_error)?,
        reference: r.2,
        event_date: r.3,
        due_amount: Money::from_cents(r.4),
        retainer_amount: r.5.map(Money::from_cents),
        paid_amount: Money::from_cents(r.6),
        balance: Money::from_cents(r.7),
    })
}

pub async fn insert_target(pool: &DbPool, target: &NewTargetRecord) -> Result<TargetId, sqlx::Error> {
    let due = target.due_amount.to_cents();
    let result = sqlx::query(
        "INSERT INTO target_records (kind, reference, event_date, due_cents, retainer_cents, paid_cents, balance_cents) VALUES (?, ?, ?, ?, ?, 0, ?)"
    )
    .bind(target.kind.as_str())
    .bind(&target.reference)
    .bind(target.event_date)
    .bind(due)
    .bind(target.retainer_amount.map(Money::to_cents))
    .bind(due)
    .execute(pool)
    .await?;

    Ok(TargetId(result.last_insert_rowid()))
}

pub async fn get_target(pool: &DbPool, id: TargetId) -> Result<Option<TargetRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, TargetRow>(&format!(
        "SELECT {TARGET_COLUMNS} FROM target_records WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(target_from_row).transpose()
}

/// Range query over the target pool: `kind` targets dated inside `range`
/// with at least one amount field within `tolerance` of `amount`.
pub async fn get_target_pool(
    pool: &DbPool,
    kind: TargetKind,
    range: DateRange,
    amount: Money,
    tolerance: Money,
) -> Result<Vec<TargetRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TargetRow>(&format!(
        "SELECT {TARGET_COLUMNS} FROM target_records \
         WHERE kind = ?1 AND event_date BETWEEN ?2 AND ?3 \
         AND (ABS(due_cents - ?4) <= ?5 OR ABS(balance_cents - ?4) <= ?5 OR ABS(retainer_cents - ?4) <= ?5) \
         ORDER BY event_date, id"
    ))
    .bind(kind.as_str())
    .bind(range.start)
    .bind(range.end)
    .bind(amount.abs().to_cents())
    .bind(tolerance.to_cents())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(target_from_row).collect()
}

pub async fn get_targets_by_ids(pool: &DbPool, ids: &[TargetId]) -> Result<Vec<TargetRecord>, sqlx::Error> {
    let mut targets = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(target) = get_target(pool, *id).await? {
            targets.push(target);
        }
    }
    Ok(targets)
}

pub async fn insert_ledger_entry(pool: &DbPool, reserve_number: &str) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO ledger_entries (reserve_number) VALUES (?)")
        .bind(reserve_number)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn register_short_code(pool: &DbPool, short_code: &str, ledger_entry_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO short_code_ledger (short_code, ledger_entry_id) VALUES (?, ?)")
        .bind(short_code.to_uppercase())
        .bind(ledger_entry_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn register_cheque(pool: &DbPool, check_number: &str, reserve_number: &str) -> Result<(), sqlx::Error> {
    let trimmed = check_number.trim_start_matches('0');
    sqlx::query("INSERT OR REPLACE INTO cheque_register (check_number, reserve_number) VALUES (?, ?)")
        .bind(if trimmed.is_empty() { "0" } else { trimmed })
        .bind(reserve_number)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolves extracted hints to target ids. Reserve numbers match a target's
/// reference directly; short codes chain through `short_code_ledger` and
/// `ledger_entries`; cheque numbers go through `cheque_register`.
pub async fn resolve_hints(pool: &DbPool, hints: &[IdentifierHint]) -> Result<Vec<TargetId>, sqlx::Error> {
    let mut resolved: Vec<TargetId> = Vec::new();
    for hint in hints {
        let ids: Vec<i64> = match hint {
            IdentifierHint::ReserveNumber(reserve) => {
                sqlx::query_scalar("SELECT id FROM target_records WHERE reference = ?")
                    .bind(reserve)
                    .fetch_all(pool)
                    .await?
            }
            IdentifierHint::ShortCode(code) => {
                sqlx::query_scalar(
                    "SELECT DISTINCT t.id FROM short_code_ledger s \
                     JOIN ledger_entries l ON l.id = s.ledger_entry_id \
                     JOIN target_records t ON t.reference = l.reserve_number \
                     WHERE s.short_code = ?",
                )
                .bind(code.to_uppercase())
                .fetch_all(pool)
                .await?
            }
            IdentifierHint::CheckNumber(number) => {
                sqlx::query_scalar(
                    "SELECT t.id FROM cheque_register c \
                     JOIN target_records t ON t.reference = c.reserve_number \
                     WHERE c.check_number = ?",
                )
                .bind(number)
                .fetch_all(pool)
                .await?
            }
        };
        debug!(hint = hint.value(), resolved = ids.len(), "Resolved identifier hint");
        for id in ids.into_iter().map(TargetId) {
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }
    Ok(resolved)
}

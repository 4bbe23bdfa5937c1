use chrono::NaiveDate;
use ledgerlink_core::{
    AuditAction, AuditEntry, Classification, Fingerprint, Money, NewSourceRecord, SourceId,
    SourceKind, SourceRecord, TargetId,
};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::audit::write_audit;
use crate::db::{decode_error, DbPool, StorageError, WriteMode};

type SourceRow = (
    i64,
    NaiveDate,
    String,
    Option<String>,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
);

const SOURCE_COLUMNS: &str = "id, occurred_on, raw_description, memo, amount_cents, source_kind, fingerprint, canonical_vendor, account_code, linked_target_id, superseded";

fn source_from_row(r: SourceRow) -> Result<SourceRecord, sqlx::Error> {
    Ok(SourceRecord {
        id: SourceId(r.0),
        occurred_on: r.1,
        raw_description: r.2,
        memo: r.3,
        amount: Money::from_cents(r.4),
        source_kind: r.5.parse().map_err(decode_error)?,
        fingerprint: Fingerprint::from_hex(r.6),
        canonical_vendor: r.7,
        classification: Classification::from_code(r.8.as_deref()).map_err(decode_error)?,
        linked_target: r.9.map(TargetId),
        superseded: r.10 != 0,
    })
}

/// Every fingerprint already stored for one source population.
pub async fn load_fingerprints(pool: &DbPool, kind: SourceKind) -> Result<Vec<Fingerprint>, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT fingerprint FROM source_records WHERE source_kind = ?",
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Fingerprint::from_hex).collect())
}

/// Inserts unless `(source_kind, fingerprint)` already exists, in which case
/// `None` is returned and nothing is written.
pub async fn insert_source(
    conn: &mut SqliteConnection,
    record: &NewSourceRecord,
    canonical_vendor: Option<&str>,
    classification: Classification,
) -> Result<Option<SourceId>, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO source_records (occurred_on, raw_description, memo, amount_cents, source_kind, fingerprint, canonical_vendor, account_code) VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT (source_kind, fingerprint) DO NOTHING"
    )
    .bind(record.occurred_on)
    .bind(&record.raw_description)
    .bind(&record.memo)
    .bind(record.amount.to_cents())
    .bind(record.source_kind.as_str())
    .bind(record.fingerprint.as_str())
    .bind(canonical_vendor)
    .bind(classification.to_code())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(SourceId(result.last_insert_rowid())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclassifyOutcome {
    Updated(SourceId),
    Unchanged(SourceId),
    NotFound,
}

/// Updates vendor and account code of the row holding `fingerprint` in place.
/// Writes one audit entry when anything changed.
pub async fn reclassify_source(
    conn: &mut SqliteConnection,
    kind: SourceKind,
    fingerprint: &Fingerprint,
    canonical_vendor: Option<&str>,
    classification: Classification,
    process: &str,
) -> Result<ReclassifyOutcome, sqlx::Error> {
    let existing = sqlx::query_as::<_, (i64, Option<String>, Option<String>)>(
        "SELECT id, canonical_vendor, account_code FROM source_records WHERE source_kind = ? AND fingerprint = ?"
    )
    .bind(kind.as_str())
    .bind(fingerprint.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some((id, old_vendor, old_code)) = existing else {
        return Ok(ReclassifyOutcome::NotFound);
    };
    let new_code = classification.to_code();
    if old_vendor.as_deref() == canonical_vendor && old_code.as_deref() == new_code {
        return Ok(ReclassifyOutcome::Unchanged(SourceId(id)));
    }

    sqlx::query("UPDATE source_records SET canonical_vendor = ?, account_code = ? WHERE id = ?")
        .bind(canonical_vendor)
        .bind(new_code)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    write_audit(
        conn,
        &AuditEntry {
            id: None,
            recorded_at: None,
            process: process.to_string(),
            action: AuditAction::Reclassify,
            entity: "source_record".to_string(),
            entity_id: id,
            field: Some("account_code".to_string()),
            old_value: old_code,
            new_value: new_code.map(str::to_string),
            detail: serde_json::json!({
                "old_vendor": old_vendor,
                "new_vendor": canonical_vendor,
            }),
        },
    )
    .await?;

    Ok(ReclassifyOutcome::Updated(SourceId(id)))
}

/// Parks a row that could not be fingerprinted. Re-queuing the same raw line
/// is a no-op.
pub async fn queue_for_review(
    conn: &mut SqliteConnection,
    kind: SourceKind,
    line: usize,
    raw: &str,
    reason: &str,
    process: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO review_queue (source_kind, line, raw, reason, process) VALUES (?, ?, ?, ?, ?) ON CONFLICT (source_kind, raw) DO NOTHING"
    )
    .bind(kind.as_str())
    .bind(line as i64)
    .bind(raw)
    .bind(reason)
    .bind(process)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub id: i64,
    pub source_kind: SourceKind,
    pub line: i64,
    pub raw: String,
    pub reason: String,
}

pub async fn get_review_queue(pool: &DbPool) -> Result<Vec<ReviewItem>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, i64, String, String)>(
        "SELECT id, source_kind, line, raw, reason FROM review_queue ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ReviewItem {
                id: r.0,
                source_kind: r.1.parse().map_err(decode_error)?,
                line: r.2,
                raw: r.3,
                reason: r.4,
            })
        })
        .collect()
}

pub async fn get_source(pool: &DbPool, id: SourceId) -> Result<Option<SourceRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, SourceRow>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM source_records WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(source_from_row).transpose()
}

/// Sources still eligible for matching, oldest first.
pub async fn get_unlinked_sources(
    pool: &DbPool,
    kind: Option<SourceKind>,
) -> Result<Vec<SourceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SourceRow>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM source_records WHERE linked_target_id IS NULL AND superseded = 0 AND (?1 IS NULL OR source_kind = ?1) ORDER BY occurred_on, id"
    ))
    .bind(kind.map(SourceKind::as_str))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(source_from_row).collect()
}

pub async fn count_sources(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM source_records")
        .fetch_one(pool)
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    Deleted,
    /// A realized payment blocked the delete; the row was marked superseded.
    Superseded,
}

/// Retires a duplicate source. Tries a hard delete first; when a foreign key
/// refuses it, falls back to marking the row superseded. Either way exactly
/// one audit entry records what happened.
pub async fn retire_source(
    pool: &DbPool,
    id: SourceId,
    mode: WriteMode,
    process: &str,
) -> Result<Option<RetireOutcome>, StorageError> {
    let mut tx = pool.begin().await?;

    let snapshot = sqlx::query_as::<_, (String, i64, Option<i64>)>(
        "SELECT fingerprint, amount_cents, linked_target_id FROM source_records WHERE id = ? AND superseded = 0"
    )
    .bind(id.0)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((fingerprint, amount_cents, linked)) = snapshot else {
        tx.rollback().await?;
        return Ok(None);
    };

    let deleted = sqlx::query("DELETE FROM source_records WHERE id = ?")
        .bind(id.0)
        .execute(&mut *tx)
        .await;

    let (outcome, entry) = match deleted {
        Ok(_) => (
            RetireOutcome::Deleted,
            AuditEntry {
                id: None,
                recorded_at: None,
                process: process.to_string(),
                action: AuditAction::Delete,
                entity: "source_record".to_string(),
                entity_id: id.0,
                field: None,
                old_value: Some(fingerprint),
                new_value: None,
                detail: serde_json::json!({ "amount_cents": amount_cents }),
            },
        ),
        Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
            warn!(source = %id, reason = %db.message(), "Delete blocked, marking source superseded");
            sqlx::query("UPDATE source_records SET superseded = 1 WHERE id = ?")
                .bind(id.0)
                .execute(&mut *tx)
                .await?;
            (
                RetireOutcome::Superseded,
                AuditEntry {
                    id: None,
                    recorded_at: None,
                    process: process.to_string(),
                    action: AuditAction::Supersede,
                    entity: "source_record".to_string(),
                    entity_id: id.0,
                    field: Some("superseded".to_string()),
                    old_value: Some("0".to_string()),
                    new_value: Some("1".to_string()),
                    detail: serde_json::json!({
                        "fallback_from": "delete",
                        "reason": db.message(),
                        "linked_target_id": linked,
                    }),
                },
            )
        }
        Err(e) => {
            tx.rollback().await?;
            return Err(e.into());
        }
    };

    write_audit(&mut *tx, &entry).await?;

    if mode.is_write() {
        tx.commit().await?;
        info!(source = %id, outcome = ?outcome, "Retired source record");
    } else {
        tx.rollback().await?;
    }
    Ok(Some(outcome))
}

use chrono::{DateTime, Utc};
use ledgerlink_core::{
    AmountField, AuditAction, AuditEntry, Money, Payment, PaymentId, SourceId, TargetId,
};
use serde::Serialize;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info};

use crate::audit::write_audit;
use crate::db::{decode_error, is_fatal, DbPool, WriteMode};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Source {source_id} was linked concurrently (now linked to {linked_to:?})")]
    ConcurrentLinkConflict {
        source_id: SourceId,
        linked_to: Option<TargetId>,
    },
    #[error("Target {0} no longer exists")]
    TargetUnavailable(TargetId),
    #[error("Source {0} does not exist or has been superseded")]
    SourceMissing(SourceId),
    #[error("Source {0} is not linked")]
    NotLinked(SourceId),
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl LinkError {
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Db(e) => is_fatal(e),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkRequest {
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub amount: Money,
    pub matched_field: Option<AmountField>,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkResult {
    pub payment_id: PaymentId,
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    /// False in dry-run mode: everything above was computed and rolled back.
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlinkResult {
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub committed: bool,
}

/// Links one source to one target in a single transaction.
///
/// The source is claimed with a conditional update that only succeeds while
/// it is still unlinked, so two runs racing for the same source cannot both
/// win. The payment row is inserted, the target's paid amount and balance
/// are recomputed from the payments table, and one audit entry is written.
/// In dry-run mode the transaction is rolled back after all of that.
pub async fn apply_link(
    pool: &DbPool,
    request: &LinkRequest,
    mode: WriteMode,
    process: &str,
) -> Result<LinkResult, LinkError> {
    let mut tx = pool.begin().await?;

    let balance_before = match read_balance(&mut tx, request.target_id).await? {
        Some(balance) => balance,
        None => {
            tx.rollback().await?;
            return Err(LinkError::TargetUnavailable(request.target_id));
        }
    };

    let claimed = sqlx::query(
        "UPDATE source_records SET linked_target_id = ? WHERE id = ? AND linked_target_id IS NULL AND superseded = 0"
    )
    .bind(request.target_id.0)
    .bind(request.source_id.0)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        let current = sqlx::query_as::<_, (Option<i64>, i64)>(
            "SELECT linked_target_id, superseded FROM source_records WHERE id = ?",
        )
        .bind(request.source_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        tx.rollback().await?;
        return Err(match current {
            Some((Some(linked), _)) => LinkError::ConcurrentLinkConflict {
                source_id: request.source_id,
                linked_to: Some(TargetId(linked)),
            },
            _ => LinkError::SourceMissing(request.source_id),
        });
    }

    let amount = request.amount.abs();
    let inserted = sqlx::query(
        "INSERT INTO payments (source_record_id, target_id, amount_cents, matched_field, score, created_at) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(request.source_id.0)
    .bind(request.target_id.0)
    .bind(amount.to_cents())
    .bind(request.matched_field.map(AmountField::as_str))
    .bind(request.score)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await;

    let payment_id = match inserted {
        Ok(result) => PaymentId(result.last_insert_rowid()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            tx.rollback().await?;
            return Err(LinkError::ConcurrentLinkConflict {
                source_id: request.source_id,
                linked_to: None,
            });
        }
        Err(e) => return Err(e.into()),
    };

    recompute_balance(&mut tx, request.target_id).await?;
    let balance_after = read_balance(&mut tx, request.target_id)
        .await?
        .ok_or(LinkError::TargetUnavailable(request.target_id))?;

    write_audit(
        &mut tx,
        &AuditEntry {
            id: None,
            recorded_at: None,
            process: process.to_string(),
            action: AuditAction::Link,
            entity: "source_record".to_string(),
            entity_id: request.source_id.0,
            field: Some("linked_target_id".to_string()),
            old_value: None,
            new_value: Some(request.target_id.0.to_string()),
            detail: serde_json::json!({
                "payment_id": payment_id.0,
                "amount_cents": amount.to_cents(),
                "matched_field": request.matched_field.map(AmountField::as_str),
                "score": request.score,
                "balance_before_cents": balance_before.to_cents(),
                "balance_after_cents": balance_after.to_cents(),
            }),
        },
    )
    .await?;

    let committed = finish(tx, mode).await?;
    if committed {
        info!(source = %request.source_id, target = %request.target_id, amount = %amount, "Linked");
    } else {
        debug!(source = %request.source_id, target = %request.target_id, amount = %amount, "Dry run: link rolled back");
    }

    Ok(LinkResult {
        payment_id,
        source_id: request.source_id,
        target_id: request.target_id,
        amount,
        balance_before,
        balance_after,
        committed,
    })
}

/// Manual `Linked -> Unlinked` override. Never called by the matching pass.
pub async fn unlink(
    pool: &DbPool,
    source_id: SourceId,
    mode: WriteMode,
    process: &str,
) -> Result<UnlinkResult, LinkError> {
    let mut tx = pool.begin().await?;

    let linked = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT linked_target_id FROM source_records WHERE id = ?",
    )
    .bind(source_id.0)
    .fetch_optional(&mut *tx)
    .await?;
    let target_id = match linked {
        None => {
            tx.rollback().await?;
            return Err(LinkError::SourceMissing(source_id));
        }
        Some(None) => {
            tx.rollback().await?;
            return Err(LinkError::NotLinked(source_id));
        }
        Some(Some(id)) => TargetId(id),
    };

    let balance_before = read_balance(&mut tx, target_id)
        .await?
        .ok_or(LinkError::TargetUnavailable(target_id))?;

    let removed = sqlx::query_as::<_, (i64, i64)>(
        "DELETE FROM payments WHERE source_record_id = ? RETURNING id, amount_cents",
    )
    .bind(source_id.0)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query("UPDATE source_records SET linked_target_id = NULL WHERE id = ?")
        .bind(source_id.0)
        .execute(&mut *tx)
        .await?;

    recompute_balance(&mut tx, target_id).await?;
    let balance_after = read_balance(&mut tx, target_id)
        .await?
        .ok_or(LinkError::TargetUnavailable(target_id))?;

    let amount = removed.map(|(_, cents)| Money::from_cents(cents)).unwrap_or_else(Money::zero);
    write_audit(
        &mut tx,
        &AuditEntry {
            id: None,
            recorded_at: None,
            process: process.to_string(),
            action: AuditAction::Unlink,
            entity: "source_record".to_string(),
            entity_id: source_id.0,
            field: Some("linked_target_id".to_string()),
            old_value: Some(target_id.0.to_string()),
            new_value: None,
            detail: serde_json::json!({
                "payment_id": removed.map(|(id, _)| id),
                "amount_cents": amount.to_cents(),
                "balance_before_cents": balance_before.to_cents(),
                "balance_after_cents": balance_after.to_cents(),
            }),
        },
    )
    .await?;

    let committed = finish(tx, mode).await?;
    if committed {
        info!(source = %source_id, target = %target_id, "Unlinked");
    }

    Ok(UnlinkResult {
        source_id,
        target_id,
        amount,
        balance_before,
        balance_after,
        committed,
    })
}

async fn finish(tx: sqlx::Transaction<'_, sqlx::Sqlite>, mode: WriteMode) -> Result<bool, sqlx::Error> {
    match mode {
        WriteMode::Write => {
            tx.commit().await?;
            Ok(true)
        }
        WriteMode::DryRun => {
            tx.rollback().await?;
            Ok(false)
        }
    }
}

async fn read_balance(conn: &mut SqliteConnection, target: TargetId) -> Result<Option<Money>, sqlx::Error> {
    let cents = sqlx::query_scalar::<_, i64>("SELECT balance_cents FROM target_records WHERE id = ?")
        .bind(target.0)
        .fetch_optional(conn)
        .await?;
    Ok(cents.map(Money::from_cents))
}

/// Paid amount and balance always come from a fresh sum over payments.
async fn recompute_balance(conn: &mut SqliteConnection, target: TargetId) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE target_records \
         SET paid_cents = (SELECT COALESCE(SUM(amount_cents), 0) FROM payments WHERE target_id = ?1), \
             balance_cents = due_cents - (SELECT COALESCE(SUM(amount_cents), 0) FROM payments WHERE target_id = ?1) \
         WHERE id = ?1",
    )
    .bind(target.0)
    .execute(conn)
    .await?;
    Ok(())
}

type PaymentRow = (i64, i64, i64, i64, Option<String>, Option<i32>, DateTime<Utc>);

pub async fn get_payments_for_target(pool: &DbPool, target: TargetId) -> Result<Vec<Payment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaymentRow>(
        "SELECT id, source_record_id, target_id, amount_cents, matched_field, score, created_at FROM payments WHERE target_id = ? ORDER BY id"
    )
    .bind(target.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(Payment {
                id: PaymentId(r.0),
                source_id: SourceId(r.1),
                target_id: TargetId(r.2),
                amount: Money::from_cents(r.3),
                matched_field: r.4.map(|f| f.parse::<AmountField>()).transpose().map_err(decode_error)?,
                score: r.5,
                created_at: r.6,
            })
        })
        .collect()
}

pub async fn count_links(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{charter, credit, date, open};
    use crate::{get_audit_trail, get_source, get_target};

    fn request(source_id: SourceId, target_id: TargetId, cents: i64) -> LinkRequest {
        LinkRequest {
            source_id,
            target_id,
            amount: Money::from_cents(cents),
            matched_field: Some(AmountField::DueAmount),
            score: Some(70),
        }
    }

    #[tokio::test]
    async fn write_mode_links_and_recomputes_balance() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "E-TRANSFER 019233", 120_000, date(2013, 6, 10)).await;

        let result = apply_link(&pool, &request(source, target, 120_000), WriteMode::Write, "test")
            .await
            .unwrap();
        assert!(result.committed);
        assert_eq!(result.balance_before, Money::from_cents(120_000));
        assert_eq!(result.balance_after, Money::zero());

        let stored = get_target(&pool, target).await.unwrap().unwrap();
        assert_eq!(stored.paid_amount, Money::from_cents(120_000));
        assert_eq!(stored.balance, Money::zero());
        assert_eq!(get_source(&pool, source).await.unwrap().unwrap().linked_target, Some(target));

        let trail = get_audit_trail(&pool, "source_record", source.0).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Link);
        assert_eq!(trail[0].new_value.as_deref(), Some(target.0.to_string().as_str()));
    }

    #[tokio::test]
    async fn dry_run_leaves_no_trace() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "E-TRANSFER", 120_000, date(2013, 6, 10)).await;

        let result = apply_link(&pool, &request(source, target, 120_000), WriteMode::DryRun, "test")
            .await
            .unwrap();
        assert!(!result.committed);
        assert_eq!(result.balance_after, Money::zero());

        assert_eq!(count_links(&pool).await.unwrap(), 0);
        assert_eq!(get_target(&pool, target).await.unwrap().unwrap().balance, Money::from_cents(120_000));
        assert_eq!(get_source(&pool, source).await.unwrap().unwrap().linked_target, None);
        assert!(get_audit_trail(&pool, "source_record", source.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_link_for_same_source_is_a_conflict() {
        let (_dir, pool) = open().await;
        let first = charter(&pool, "019233", 50_000, date(2013, 6, 12)).await;
        let second = charter(&pool, "019234", 50_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "DEPOSIT", 50_000, date(2013, 6, 10)).await;

        apply_link(&pool, &request(source, first, 50_000), WriteMode::Write, "run-1")
            .await
            .unwrap();
        let err = apply_link(&pool, &request(source, second, 50_000), WriteMode::Write, "run-2")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::ConcurrentLinkConflict { linked_to: Some(t), .. } if t == first
        ));
        assert!(!err.is_fatal());

        assert_eq!(count_links(&pool).await.unwrap(), 1);
        assert_eq!(get_target(&pool, second).await.unwrap().unwrap().balance, Money::from_cents(50_000));
        assert_eq!(get_audit_trail(&pool, "source_record", source.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn balance_is_due_minus_sum_of_links() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 150_000, date(2013, 6, 12)).await;
        let a = credit(&pool, "DEPOSIT A", 50_000, date(2013, 6, 1)).await;
        let b = credit(&pool, "DEPOSIT B", 30_025, date(2013, 6, 5)).await;

        apply_link(&pool, &request(a, target, 50_000), WriteMode::Write, "t").await.unwrap();
        apply_link(&pool, &request(b, target, -30_025), WriteMode::Write, "t").await.unwrap();

        let stored = get_target(&pool, target).await.unwrap().unwrap();
        let payments = get_payments_for_target(&pool, target).await.unwrap();
        let linked: Money = payments.iter().map(|p| p.amount).sum();
        assert_eq!(payments.len(), 2);
        assert_eq!(linked, Money::from_cents(80_025));
        assert_eq!(stored.balance, stored.due_amount - linked);
        assert_eq!(stored.paid_amount, linked);
    }

    #[tokio::test]
    async fn missing_target_and_source_are_reported() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 50_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "DEPOSIT", 50_000, date(2013, 6, 10)).await;

        assert!(matches!(
            apply_link(&pool, &request(source, TargetId(999), 50_000), WriteMode::Write, "t").await,
            Err(LinkError::TargetUnavailable(TargetId(999)))
        ));
        assert!(matches!(
            apply_link(&pool, &request(SourceId(999), target, 50_000), WriteMode::Write, "t").await,
            Err(LinkError::SourceMissing(SourceId(999)))
        ));
        assert_eq!(count_links(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unlink_restores_balance_and_is_audited() {
        let (_dir, pool) = open().await;
        let target = charter(&pool, "019233", 120_000, date(2013, 6, 12)).await;
        let source = credit(&pool, "E-TRANSFER", 120_000, date(2013, 6, 10)).await;
        apply_link(&pool, &request(source, target, 120_000), WriteMode::Write, "link")
            .await
            .unwrap();

        let dry = unlink(&pool, source, WriteMode::DryRun, "unlink").await.unwrap();
        assert!(!dry.committed);
        assert_eq!(count_links(&pool).await.unwrap(), 1);

        let result = unlink(&pool, source, WriteMode::Write, "unlink").await.unwrap();
        assert_eq!(result.target_id, target);
        assert_eq!(result.balance_after, Money::from_cents(120_000));
        assert_eq!(count_links(&pool).await.unwrap(), 0);
        assert_eq!(get_source(&pool, source).await.unwrap().unwrap().linked_target, None);

        let actions: Vec<AuditAction> = get_audit_trail(&pool, "source_record", source.0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Link, AuditAction::Unlink]);

        assert!(matches!(
            unlink(&pool, source, WriteMode::Write, "unlink").await,
            Err(LinkError::NotLinked(_))
        ));
    }
}

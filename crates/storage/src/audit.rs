use chrono::{DateTime, Utc};
use ledgerlink_core::{AuditAction, AuditEntry};
use sqlx::SqliteConnection;

use crate::db::{decode_error, DbPool};

/// Appends one entry. Called inside the transaction of the mutation it
/// describes, so the entry commits or rolls back with it.
pub(crate) async fn write_audit(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<i64, sqlx::Error> {
    let recorded_at = entry.recorded_at.unwrap_or_else(Utc::now);
    let result = sqlx::query(
        "INSERT INTO audit_log (recorded_at, process, action, entity, entity_id, field, old_value, new_value, detail) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(recorded_at)
    .bind(&entry.process)
    .bind(entry.action.as_str())
    .bind(&entry.entity)
    .bind(entry.entity_id)
    .bind(&entry.field)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(entry.detail.to_string())
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

type AuditRow = (
    i64,
    DateTime<Utc>,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

pub async fn get_audit_trail(pool: &DbPool, entity: &str, entity_id: i64) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, recorded_at, process, action, entity, entity_id, field, old_value, new_value, detail FROM audit_log WHERE entity = ? AND entity_id = ? ORDER BY id"
    )
    .bind(entity)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(audit_from_row).collect()
}

pub async fn get_audit_for_process(pool: &DbPool, process: &str) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, recorded_at, process, action, entity, entity_id, field, old_value, new_value, detail FROM audit_log WHERE process = ? ORDER BY id"
    )
    .bind(process)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(audit_from_row).collect()
}

fn audit_from_row(r: AuditRow) -> Result<AuditEntry, sqlx::Error> {
    let action: AuditAction = r.3.parse().map_err(decode_error)?;
    let detail = serde_json::from_str(&r.9).map_err(|e| decode_error(e.to_string()))?;
    Ok(AuditEntry {
        id: Some(r.0),
        recorded_at: Some(r.1),
        process: r.2,
        action,
        entity: r.4,
        entity_id: r.5,
        field: r.6,
        old_value: r.7,
        new_value: r.8,
        detail,
    })
}

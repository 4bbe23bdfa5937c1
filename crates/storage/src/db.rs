use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

/// Bumped whenever a migration changes an existing table.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Database schema version {found} is newer than supported version {expected}")]
    SchemaMismatch { found: i64, expected: i64 },
}

impl StorageError {
    pub fn is_fatal(&self) -> bool {
        match self {
            StorageError::Db(e) => is_fatal(e),
            StorageError::SchemaMismatch { .. } => true,
        }
    }
}

/// Statement-level rejections (constraints, bad SQL against one row) are
/// per-record; anything that means the store itself is unusable is fatal.
pub fn is_fatal(err: &sqlx::Error) -> bool {
    !matches!(err, sqlx::Error::Database(_) | sqlx::Error::RowNotFound)
}

/// Whether a write mutates the store or only reports what it would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    DryRun,
    Write,
}

impl WriteMode {
    pub fn from_flag(write: bool) -> Self {
        if write {
            WriteMode::Write
        } else {
            WriteMode::DryRun
        }
    }

    pub fn is_write(self) -> bool {
        self == WriteMode::Write
    }
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    check_schema_version(&pool).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

async fn check_schema_version(pool: &DbPool) -> Result<(), StorageError> {
    let found: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    if found > SCHEMA_VERSION {
        return Err(StorageError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS target_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            reference TEXT,
            event_date TEXT NOT NULL,
            due_cents INTEGER NOT NULL,
            retainer_cents INTEGER,
            paid_cents INTEGER NOT NULL DEFAULT 0,
            balance_cents INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_target_records_kind_date ON target_records(kind, event_date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_target_records_reference ON target_records(reference)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            occurred_on TEXT NOT NULL,
            raw_description TEXT NOT NULL,
            memo TEXT,
            amount_cents INTEGER NOT NULL,
            source_kind TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            canonical_vendor TEXT,
            account_code TEXT,
            linked_target_id INTEGER,
            superseded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (source_kind, fingerprint),
            FOREIGN KEY (linked_target_id) REFERENCES target_records(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No cascade: a source with a realized payment cannot be hard-deleted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_record_id INTEGER NOT NULL UNIQUE,
            target_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            matched_field TEXT,
            score INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (source_record_id) REFERENCES source_records(id),
            FOREIGN KEY (target_id) REFERENCES target_records(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_payments_target ON payments(target_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            process TEXT NOT NULL,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            field TEXT,
            old_value TEXT,
            new_value TEXT,
            detail TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity, entity_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_kind TEXT NOT NULL,
            line INTEGER NOT NULL,
            raw TEXT NOT NULL,
            reason TEXT NOT NULL,
            process TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (source_kind, raw)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_alias_suggestions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_text TEXT NOT NULL UNIQUE,
            suggested_name TEXT NOT NULL,
            category TEXT,
            confidence REAL NOT NULL,
            rule TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ledger tables that connect short codes and cheques to reserve numbers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reserve_number TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS short_code_ledger (
            short_code TEXT NOT NULL,
            ledger_entry_id INTEGER NOT NULL,
            PRIMARY KEY (short_code, ledger_entry_id),
            FOREIGN KEY (ledger_entry_id) REFERENCES ledger_entries(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cheque_register (
            check_number TEXT PRIMARY KEY,
            reserve_number TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(pool)
        .await?;

    Ok(())
}

pub(crate) fn decode_error(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_db_sets_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("ledger.db")).await.unwrap();
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        create_db(&path).await.unwrap().close().await;
        assert!(create_db(&path).await.is_ok());
    }

    #[tokio::test]
    async fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let pool = create_db(&path).await.unwrap();
        sqlx::query("PRAGMA user_version = 99")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        match create_db(&path).await {
            Err(StorageError::SchemaMismatch { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn constraint_errors_are_not_fatal() {
        assert!(is_fatal(&sqlx::Error::PoolTimedOut));
        assert!(!is_fatal(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn dry_run_is_the_default() {
        assert_eq!(WriteMode::default(), WriteMode::DryRun);
        assert!(WriteMode::from_flag(true).is_write());
    }
}

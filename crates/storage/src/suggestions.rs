use ledgerlink_import::VendorSuggestion;
use sqlx::SqliteConnection;

use crate::db::DbPool;

/// Parks a canonicalizer suggestion for human review. One pending row per
/// raw text; repeats are ignored. Nothing here touches the alias file.
pub async fn record_suggestion(conn: &mut SqliteConnection, suggestion: &VendorSuggestion) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO vendor_alias_suggestions (raw_text, suggested_name, category, confidence, rule) VALUES (?, ?, ?, ?, ?) ON CONFLICT (raw_text) DO NOTHING"
    )
    .bind(&suggestion.raw_text)
    .bind(&suggestion.suggested_name)
    .bind(&suggestion.category)
    .bind(suggestion.confidence)
    .bind(&suggestion.rule)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_suggestions(pool: &DbPool) -> Result<Vec<VendorSuggestion>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String, Option<String>, f32, String)>(
        "SELECT raw_text, suggested_name, category, confidence, rule FROM vendor_alias_suggestions ORDER BY suggested_name, raw_text"
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| VendorSuggestion {
            raw_text: r.0,
            suggested_name: r.1,
            category: r.2,
            confidence: r.3,
            rule: r.4,
        })
        .collect())
}

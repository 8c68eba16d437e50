//! Status events recorded by the worker

use super::Database;
use crate::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncLogEntry {
    pub id: i64,
    pub queue: String,
    pub event: String,
    pub status: Option<String>,
    pub payload: String,
    pub received_at: String,
}

pub async fn record(
    db: &Database,
    queue: &str,
    event: &str,
    status: Option<&str>,
    payload: &serde_json::Value,
) -> Result<i64> {
    let payload = serde_json::to_string(payload)?;
    let done = sqlx::query(
        "INSERT INTO sync_log (queue, event, status, payload) VALUES (?, ?, ?, ?)",
    )
    .bind(queue)
    .bind(event)
    .bind(status)
    .bind(payload)
    .execute(db.pool())
    .await?;

    Ok(done.last_insert_rowid())
}

/// Most recent entries first
pub async fn recent(db: &Database, limit: i64) -> Result<Vec<SyncLogEntry>> {
    let entries = sqlx::query_as::<_, SyncLogEntry>(
        r#"
        SELECT id, queue, event, status, payload, CAST(received_at AS TEXT) AS received_at
        FROM sync_log
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(db.pool())
    .await?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_list() {
        let db = Database::in_memory().await.unwrap();

        record(&db, "event_sync_events", "event_synced", Some("success"), &json!({"event_id": "1"}))
            .await
            .unwrap();
        record(&db, "event_sync_events", "events_sync_completed", None, &json!({}))
            .await
            .unwrap();

        let entries = recent(&db, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "events_sync_completed");
        assert_eq!(entries[1].status.as_deref(), Some("success"));

        assert_eq!(recent(&db, 1).await.unwrap().len(), 1);
    }
}

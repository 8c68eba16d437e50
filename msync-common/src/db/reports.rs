//! Read-only aggregate queries backing the inventory and report endpoints

use super::Database;
use crate::{Error, Result};
use serde::Serialize;

/// Totals across all events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub parking_pass_count: i64,
    pub wristband_count: i64,
}

/// Per-event issuance counts
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EventReportRow {
    pub event_id: String,
    pub event_name: Option<String>,
    pub event_date: Option<String>,
    pub parking_pass_count: i64,
    pub wristband_count: i64,
}

pub async fn inventory(db: &Database) -> Result<Inventory> {
    let (parking_pass_count, wristband_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM parking_passes),
            (SELECT COUNT(*) FROM wristbands)
        "#,
    )
    .fetch_one(db.pool())
    .await?;

    Ok(Inventory {
        parking_pass_count,
        wristband_count,
    })
}

/// One row per synced event; counts use correlated subqueries so the two
/// joins don't multiply each other
pub async fn event_report(db: &Database) -> Result<Vec<EventReportRow>> {
    let rows = sqlx::query_as::<_, EventReportRow>(
        r#"
        SELECT
            e.altru_event_id AS event_id,
            e.name AS event_name,
            e.event_date AS event_date,
            (SELECT COUNT(*) FROM parking_passes p WHERE p.event_id = e.altru_event_id)
                AS parking_pass_count,
            (SELECT COUNT(*) FROM wristbands w WHERE w.event_id = e.altru_event_id)
                AS wristband_count
        FROM events e
        ORDER BY e.event_date, e.altru_event_id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows)
}

/// A constituent linked to an event through `events.customer_id`
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Registrant {
    pub id: i64,
    pub altru_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Customers registered for one event. An event that was never synced is
/// `NotFound`; a synced event without a linked constituent has no registrants.
pub async fn registrants(db: &Database, event_id: &str) -> Result<Vec<Registrant>> {
    let known: Option<i64> = sqlx::query_scalar("SELECT id FROM events WHERE altru_event_id = ?")
        .bind(event_id)
        .fetch_optional(db.pool())
        .await?;
    if known.is_none() {
        return Err(Error::NotFound(format!("Event {event_id} not found")));
    }

    let rows = sqlx::query_as::<_, Registrant>(
        r#"
        SELECT c.id, c.altru_id, c.first_name, c.last_name, c.email, c.phone
        FROM customers c
        JOIN events e ON e.customer_id = c.id
        WHERE e.altru_event_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(event_id)
    .fetch_all(db.pool())
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inventory_and_report_counts() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO events (altru_event_id, name, event_date) VALUES ('EV1', 'Gala', '2025-01-01'), ('EV2', 'Tour', '2025-01-02')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO parking_passes (event_id, issued_at) VALUES ('EV1', 'a'), ('EV1', 'b')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO wristbands (event_id, issued_at) VALUES ('EV1', 'a'), ('EV1', 'b'), ('EV1', 'c')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let totals = inventory(&db).await.unwrap();
        assert_eq!(totals.parking_pass_count, 2);
        assert_eq!(totals.wristband_count, 3);

        let report = event_report(&db).await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].event_id, "EV1");
        assert_eq!(report[0].parking_pass_count, 2);
        assert_eq!(report[0].wristband_count, 3);
        assert_eq!(report[1].parking_pass_count, 0);
    }

    #[tokio::test]
    async fn test_registrants_follow_the_event_customer_link() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO customers (altru_id, first_name, email) VALUES ('C1', 'Ada', 'ada@example.org'), ('C2', 'Bob', NULL)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO events (altru_event_id, customer_id, name) VALUES ('EV1', 1, 'Gala'), ('EV2', NULL, 'Tour')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let linked = registrants(&db, "EV1").await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].altru_id, "C1");
        assert_eq!(linked[0].email.as_deref(), Some("ada@example.org"));

        assert!(registrants(&db, "EV2").await.unwrap().is_empty());
        assert!(matches!(
            registrants(&db, "EV9").await,
            Err(Error::NotFound(_))
        ));
    }
}

//! Sales entries recorded through the API

use msync_common::db::Database;
use msync_common::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sale {
    pub sale_id: i64,
    pub customer_id: i64,
    pub event_id: String,
    pub amount: f64,
}

/// Insert a sale for an existing customer
pub async fn record_sale(db: &Database, customer_id: i64, event_id: &str, amount: f64) -> Result<Sale> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidInput("amount must be a positive number".to_string()));
    }
    if event_id.trim().is_empty() {
        return Err(Error::InvalidInput("event_id is required".to_string()));
    }

    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE id = ?")
        .bind(customer_id)
        .fetch_one(db.pool())
        .await?;
    if known == 0 {
        return Err(Error::NotFound(format!("customer {}", customer_id)));
    }

    let sale_id: i64 = sqlx::query_scalar(
        "INSERT INTO sales (customer_id, event_id, amount) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(customer_id)
    .bind(event_id)
    .bind(amount)
    .fetch_one(db.pool())
    .await?;

    Ok(Sale {
        sale_id,
        customer_id,
        event_id: event_id.to_string(),
        amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_sale_validates() {
        let db = Database::in_memory().await.unwrap();

        assert!(matches!(
            record_sale(&db, 1, "EV1", 0.0).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            record_sale(&db, 1, "EV1", f64::NAN).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            record_sale(&db, 1, "EV1", 5.0).await,
            Err(Error::NotFound(_))
        ));

        sqlx::query("INSERT INTO customers (altru_id) VALUES ('C1')")
            .execute(db.pool())
            .await
            .unwrap();
        let sale = record_sale(&db, 1, "EV1", 12.5).await.unwrap();
        assert_eq!(sale.sale_id, 1);
        assert_eq!(sale.amount, 12.5);
    }
}

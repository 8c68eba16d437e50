//! Schema creation
//!
//! All statements are `CREATE ... IF NOT EXISTS`, so running them against an
//! existing database is a no-op.
//!
//! Synced rows carry a unique natural key so repeated syncs update in place:
//! - customers: `altru_id`
//! - events: `altru_event_id`
//! - wristbands / parking_passes: `external_key` (CRM id, or `event_id@issued_at`)
//!
//! Locally issued parking passes have a NULL `external_key`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::debug;

/// Create all tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_customers_table(pool).await?;
    create_employees_table(pool).await?;
    create_events_table(pool).await?;
    create_wristbands_table(pool).await?;
    create_parking_passes_table(pool).await?;
    create_pass_types_table(pool).await?;
    create_sales_table(pool).await?;
    create_sync_log_table(pool).await?;

    debug!("Database schema initialized");
    Ok(())
}

async fn create_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id TEXT,
            first_name TEXT,
            last_name TEXT,
            phone TEXT,
            email TEXT,
            address1 TEXT,
            address2 TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            altru_id TEXT NOT NULL UNIQUE,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_employees_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS employees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT,
            last_name TEXT,
            phone TEXT,
            email TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_employees_email ON employees(email)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            altru_event_id TEXT NOT NULL UNIQUE,
            customer_id INTEGER REFERENCES customers(id) ON DELETE SET NULL,
            employee_id INTEGER REFERENCES employees(id) ON DELETE SET NULL,
            name TEXT,
            event_date TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_wristbands_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wristbands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_key TEXT UNIQUE,
            event_id TEXT NOT NULL,
            issued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_wristbands_event ON wristbands(event_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_parking_passes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parking_passes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_key TEXT UNIQUE,
            event_id TEXT NOT NULL,
            issued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_parking_passes_event ON parking_passes(event_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pass_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pass_types (
            pass_id INTEGER PRIMARY KEY REFERENCES parking_passes(id) ON DELETE CASCADE,
            pass_type TEXT NOT NULL,
            cost REAL NOT NULL DEFAULT 0.0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sales_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            event_id TEXT NOT NULL,
            amount REAL NOT NULL,
            sale_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            event TEXT NOT NULL,
            status TEXT,
            payload TEXT NOT NULL,
            received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = memory_pool().await;
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 8);
    }

    #[tokio::test]
    async fn test_null_external_keys_do_not_conflict() {
        let pool = memory_pool().await;
        init_schema(&pool).await.unwrap();

        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO parking_passes (event_id, issued_at) VALUES ('EV1', '2025-01-01')",
            )
            .execute(&pool)
            .await
            .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parking_passes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}

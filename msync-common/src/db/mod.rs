//! Database service
//!
//! Thin wrapper around a SQLite pool:
//! - connection with a fixed number of retries
//! - idempotent schema creation
//! - a generic parameterized-query executor ([`Database::execute`])

mod executor;
pub mod init;
pub mod reports;
pub mod sync_log;

pub use executor::{QueryOutcome, SqlParam, StatementKind};

use crate::config::DatabaseConfig;
use crate::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pooled database handle shared by the sync services and HTTP handlers
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect with retry, then create the schema if needed
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        // Every connection to `:memory:` is a separate database
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let url = config.url.clone();
        let pool = retry_connect(config.connect_retries, config.retry_delay(), || {
            let url = url.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect(&url)
                    .await
                    .map_err(Error::Database)
            }
        })
        .await?;

        info!("Connected to database");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, enabling foreign keys and creating the schema
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        init::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Newest parking pass id recorded for an event
    pub async fn existing_pass_id(&self, event_id: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar(
            "SELECT id FROM parking_passes WHERE event_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Table name → auto-assigned integer primary key column
    pub async fn auto_increment_columns(&self) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT m.name, p.name
            FROM sqlite_master AS m
            JOIN pragma_table_info(m.name) AS p
            WHERE m.type = 'table'
              AND m.name NOT LIKE 'sqlite_%'
              AND p.pk = 1
              AND lower(p.type) = 'integer'
            ORDER BY m.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Connection with an open `BEGIN IMMEDIATE` transaction
    ///
    /// The write lock is taken up front, so a read-check-write sequence on
    /// this connection cannot interleave with another writer. Hand the
    /// connection back through [`finish_immediate`].
    pub async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}

/// Commit when `result` is `Ok`, roll back otherwise
///
/// A connection that cannot be rolled back is detached from the pool
/// instead of being reused mid-transaction.
pub async fn finish_immediate<T>(mut conn: PoolConnection<Sqlite>, result: Result<T>) -> Result<T> {
    let failure = match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => return Ok(value),
            Err(e) => Error::from(e),
        },
        Err(e) => e,
    };

    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!(error = %e, "Rollback failed; discarding connection");
        drop(conn.detach());
    }
    Err(failure)
}

/// Run `connect` up to `attempts` times, sleeping `delay` between failures
pub async fn retry_connect<F, Fut, T>(attempts: u32, delay: Duration, mut connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(conn) => {
                if attempt > 1 {
                    debug!(attempt, "Database connection succeeded after retry");
                }
                return Ok(conn);
            }
            Err(e) if attempt >= attempts => {
                error!(attempts, error = %e, "Failed to connect to database");
                return Err(e);
            }
            Err(e) => {
                warn!(attempt, error = %e, "Database connection attempt failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_connect_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_connect(3, Duration::from_millis(1), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Internal("refused".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_connect_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_connect(3, Duration::from_millis(1), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Internal("refused".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_in_memory_url() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 8,
            connect_retries: 1,
            retry_delay_ms: 1,
        };
        let db = Database::connect(&config).await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'customers'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn test_auto_increment_columns() {
        let db = Database::in_memory().await.unwrap();
        let columns = db.auto_increment_columns().await.unwrap();

        assert_eq!(columns.get("customers").map(String::as_str), Some("id"));
        assert_eq!(columns.get("parking_passes").map(String::as_str), Some("id"));
        assert!(!columns.contains_key("sqlite_sequence"));
    }

    #[tokio::test]
    async fn test_finish_immediate_commits_or_rolls_back() {
        let db = Database::in_memory().await.unwrap();

        let mut conn = db.begin_immediate().await.unwrap();
        let inserted = sqlx::query("INSERT INTO customers (altru_id) VALUES ('A1')")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(Error::from);
        finish_immediate(conn, inserted).await.unwrap();

        let mut conn = db.begin_immediate().await.unwrap();
        sqlx::query("INSERT INTO customers (altru_id) VALUES ('A2')")
            .execute(&mut *conn)
            .await
            .unwrap();
        let failed: Result<()> = Err(Error::Internal("abort".to_string()));
        assert!(finish_immediate(conn, failed).await.is_err());

        let ids: Vec<String> = sqlx::query_scalar("SELECT altru_id FROM customers")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(ids, vec!["A1".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_pass_id_returns_newest() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.existing_pass_id("EV1").await.unwrap(), None);

        for issued in ["2025-01-01T10:00:00", "2025-01-01T11:00:00"] {
            sqlx::query("INSERT INTO parking_passes (event_id, issued_at) VALUES ('EV1', ?)")
                .bind(issued)
                .execute(db.pool())
                .await
                .unwrap();
        }

        assert_eq!(db.existing_pass_id("EV1").await.unwrap(), Some(2));
    }
}

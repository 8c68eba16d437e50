//! Generic parameterized-query executor
//!
//! The leading keyword of the statement decides what [`Database::execute`]
//! returns:
//!
//! | Statement            | Outcome                                           |
//! |----------------------|---------------------------------------------------|
//! | `INSERT`             | `Inserted(id)` from `RETURNING` or last rowid     |
//! | upsert, no RETURNING | `Affected(rows)`                                  |
//! | `UPDATE` / `DELETE`  | `Affected(rows)`                                  |
//! | `SELECT` / `WITH`    | `Rows(..)` as JSON objects keyed by column name   |
//! | anything else        | `Done`                                            |
//!
//! An `ON CONFLICT ... DO UPDATE` without `RETURNING` reports `Affected`:
//! SQLite's last rowid is stale when the conflict path updated a row, so no id
//! is claimed. Upserts that need the row id must use `RETURNING id`.

use super::Database;
use crate::Result;
use serde_json::{json, Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row, ValueRef};
use tracing::{error, warn};

/// A bound query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Real(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// Statement category, taken from the first keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
    Other,
}

impl StatementKind {
    pub fn of(sql: &str) -> Self {
        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "INSERT" | "REPLACE" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "SELECT" | "WITH" => StatementKind::Select,
            _ => StatementKind::Other,
        }
    }
}

/// Result of [`Database::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Id of the inserted (or upserted, with `RETURNING`) row; `None` when
    /// nothing was written
    Inserted(Option<i64>),
    /// Rows changed by UPDATE/DELETE
    Affected(u64),
    /// Rows returned by a query
    Rows(Vec<Map<String, Value>>),
    /// Statement ran; nothing to report
    Done,
}

impl QueryOutcome {
    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            QueryOutcome::Inserted(id) => *id,
            _ => None,
        }
    }

    /// True when the statement inserted or changed at least one row
    pub fn wrote(&self) -> bool {
        match self {
            QueryOutcome::Inserted(id) => id.is_some(),
            QueryOutcome::Affected(rows) => *rows > 0,
            _ => false,
        }
    }

    pub fn into_rows(self) -> Vec<Map<String, Value>> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Value of a single-column, single-row result as an integer
    pub fn first_i64(&self) -> Option<i64> {
        match self {
            QueryOutcome::Rows(rows) => rows
                .first()
                .and_then(|row| row.values().next())
                .and_then(Value::as_i64),
            _ => None,
        }
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &'q [SqlParam]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<i64>),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Real(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = row
                .try_get_raw(i)
                .ok()
                .and_then(|raw| {
                    if raw.is_null() {
                        Some(Value::Null)
                    } else {
                        row.try_get::<i64, _>(i)
                            .ok()
                            .map(|v| json!(v))
                            .or_else(|| row.try_get::<f64, _>(i).ok().map(|v| json!(v)))
                            .or_else(|| row.try_get::<String, _>(i).ok().map(Value::String))
                    }
                })
                .unwrap_or(Value::Null);
            (column.name().to_string(), value)
        })
        .collect()
}

impl Database {
    /// Execute one statement with positional `?` parameters
    ///
    /// Failures are logged with the statement and parameter count, then returned.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutcome> {
        let result = self.execute_inner(sql, params).await;

        if let Err(e) = &result {
            error!(
                error = %e,
                query = %sql.trim(),
                params = params.len(),
                "Error executing query"
            );
        }

        result
    }

    async fn execute_inner(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutcome> {
        let query = bind_params(sqlx::query(sql), params);

        let upper = sql.to_ascii_uppercase();
        let outcome = match StatementKind::of(sql) {
            StatementKind::Insert if upper.contains("RETURNING") => {
                let row = query.fetch_optional(self.pool()).await?;
                QueryOutcome::Inserted(row.and_then(|r| r.try_get::<i64, _>(0).ok()))
            }
            StatementKind::Insert if upper.contains("DO UPDATE") => {
                let done = query.execute(self.pool()).await?;
                QueryOutcome::Affected(done.rows_affected())
            }
            StatementKind::Insert => {
                let done = query.execute(self.pool()).await?;
                if done.rows_affected() == 0 {
                    QueryOutcome::Inserted(None)
                } else {
                    QueryOutcome::Inserted(Some(done.last_insert_rowid()))
                }
            }
            StatementKind::Update | StatementKind::Delete => {
                let done = query.execute(self.pool()).await?;
                QueryOutcome::Affected(done.rows_affected())
            }
            StatementKind::Select => {
                let rows = query.fetch_all(self.pool()).await?;
                QueryOutcome::Rows(rows.iter().map(row_to_json).collect())
            }
            StatementKind::Other => {
                query.execute(self.pool()).await?;
                QueryOutcome::Done
            }
        };

        Ok(outcome)
    }

    /// Execute the same statement once per parameter set, in one transaction
    ///
    /// An empty batch succeeds without touching the database.
    pub async fn execute_many(&self, sql: &str, batch: &[Vec<SqlParam>]) -> Result<u64> {
        if batch.is_empty() {
            warn!("No parameters provided for execute_many");
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        let mut affected = 0;

        for params in batch {
            match bind_params(sqlx::query(sql), params).execute(&mut *tx).await {
                Ok(done) => affected += done.rows_affected(),
                Err(e) => {
                    error!(error = %e, query = %sql.trim(), "Error executing batch query");
                    // Dropping the transaction rolls it back
                    return Err(e.into());
                }
            }
        }

        tx.commit().await?;
        Ok(affected)
    }
}

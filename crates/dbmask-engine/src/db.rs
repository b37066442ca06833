//! Database access.
//!
//! The engine talks to MySQL through the [`Database`] trait so the run loop
//! can be exercised against an in-memory double in tests. The live
//! implementation wraps a bounded `sqlx` pool; a connection that errors is
//! discarded by the pool rather than returned, and the error always
//! surfaces to the caller — no retries.

use dbmask_core::{RowSnapshot, SqlValue};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use crate::config::ConnectionConfig;
use crate::error::{EngineError, Result};

/// The seam between the engine and a live server.
pub trait Database: Send + Sync {
    /// Executes one statement, returning the affected-row count. Suspends
    /// while waiting for an idle connection or the network round-trip.
    fn execute(&self, sql: String) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Issues a streaming select; rows arrive as they are read off the wire.
    fn fetch(&self, sql: String) -> BoxStream<'static, Result<RowSnapshot>>;

    /// Fetches the server's canonical creation statement for a table.
    fn show_create_table(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Disables referential-integrity checking on every pooled connection.
    ///
    /// The setting is connection-scoped, so this must reach each underlying
    /// connection, not just whichever one a pooled query happens to borrow.
    fn disable_foreign_key_checks(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Live MySQL implementation over a bounded `sqlx` pool.
#[derive(Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
    max_connections: u32,
}

impl MySqlDatabase {
    /// Connects a pool of up to `config.max_connections` connections.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await?;
        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }
}

impl Database for MySqlDatabase {
    async fn execute(&self, sql: String) -> Result<u64> {
        let done = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    fn fetch(&self, sql: String) -> BoxStream<'static, Result<RowSnapshot>> {
        // The sqlx row stream borrows the SQL text, so it is driven from a
        // task that owns both and forwards decoded rows through a bounded
        // channel; the channel capacity caps read-ahead.
        let pool = self.pool.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<RowSnapshot>>(64);
        tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            while let Some(item) = rows.next().await {
                let item = item
                    .map_err(EngineError::from)
                    .and_then(|row| decode_row(&row));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    async fn show_create_table(&self, table: &str) -> Result<String> {
        let sql = format!("SHOW CREATE TABLE {table}");
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        // Columns are (Table, Create Table).
        Ok(row.try_get::<String, _>(1)?)
    }

    async fn disable_foreign_key_checks(&self) -> Result<()> {
        // Hold every connection simultaneously so none can be served a
        // query until it has received the session setting.
        let mut held = Vec::with_capacity(self.max_connections as usize);
        for _ in 0..self.max_connections {
            held.push(self.pool.acquire().await?);
        }
        for conn in &mut held {
            sqlx::query("SET FOREIGN_KEY_CHECKS=0")
                .execute(&mut **conn)
                .await?;
        }
        Ok(())
    }
}

/// Decodes one wire row into a snapshot, by column type name.
fn decode_row(row: &MySqlRow) -> Result<RowSnapshot> {
    let mut snapshot = RowSnapshot::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "BOOLEAN" => row
                .try_get::<Option<i64>, _>(i)?
                .map_or(SqlValue::Null, SqlValue::Int),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(i)?
                .map_or(SqlValue::Null, SqlValue::Uint),
            "FLOAT" | "DOUBLE" => row
                .try_get::<Option<f64>, _>(i)?
                .map_or(SqlValue::Null, SqlValue::Float),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map_or(SqlValue::Null, |d| {
                    SqlValue::Text(d.format("%Y-%m-%d").to_string())
                }),
            "DATETIME" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map_or(SqlValue::Null, |dt| {
                    SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map_or(SqlValue::Null, |dt| {
                    SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }),
            "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
                .try_get::<Option<Vec<u8>>, _>(i)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            // VARCHAR, CHAR, TEXT, ENUM, DECIMAL (exact as text), JSON, ...
            _ => row
                .try_get::<Option<String>, _>(i)?
                .map_or(SqlValue::Null, SqlValue::Text),
        };
        snapshot.set(column.name(), value);
    }
    Ok(snapshot)
}

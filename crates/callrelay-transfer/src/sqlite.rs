use crate::migrations::run_migrations;
use crate::pool::{create_pool, DbPool, StoreSettings};
use crate::{TransferError, TransferStore};
use async_trait::async_trait;
use callrelay_types::TransferDecision;
use rusqlite::{Connection, OptionalExtension};
use std::time::Duration;

/// Durable store shared with call-control through a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteTransferStore {
    pool: DbPool,
}

impl SqliteTransferStore {
    /// Opens (or creates) the database at `path` and applies pending migrations.
    pub fn open(path: &str, settings: StoreSettings) -> Result<Self, TransferError> {
        let pool = create_pool(path, settings)?;
        let applied = run_migrations(&*pool.get()?)?;
        tracing::info!(path, applied, "transfer store ready");
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, TransferError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            op(&conn)
        })
        .await
        .map_err(|e| TransferError::Task(e.to_string()))?
    }
}

#[async_trait]
impl TransferStore for SqliteTransferStore {
    async fn record(&self, session_id: &str, decision: TransferDecision) -> Result<(), TransferError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO transfer_decisions (session_id, decision) VALUES (?1, ?2)
                 ON CONFLICT (session_id) DO NOTHING",
                (&session_id, decision.as_str()),
            )?;
            if inserted == 0 {
                return Err(TransferError::AlreadyRecorded(session_id));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let label: Option<String> = conn
                .query_row(
                    "SELECT decision FROM transfer_decisions WHERE session_id = ?1",
                    [&session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(label.map(|l| l.parse::<TransferDecision>()).transpose()?)
        })
        .await
    }

    async fn take(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let label: Option<String> = conn
                .query_row(
                    "DELETE FROM transfer_decisions WHERE session_id = ?1 RETURNING decision",
                    [&session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(label.map(|l| l.parse::<TransferDecision>()).transpose()?)
        })
        .await
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, TransferError> {
        let modifier = format!("-{} seconds", age.as_secs());
        self.with_conn(move |conn| {
            let purged = conn.execute(
                "DELETE FROM transfer_decisions WHERE recorded_at <= datetime('now', ?1)",
                [&modifier],
            )?;
            Ok(purged)
        })
        .await
    }
}

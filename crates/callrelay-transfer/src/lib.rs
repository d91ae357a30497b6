//! Transfer State Store.
//!
//! The relay writes one [`TransferDecision`] per session during teardown;
//! the call-status webhook consumes it once the media stream has closed and
//! chooses between dialing the transfer number and hanging up. Decisions
//! that are never collected are purged after a retention window.
//!
//! Two backends implement [`TransferStore`]: [`MemoryTransferStore`] for a
//! single process, and [`SqliteTransferStore`], which persists across
//! restarts and can be shared with a separately deployed call-control
//! process through the database file.

mod error;
mod memory;
mod migrations;
mod pool;
mod sqlite;

pub use error::TransferError;
pub use memory::MemoryTransferStore;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, StoreSettings};
pub use sqlite::SqliteTransferStore;

use async_trait::async_trait;
use callrelay_types::TransferDecision;
use std::time::Duration;

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Records the decision for a session. A session is written at most once;
    /// a second write fails with [`TransferError::AlreadyRecorded`].
    async fn record(&self, session_id: &str, decision: TransferDecision) -> Result<(), TransferError>;

    async fn get(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError>;

    /// Reads and removes the decision.
    async fn take(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError>;

    /// Deletes decisions recorded at least `age` ago and returns how many went.
    async fn purge_older_than(&self, age: Duration) -> Result<usize, TransferError>;
}

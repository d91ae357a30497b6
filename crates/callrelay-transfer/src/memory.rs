use crate::{TransferError, TransferStore};
use async_trait::async_trait;
use callrelay_types::TransferDecision;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Process-local store for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryTransferStore {
    entries: RwLock<HashMap<String, (TransferDecision, Instant)>>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> TransferError {
    TransferError::Task("transfer store lock poisoned".to_string())
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn record(&self, session_id: &str, decision: TransferDecision) -> Result<(), TransferError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.contains_key(session_id) {
            return Err(TransferError::AlreadyRecorded(session_id.to_string()));
        }
        entries.insert(session_id.to_string(), (decision, Instant::now()));
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(session_id).map(|(decision, _)| *decision))
    }

    async fn take(&self, session_id: &str) -> Result<Option<TransferDecision>, TransferError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(session_id).map(|(decision, _)| decision))
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, TransferError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, (_, recorded_at)| recorded_at.elapsed() < age);
        Ok(before - entries.len())
    }
}

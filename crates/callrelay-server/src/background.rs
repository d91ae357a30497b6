//! Background task for expiring uncollected transfer decisions.

use callrelay_transfer::TransferStore;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the purge task for the transfer decision store.
///
/// Decisions are normally consumed by the call-status webhook; this removes
/// the ones call-control never came back for. Runs indefinitely.
pub async fn start_purge_task(transfers: Arc<dyn TransferStore>, retention_seconds: u64) {
    if retention_seconds == 0 {
        tracing::warn!("transfer decision purge disabled (retention=0)");
        return;
    }

    // Run every 60 seconds or retention/2, whichever is smaller (but min 1s)
    let interval_seconds = (retention_seconds / 2).clamp(1, 60);
    let interval = Duration::from_secs(interval_seconds);
    let retention = Duration::from_secs(retention_seconds);

    tracing::info!(
        retention_seconds,
        interval_seconds,
        "starting transfer decision purge task"
    );

    loop {
        sleep(interval).await;

        match transfers.purge_older_than(retention).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "purged uncollected transfer decisions");
            }
            Ok(_) => {
                tracing::debug!("no transfer decisions to purge");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to purge transfer decisions");
            }
        }
    }
}

//! Idle Watchdog.

use crate::state::SessionState;
use callrelay_types::DrainReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns the watchdog for one session.
///
/// Every `poll` it compares the session's idle time with `idle_timeout` and
/// starts draining once the threshold is exceeded. A session with a function
/// dispatch in flight is never idle. The task exits as soon as
/// the session drains for any reason; the session also aborts the handle
/// during teardown.
pub fn spawn(state: Arc<SessionState>, idle_timeout: Duration, poll: Duration) -> JoinHandle<()> {
    tokio::spawn(run(state, idle_timeout, poll))
}

async fn run(state: Arc<SessionState>, idle_timeout: Duration, poll: Duration) {
    let mut drain = state.subscribe_drain();
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = drain.changed() => return,
        }
        if state.is_draining() {
            return;
        }
        if state.dispatch_pending() {
            continue;
        }

        let idle = state.idle_for();
        if idle > idle_timeout {
            tracing::info!(
                session_id = %state.session_id(),
                idle_ms = idle.as_millis() as u64,
                threshold_ms = idle_timeout.as_millis() as u64,
                "session idle past threshold"
            );
            state.begin_drain(DrainReason::IdleTimeout);
            return;
        }
    }
}

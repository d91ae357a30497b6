//! Shared mutable state of one call session.
//!
//! Both pumps and the idle watchdog hold the same [`SessionState`]. Each
//! field has one writer: the stream id is set by the inbound pump at
//! stream-start, the failure counter by the dispatcher path, and the drain
//! reason by whichever trigger fires first. The activity timestamp is written
//! by either pump and read by the watchdog, so it sits behind a mutex.
//!
//! While a function call is being dispatched the session counts as active:
//! the outbound pump is parked on the dispatch and cannot see the caller's
//! speech, so the watchdog skips sessions with a [`DispatchGuard`] alive.

use callrelay_types::{CallPhase, DrainReason, TransferDecision};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug)]
pub struct SessionState {
    session_id: String,
    stream_sid: OnceLock<String>,
    last_activity: Mutex<Instant>,
    failures: AtomicU32,
    dispatches: AtomicU32,
    transfer: AtomicBool,
    phase: Mutex<CallPhase>,
    drain: watch::Sender<Option<DrainReason>>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        let (drain, _) = watch::channel(None);
        Arc::new(Self {
            session_id: session_id.into(),
            stream_sid: OnceLock::new(),
            last_activity: Mutex::new(Instant::now()),
            failures: AtomicU32::new(0),
            dispatches: AtomicU32::new(0),
            transfer: AtomicBool::new(false),
            phase: Mutex::new(CallPhase::Connecting),
            drain,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Records the telephony stream id. Only the first call has an effect.
    pub fn set_stream_sid(&self, sid: impl Into<String>) -> bool {
        self.stream_sid.set(sid.into()).is_ok()
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.get().map(String::as_str)
    }

    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Marks a function dispatch as in flight until the guard is dropped.
    pub fn begin_dispatch(&self) -> DispatchGuard<'_> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.touch();
        DispatchGuard { state: self }
    }

    pub fn dispatch_pending(&self) -> bool {
        self.dispatches.load(Ordering::SeqCst) > 0
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(CallPhase::Closed)
    }

    /// Moves the phase forward. Returns `false` if `next` would go backwards.
    pub fn advance(&self, next: CallPhase) -> bool {
        match self.phase.lock() {
            Ok(mut phase) if *phase <= next => {
                *phase = next;
                true
            }
            _ => false,
        }
    }

    /// Starts draining for `reason`.
    ///
    /// Returns `true` only for the first trigger; later triggers are no-ops
    /// and the first reason is kept.
    pub fn begin_drain(&self, reason: DrainReason) -> bool {
        let first = self.drain.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            let from = self.phase();
            self.advance(CallPhase::Draining);
            tracing::info!(session_id = %self.session_id, %reason, ?from, "session draining");
        } else {
            tracing::debug!(session_id = %self.session_id, %reason, "drain already in progress");
        }
        first
    }

    pub fn drain_reason(&self) -> Option<DrainReason> {
        *self.drain.borrow()
    }

    pub fn is_draining(&self) -> bool {
        self.drain_reason().is_some()
    }

    /// Returns a receiver that changes when draining starts.
    pub fn subscribe_drain(&self) -> watch::Receiver<Option<DrainReason>> {
        self.drain.subscribe()
    }

    /// Marks the call for a human handoff and starts draining.
    pub fn request_transfer(&self) -> bool {
        self.transfer.store(true, Ordering::SeqCst);
        self.begin_drain(DrainReason::TransferRequested)
    }

    pub fn decision(&self) -> TransferDecision {
        if self.transfer.load(Ordering::SeqCst) {
            TransferDecision::TransferToHuman
        } else {
            TransferDecision::None
        }
    }

    /// Counts one more unsuccessful retrieval and returns the streak length.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn reset_failures(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Keeps the session active while a function call runs; restarts the idle clock on drop.
#[derive(Debug)]
pub struct DispatchGuard<'a> {
    state: &'a SessionState,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.state.dispatches.fetch_sub(1, Ordering::SeqCst);
        self.state.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_drain_trigger_wins() {
        let state = SessionState::new("s1");
        assert!(state.begin_drain(DrainReason::CallerHangup));
        assert!(!state.begin_drain(DrainReason::IdleTimeout));
        assert_eq!(state.drain_reason(), Some(DrainReason::CallerHangup));
        assert_eq!(state.phase(), CallPhase::Draining);
    }

    #[test]
    fn transfer_after_drain_still_records_decision() {
        let state = SessionState::new("s1");
        state.begin_drain(DrainReason::CallerHangup);
        assert!(!state.request_transfer());
        assert_eq!(state.decision(), TransferDecision::TransferToHuman);
        assert_eq!(state.drain_reason(), Some(DrainReason::CallerHangup));
    }

    #[test]
    fn phase_never_moves_backwards() {
        let state = SessionState::new("s1");
        assert!(state.advance(CallPhase::Active));
        assert!(state.advance(CallPhase::Closed));
        assert!(!state.advance(CallPhase::Draining));
        assert_eq!(state.phase(), CallPhase::Closed);
    }

    #[test]
    fn stream_sid_is_set_once() {
        let state = SessionState::new("s1");
        assert_eq!(state.stream_sid(), None);
        assert!(state.set_stream_sid("MZ1"));
        assert!(!state.set_stream_sid("MZ2"));
        assert_eq!(state.stream_sid(), Some("MZ1"));
    }

    #[test]
    fn failure_streak_resets() {
        let state = SessionState::new("s1");
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        state.reset_failures();
        assert_eq!(state.failures(), 0);
        assert_eq!(state.record_failure(), 1);
    }

    #[tokio::test]
    async fn drain_wakes_subscribers() {
        let state = SessionState::new("s1");
        let mut rx = state.subscribe_drain();
        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
            *rx.borrow()
        });
        tokio::task::yield_now().await;
        state.begin_drain(DrainReason::IdleTimeout);
        assert_eq!(waiter.await.unwrap(), Some(DrainReason::IdleTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_dispatch_restarts_the_idle_clock() {
        let state = SessionState::new("s1");
        let guard = state.begin_dispatch();
        assert!(state.dispatch_pending());

        tokio::time::advance(Duration::from_secs(30)).await;
        drop(guard);
        assert!(!state.dispatch_pending());
        assert!(state.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_follows_the_clock() {
        let state = SessionState::new("s1");
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(state.idle_for() >= Duration::from_secs(5));
        state.touch();
        assert!(state.idle_for() < Duration::from_secs(1));
    }
}

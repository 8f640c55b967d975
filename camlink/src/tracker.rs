//! Lifecycle state holder shared by the sender and viewer controllers

use crate::event::{Event, EventSink};
use camlink_core::{CamLinkError, CamLinkResult, ErrorReport, LifecycleEvent, LifecycleState};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Observable lifecycle state plus the last error for status indicators
#[derive(Debug)]
pub(crate) struct LifecycleTracker {
    role: &'static str,
    state: watch::Sender<LifecycleState>,
    last_error: Mutex<Option<ErrorReport>>,
    events: EventSink,
}

impl LifecycleTracker {
    pub(crate) fn new(role: &'static str, events: EventSink) -> Self {
        let (state, _) = watch::channel(LifecycleState::Initializing);
        Self {
            role,
            state,
            last_error: Mutex::new(None),
            events,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub(crate) fn last_error(&self) -> Option<ErrorReport> {
        self.last_error.lock().clone()
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    /// Apply a typed transition and publish it
    pub(crate) fn apply(&self, event: LifecycleEvent) -> CamLinkResult<LifecycleState> {
        let from = self.state();
        let to = from.next(&event)?;
        self.state.send_replace(to);
        info!("{} {} -> {} ({})", self.role, from, to, event);
        self.events.emit(Event::StateChanged { from, to });
        Ok(to)
    }

    /// Remember `err` as the last error and report it once
    pub(crate) fn record_error(&self, err: &CamLinkError) {
        self.record_report(err.report());
    }

    /// Same as [`Self::record_error`] for an error already summarised
    pub(crate) fn record_report(&self, report: ErrorReport) {
        if report.recoverable {
            warn!("⚠️ {} error: {}", self.role, report.message);
        } else {
            error!("❌ {} error: {}", self.role, report.message);
        }
        *self.last_error.lock() = Some(report.clone());
        self.events.emit(Event::Error { report });
    }

    /// Record `err` and move to the terminal error state
    pub(crate) fn fail(&self, err: &CamLinkError) {
        self.record_error(err);
        if let Err(rejected) = self.apply(LifecycleEvent::Failed) {
            warn!("{} already terminal: {}", self.role, rejected);
        }
    }
}

/// Wait until `predicate` holds for the watched state, returning that state.
///
/// Returns the last observed state if the controller goes away first.
pub(crate) async fn wait_for_state(
    mut state: watch::Receiver<LifecycleState>,
    predicate: impl Fn(LifecycleState) -> bool,
) -> LifecycleState {
    loop {
        let current = *state.borrow_and_update();
        if predicate(current) {
            return current;
        }
        if state.changed().await.is_err() {
            return *state.borrow();
        }
    }
}

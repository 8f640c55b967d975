//! Viewer-side stream consumer
//!
//! Tracks receive-side status (`CONNECTING`, `CONNECTED`, `CLOSED`, `FAILED`)
//! independently of any lifecycle controller and hands the remote stream to
//! a [`RenderSurface`].

use crate::event::{Event, EventSink};
use camlink_core::{
    CallControl, CallEvent, CallLink, CamLinkError, CamLinkResult, ConsumerStatus, ErrorReport,
    PeerIdentity, SessionId, StreamDescriptor, TrackDescriptor,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the remote stream is rendered
pub trait RenderSurface: Send + Sync + fmt::Debug {
    /// Bind the remote stream for playback
    fn attach(&self, stream: &StreamDescriptor);

    /// The remote side swapped a track in place
    fn replace_track(&self, _track: &TrackDescriptor) {}

    /// Drop everything bound for playback
    fn detach(&self);
}

/// Surface that renders nothing; keeps only what is currently bound
#[derive(Debug, Default)]
pub struct NullSurface {
    bound: Mutex<Option<StreamDescriptor>>,
}

impl NullSurface {
    /// Create an empty surface
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream currently bound
    pub fn bound(&self) -> Option<StreamDescriptor> {
        self.bound.lock().clone()
    }
}

impl RenderSurface for NullSurface {
    fn attach(&self, stream: &StreamDescriptor) {
        *self.bound.lock() = Some(stream.clone());
    }

    fn replace_track(&self, track: &TrackDescriptor) {
        if let Some(stream) = self.bound.lock().as_mut() {
            stream.replace_track(track.clone());
        }
    }

    fn detach(&self) {
        self.bound.lock().take();
    }
}

#[derive(Debug, Default)]
struct ConsumerShared {
    stream: Mutex<Option<StreamDescriptor>>,
    last_error: Mutex<Option<ErrorReport>>,
}

/// Receives one remote stream
#[derive(Debug)]
pub struct StreamConsumer {
    session_id: SessionId,
    remote: PeerIdentity,
    control: Arc<dyn CallControl>,
    status: watch::Receiver<ConsumerStatus>,
    shared: Arc<ConsumerShared>,
    task: JoinHandle<()>,
}

impl StreamConsumer {
    /// Start consuming `link`, rendering onto `surface`
    pub fn spawn(link: CallLink, surface: Arc<dyn RenderSurface>) -> Self {
        let (sink, stream) = crate::event::event_channel();
        drop(stream);
        Self::spawn_with_events(link, surface, sink)
    }

    pub(crate) fn spawn_with_events(
        link: CallLink,
        surface: Arc<dyn RenderSurface>,
        events: EventSink,
    ) -> Self {
        let session_id = link.session_id();
        let remote = link.remote().clone();
        let control = link.control();
        let (status_tx, status) = watch::channel(ConsumerStatus::Connecting);
        let shared = Arc::new(ConsumerShared::default());

        let task = tokio::spawn(consume(
            link,
            surface,
            status_tx,
            Arc::clone(&shared),
            events,
        ));

        Self {
            session_id,
            remote,
            control,
            status,
            shared,
            task,
        }
    }

    /// Get session ID
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Peer sending the stream
    pub fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    /// Current connection status
    pub fn status(&self) -> ConsumerStatus {
        *self.status.borrow()
    }

    /// Observe connection status changes
    pub fn subscribe(&self) -> watch::Receiver<ConsumerStatus> {
        self.status.clone()
    }

    /// Remote stream while connected
    pub fn remote_stream(&self) -> Option<StreamDescriptor> {
        self.shared.stream.lock().clone()
    }

    /// Failure that ended the call
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.shared.last_error.lock().clone()
    }

    /// Status indicator for the UI shell
    #[cfg(feature = "diagnostics")]
    pub fn status_indicator(&self) -> camlink_diagnostics::StatusIndicator {
        camlink_diagnostics::StatusIndicator::for_consumer(self.status(), self.last_error())
    }

    /// Wait until the status leaves `CONNECTING`, up to `timeout`.
    ///
    /// Returns the remote stream once connected. A call that closes or fails
    /// before any media arrives is reported as a dial failure.
    pub async fn wait_connected(&self, timeout: Duration) -> CamLinkResult<StreamDescriptor> {
        let mut status = self.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            loop {
                let current = *status.borrow_and_update();
                if current != ConsumerStatus::Connecting {
                    return current;
                }
                if status.changed().await.is_err() {
                    return *status.borrow();
                }
            }
        })
        .await
        .map_err(|_| CamLinkError::Timeout {
            operation: format!("waiting for stream from {}", self.remote),
            duration: timeout,
        })?;

        match settled {
            ConsumerStatus::Connected => {
                self.remote_stream()
                    .ok_or_else(|| CamLinkError::Dial {
                        target: self.remote.clone(),
                        reason: "stream closed before it could be read".to_string(),
                    })
            }
            _ => {
                let reason = self
                    .last_error()
                    .map(|report| report.message)
                    .unwrap_or_else(|| "call closed before media arrived".to_string());
                Err(CamLinkError::Dial {
                    target: self.remote.clone(),
                    reason,
                })
            }
        }
    }

    /// Wait for `CLOSED` or `FAILED`
    pub async fn closed(&self) -> ConsumerStatus {
        let mut status = self.subscribe();
        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() || status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }

    /// Hang up. The status moves to `CLOSED` once the transport confirms.
    pub async fn close(&self) {
        self.control.close().await;
    }

    pub(crate) fn outcome(&self) -> ConsumerOutcome {
        ConsumerOutcome {
            status: self.subscribe(),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Resolves once a consumer stops, with the failure if there was one
#[derive(Debug)]
pub(crate) struct ConsumerOutcome {
    status: watch::Receiver<ConsumerStatus>,
    shared: Arc<ConsumerShared>,
}

impl ConsumerOutcome {
    pub(crate) async fn finished(mut self) -> (ConsumerStatus, Option<ErrorReport>) {
        loop {
            let current = *self.status.borrow_and_update();
            if current.is_terminal() || self.status.changed().await.is_err() {
                break;
            }
        }
        let status = match *self.status.borrow() {
            // The consumer was dropped mid-call
            ConsumerStatus::Connecting | ConsumerStatus::Connected => ConsumerStatus::Closed,
            terminal => terminal,
        };
        (status, self.shared.last_error.lock().clone())
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        if self.status().is_terminal() {
            return;
        }
        // Nobody can render a live call once the consumer is gone
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let control = Arc::clone(&self.control);
            runtime.spawn(async move { control.close().await });
        } else {
            self.task.abort();
        }
    }
}

async fn consume(
    mut link: CallLink,
    surface: Arc<dyn RenderSurface>,
    status: watch::Sender<ConsumerStatus>,
    shared: Arc<ConsumerShared>,
    events: EventSink,
) {
    let session_id = link.session_id();
    let publish = |next: ConsumerStatus| {
        status.send_replace(next);
        events.emit(Event::ConsumerStatusChanged {
            session_id,
            status: next,
        });
    };

    loop {
        match link.next_event().await {
            Some(CallEvent::RemoteStream(stream)) => {
                info!(
                    "📺 Remote stream {} from {} ({} tracks)",
                    stream.stream_id,
                    link.remote(),
                    stream.tracks.len()
                );
                surface.attach(&stream);
                *shared.stream.lock() = Some(stream.clone());
                events.emit(Event::RemoteStreamAttached { session_id, stream });
                publish(ConsumerStatus::Connected);
            }
            Some(CallEvent::TrackReplaced(track)) => {
                debug!("Remote {} track replaced with {}", track.kind, track.label);
                surface.replace_track(&track);
                if let Some(stream) = shared.stream.lock().as_mut() {
                    stream.replace_track(track);
                }
            }
            Some(CallEvent::Closed) => {
                info!("Stream from {} closed", link.remote());
                surface.detach();
                shared.stream.lock().take();
                events.emit(Event::CallEnded {
                    session_id,
                    reason: None,
                });
                publish(ConsumerStatus::Closed);
                return;
            }
            failed => {
                let reason = match failed {
                    Some(CallEvent::Failed { reason }) => reason,
                    _ => "call transport dropped".to_string(),
                };
                warn!("Stream from {} failed: {}", link.remote(), reason);
                surface.detach();
                shared.stream.lock().take();
                let err = CamLinkError::Transport {
                    reason: reason.clone(),
                };
                *shared.last_error.lock() = Some(err.report());
                events.emit(Event::CallEnded {
                    session_id,
                    reason: Some(reason),
                });
                publish(ConsumerStatus::Failed);
                return;
            }
        }
    }
}

//! Event system for sender and viewer notifications

use crate::controls::SwitchOutcome;
use camlink_core::{
    ConsumerStatus, ErrorReport, FacingMode, LifecycleState, PeerIdentity, SessionId,
    StreamDescriptor, TrackKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Events emitted by the lifecycle controllers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Lifecycle state changed
    StateChanged {
        /// Previous state
        from: LifecycleState,
        /// New state
        to: LifecycleState,
    },
    /// Local camera and microphone acquired
    MediaAcquired {
        /// Tracks now held
        stream: StreamDescriptor,
    },
    /// Local media released
    MediaReleased,
    /// Peer identity registered
    IdentityRegistered {
        /// Identity now held
        identity: PeerIdentity,
        /// Recovered from a stale duplicate registration
        degraded: bool,
    },
    /// Peer identity released
    IdentityDeregistered {
        /// Identity that was released
        identity: PeerIdentity,
    },
    /// An inbound call arrived before media was ready and is waiting
    CallQueued {
        /// Session ID
        session_id: SessionId,
        /// Calling peer
        caller: PeerIdentity,
    },
    /// An inbound call was refused
    CallRejected {
        /// Session ID
        session_id: SessionId,
        /// Calling peer
        caller: PeerIdentity,
        /// Why it was refused
        reason: String,
    },
    /// An inbound call was answered
    CallAccepted {
        /// Session ID
        session_id: SessionId,
        /// Calling peer
        remote: PeerIdentity,
    },
    /// An outbound call was placed
    DialStarted {
        /// Session ID
        session_id: SessionId,
        /// Dialed peer
        target: PeerIdentity,
    },
    /// The remote stream is attached
    RemoteStreamAttached {
        /// Session ID
        session_id: SessionId,
        /// Remote stream
        stream: StreamDescriptor,
    },
    /// A call ended
    CallEnded {
        /// Session ID
        session_id: SessionId,
        /// Failure reason; `None` for a normal close
        reason: Option<String>,
    },
    /// Stream consumer status changed
    ConsumerStatusChanged {
        /// Session ID
        session_id: SessionId,
        /// New status
        status: ConsumerStatus,
    },
    /// A track enable flag changed
    TrackEnabledChanged {
        /// Track kind
        kind: TrackKind,
        /// New flag
        enabled: bool,
    },
    /// The camera direction changed
    FacingSwitched {
        /// Facing now requested
        facing: FacingMode,
        /// How the new track reached an active call
        outcome: SwitchOutcome,
    },
    /// An error was recorded
    Error {
        /// Error summary
        report: ErrorReport,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StateChanged { .. } => "state_changed",
            Event::MediaAcquired { .. } => "media_acquired",
            Event::MediaReleased => "media_released",
            Event::IdentityRegistered { .. } => "identity_registered",
            Event::IdentityDeregistered { .. } => "identity_deregistered",
            Event::CallQueued { .. } => "call_queued",
            Event::CallRejected { .. } => "call_rejected",
            Event::CallAccepted { .. } => "call_accepted",
            Event::DialStarted { .. } => "dial_started",
            Event::RemoteStreamAttached { .. } => "remote_stream_attached",
            Event::CallEnded { .. } => "call_ended",
            Event::ConsumerStatusChanged { .. } => "consumer_status_changed",
            Event::TrackEnabledChanged { .. } => "track_enabled_changed",
            Event::FacingSwitched { .. } => "facing_switched",
            Event::Error { .. } => "error",
        }
    }

    /// Check if this is a lifecycle event
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            Event::StateChanged { .. }
                | Event::MediaAcquired { .. }
                | Event::MediaReleased
                | Event::IdentityRegistered { .. }
                | Event::IdentityDeregistered { .. }
        )
    }

    /// Check if this is a call event
    pub fn is_call_event(&self) -> bool {
        matches!(
            self,
            Event::CallQueued { .. }
                | Event::CallRejected { .. }
                | Event::CallAccepted { .. }
                | Event::DialStarted { .. }
                | Event::RemoteStreamAttached { .. }
                | Event::CallEnded { .. }
                | Event::ConsumerStatusChanged { .. }
        )
    }

    /// Check if this is a track control event
    pub fn is_track_event(&self) -> bool {
        matches!(
            self,
            Event::TrackEnabledChanged { .. } | Event::FacingSwitched { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, Event::Error { .. })
    }
}

/// Event stream for receiving controller events
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create new event stream
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get next event
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to get next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drain everything already delivered
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Sending half shared by the controller internals
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// Emit `event`; dropped silently once the stream is gone
    pub(crate) fn emit(&self, event: Event) {
        trace!("event {}", event.event_type());
        let _ = self.sender.send(event);
    }
}

/// Connected sink and stream
pub(crate) fn event_channel() -> (EventSink, EventStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSink { sender }, EventStream::new(receiver))
}

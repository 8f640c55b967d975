//! Per-call session state
//!
//! A [`ConnectionSession`] carries stream descriptors and the call link only.
//! It never owns a [`camlink_media::MediaSourceHandle`], so closing or
//! dropping it cannot keep a hardware lock alive.

use camlink_core::{
    CallControl, CallEvent, CallLink, CallRole, LifecycleState, PeerIdentity, SessionId,
    StreamDescriptor, TrackDescriptor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Teardown stages, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    /// The active call was closed
    SessionClosed,
    /// The hardware lock was released
    MediaReleased,
    /// The peer identity was released
    IdentityDeregistered,
}

/// Snapshot of a call for logging and status surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub session_id: SessionId,
    /// Which side of the call this is
    pub role: CallRole,
    /// Remote peer
    pub remote: PeerIdentity,
    /// Controller state when the snapshot was taken
    pub state: LifecycleState,
    /// Media sent on this call
    pub local_stream: StreamDescriptor,
    /// Media received on this call, once attached
    pub remote_stream: Option<StreamDescriptor>,
    /// Manual redials that led to this call
    pub retry_count: u32,
    /// When the call was set up
    pub started_at: DateTime<Utc>,
}

/// One established call
#[derive(Debug)]
pub struct ConnectionSession {
    link: CallLink,
    local_stream: StreamDescriptor,
    remote_stream: Option<StreamDescriptor>,
    retry_count: u32,
    started_at: DateTime<Utc>,
}

impl ConnectionSession {
    /// Wrap an established call carrying `local_stream`
    pub fn new(link: CallLink, local_stream: StreamDescriptor, retry_count: u32) -> Self {
        Self {
            link,
            local_stream,
            remote_stream: None,
            retry_count,
            started_at: Utc::now(),
        }
    }

    /// Get session ID
    pub fn session_id(&self) -> SessionId {
        self.link.session_id()
    }

    /// Get this side's role
    pub fn role(&self) -> CallRole {
        self.link.role()
    }

    /// Get the remote peer
    pub fn remote(&self) -> &PeerIdentity {
        self.link.remote()
    }

    /// Shared handle to the call controls
    pub fn control(&self) -> Arc<dyn CallControl> {
        self.link.control()
    }

    /// Media sent on this call
    pub fn local_stream(&self) -> &StreamDescriptor {
        &self.local_stream
    }

    /// Media received on this call
    pub fn remote_stream(&self) -> Option<&StreamDescriptor> {
        self.remote_stream.as_ref()
    }

    /// Wait for the next call event, folding stream updates into the session
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        let event = self.link.next_event().await;
        match &event {
            Some(CallEvent::RemoteStream(stream)) => {
                self.remote_stream = Some(stream.clone());
            }
            Some(CallEvent::TrackReplaced(track)) => {
                if let Some(stream) = self.remote_stream.as_mut() {
                    stream.replace_track(track.clone());
                }
            }
            _ => {}
        }
        event
    }

    /// Record that an outgoing track was swapped in place
    pub fn replace_local_track(&mut self, track: TrackDescriptor) {
        self.local_stream.replace_track(track);
    }

    /// Hang up. Idempotent.
    pub async fn close(&self) {
        self.link.close().await;
    }

    /// Snapshot with the controller's current `state`
    pub fn info(&self, state: LifecycleState) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id(),
            role: self.role(),
            remote: self.remote().clone(),
            state,
            local_stream: self.local_stream.clone(),
            remote_stream: self.remote_stream.clone(),
            retry_count: self.retry_count,
            started_at: self.started_at,
        }
    }
}

//! Rendezvous and call transport abstractions
//!
//! A [`Rendezvous`] hands out peer identities; each registration yields a
//! [`PeerEndpoint`] for dialing and a channel of [`IncomingCall`]s. Both ends of
//! an established call see a [`CallLink`]: a stream of [`CallEvent`]s plus a
//! [`CallControl`] for in-place track replacement and hang-up.

use crate::error::{CamLinkError, RegistrationError};
use crate::types::{CallRole, OwnerToken, PeerIdentity, SessionId, StreamDescriptor, TrackDescriptor};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Parameters of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Identifier to claim; the service assigns one when absent
    pub desired_id: Option<PeerIdentity>,
    /// Logical peer making the request
    pub owner: OwnerToken,
    /// Take over a live registration held under the same owner token
    pub resume: bool,
}

impl RegisterRequest {
    /// Fresh registration request
    pub fn new(desired_id: Option<PeerIdentity>, owner: OwnerToken) -> Self {
        Self {
            desired_id,
            owner,
            resume: false,
        }
    }

    /// Same request, asking to take over a stale registration
    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }
}

/// Outcome quality of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Clean registration
    Ready,
    /// Identity recovered from a stale duplicate registration
    DegradedReady {
        /// Why the registration is degraded
        reason: String,
    },
}

impl RegistrationStatus {
    /// Check if the registration is degraded
    pub fn is_degraded(&self) -> bool {
        matches!(self, RegistrationStatus::DegradedReady { .. })
    }
}

/// A live registration returned by [`Rendezvous::register`]
#[derive(Debug)]
pub struct PeerRegistration {
    /// Identity assigned by the service
    pub identity: PeerIdentity,
    /// Whether a stale registration was taken over
    pub resumed: bool,
    /// Calls addressed to this identity
    pub incoming: mpsc::UnboundedReceiver<IncomingCall>,
    /// Handle for dialing and deregistering
    pub endpoint: Arc<dyn PeerEndpoint>,
}

/// Signaling rendezvous service
#[async_trait]
pub trait Rendezvous: Send + Sync + fmt::Debug {
    /// Register an identity
    async fn register(&self, request: RegisterRequest)
        -> Result<PeerRegistration, RegistrationError>;
}

/// Registered endpoint able to place calls
#[async_trait]
pub trait PeerEndpoint: Send + Sync + fmt::Debug {
    /// Identity this endpoint is registered under
    fn identity(&self) -> &PeerIdentity;

    /// Place a call carrying `local`. The outcome arrives as [`CallEvent`]s.
    async fn dial(
        &self,
        target: &PeerIdentity,
        local: StreamDescriptor,
    ) -> Result<CallLink, CamLinkError>;

    /// Release the identity. Later calls to it fail at the rendezvous.
    async fn deregister(&self) -> Result<(), CamLinkError>;
}

/// Events delivered to one side of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The remote side's stream is attached
    RemoteStream(StreamDescriptor),
    /// The remote side swapped one of its tracks in place
    TrackReplaced(TrackDescriptor),
    /// The call was closed by either side
    Closed,
    /// The call failed (rejection, unreachable peer, or transport failure)
    Failed {
        /// Reason for the failure
        reason: String,
    },
}

impl CallEvent {
    /// Check if no further events follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallEvent::Closed | CallEvent::Failed { .. })
    }
}

/// Control surface of an established call
#[async_trait]
pub trait CallControl: Send + Sync + fmt::Debug {
    /// Whether tracks can be swapped without renegotiation
    fn supports_track_replacement(&self) -> bool;

    /// Replace the outgoing track of the same kind
    async fn replace_track(&self, track: TrackDescriptor) -> Result<(), CamLinkError>;

    /// Hang up. Idempotent.
    async fn close(&self);
}

/// One side of a call
#[derive(Debug)]
pub struct CallLink {
    session_id: SessionId,
    role: CallRole,
    remote: PeerIdentity,
    events: mpsc::UnboundedReceiver<CallEvent>,
    control: Arc<dyn CallControl>,
}

impl CallLink {
    /// Assemble a call link
    pub fn new(
        session_id: SessionId,
        role: CallRole,
        remote: PeerIdentity,
        events: mpsc::UnboundedReceiver<CallEvent>,
        control: Arc<dyn CallControl>,
    ) -> Self {
        Self {
            session_id,
            role,
            remote,
            events,
            control,
        }
    }

    /// Get session ID
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Get this side's role
    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Get the remote peer
    pub fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    /// Shared handle to the call controls
    pub fn control(&self) -> Arc<dyn CallControl> {
        Arc::clone(&self.control)
    }

    /// Wait for the next call event; `None` once the transport dropped the call
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    /// Hang up the call
    pub async fn close(&self) {
        self.control.close().await;
    }
}

/// Transport-specific accept/reject for an inbound call
#[async_trait]
pub trait CallAcceptor: Send + fmt::Debug {
    /// Answer with `local` media
    async fn accept(self: Box<Self>, local: StreamDescriptor) -> Result<CallLink, CamLinkError>;

    /// Refuse the call
    async fn reject(self: Box<Self>, reason: String);
}

/// A call waiting to be answered
#[derive(Debug)]
pub struct IncomingCall {
    session_id: SessionId,
    caller: PeerIdentity,
    offer: StreamDescriptor,
    acceptor: Box<dyn CallAcceptor>,
}

impl IncomingCall {
    /// Assemble an inbound call
    pub fn new(
        session_id: SessionId,
        caller: PeerIdentity,
        offer: StreamDescriptor,
        acceptor: Box<dyn CallAcceptor>,
    ) -> Self {
        Self {
            session_id,
            caller,
            offer,
            acceptor,
        }
    }

    /// Get session ID
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Get the calling peer
    pub fn caller(&self) -> &PeerIdentity {
        &self.caller
    }

    /// Stream offered by the caller
    pub fn offer(&self) -> &StreamDescriptor {
        &self.offer
    }

    /// Answer the call with `local` media
    pub async fn accept(self, local: StreamDescriptor) -> Result<CallLink, CamLinkError> {
        self.acceptor.accept(local).await
    }

    /// Refuse the call
    pub async fn reject(self, reason: impl Into<String>) {
        self.acceptor.reject(reason.into()).await;
    }
}

//! Connection lifecycle state machine and consumer status

use crate::error::CamLinkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the connection lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Waiting for media and identity
    Initializing,
    /// Media held and identity registered; ready to take a call
    Ready,
    /// Ready, but the identity was recovered from a stale duplicate registration
    DegradedReady,
    /// A call is attached and media flows
    Streaming,
    /// The call ended; local media and identity are still valid
    Disconnected,
    /// Terminal failure
    Error,
    /// Torn down on request
    Closed,
}

impl LifecycleState {
    /// Check if the controller can take a call
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::DegradedReady)
    }

    /// Check if the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Error | LifecycleState::Closed)
    }

    /// Apply `event`, returning the next state.
    ///
    /// `Failed` and `Shutdown` are accepted from every non-terminal state.
    pub fn next(self, event: &LifecycleEvent) -> Result<LifecycleState, CamLinkError> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let next = match (self, event) {
            (s, _) if s.is_terminal() => None,
            (_, E::Failed) => Some(S::Error),
            (_, E::Shutdown) => Some(S::Closed),
            (S::Initializing, E::BootCompleted { degraded }) => Some(readiness(*degraded)),
            (S::Ready | S::DegradedReady, E::CallAttached) => Some(S::Streaming),
            (S::Streaming, E::CallEnded) => Some(S::Disconnected),
            (S::Disconnected, E::Rearmed { degraded }) => Some(readiness(*degraded)),
            _ => None,
        };

        next.ok_or_else(|| CamLinkError::InvalidTransition {
            from: self.to_string(),
            event: event.to_string(),
        })
    }
}

fn readiness(degraded: bool) -> LifecycleState {
    if degraded {
        LifecycleState::DegradedReady
    } else {
        LifecycleState::Ready
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Ready => "READY",
            LifecycleState::DegradedReady => "DEGRADED_READY",
            LifecycleState::Streaming => "STREAMING",
            LifecycleState::Disconnected => "DISCONNECTED",
            LifecycleState::Error => "ERROR",
            LifecycleState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Typed transition events for [`LifecycleState::next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Media and identity both succeeded
    BootCompleted {
        /// Identity came from a resumed stale registration
        degraded: bool,
    },
    /// A call was accepted or acknowledged and media attached
    CallAttached,
    /// Remote close or hard transport failure
    CallEnded,
    /// Re-armed for a new call with the existing media handle
    Rearmed {
        /// Identity came from a resumed stale registration
        degraded: bool,
    },
    /// Non-recoverable media or registration failure
    Failed,
    /// Explicit teardown
    Shutdown,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::BootCompleted { .. } => write!(f, "boot_completed"),
            LifecycleEvent::CallAttached => write!(f, "call_attached"),
            LifecycleEvent::CallEnded => write!(f, "call_ended"),
            LifecycleEvent::Rearmed { .. } => write!(f, "rearmed"),
            LifecycleEvent::Failed => write!(f, "failed"),
            LifecycleEvent::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Receive-side status tracked by the viewer's stream consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerStatus {
    /// Dial placed, waiting for the remote stream
    Connecting,
    /// Remote stream attached
    Connected,
    /// Call closed normally
    Closed,
    /// Call failed
    Failed,
}

impl ConsumerStatus {
    /// Check if the status admits no further changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerStatus::Closed | ConsumerStatus::Failed)
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerStatus::Connecting => "CONNECTING",
            ConsumerStatus::Connected => "CONNECTED",
            ConsumerStatus::Closed => "CLOSED",
            ConsumerStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

//! Error types for CamLink

use crate::types::PeerIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a rendezvous service while registering an identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The requested identifier is held by another live registration
    #[error("Peer identifier {id} is unavailable")]
    IdUnavailable {
        /// Identifier that was requested
        id: PeerIdentity,
        /// Whether the live holder carries the same owner token as the requester
        same_owner: bool,
    },

    /// The rendezvous service could not be reached
    #[error("Rendezvous service unreachable: {reason}")]
    Unreachable {
        /// Reason for the failure
        reason: String,
    },

    /// The rendezvous service refused the registration
    #[error("Registration rejected: {reason}")]
    Rejected {
        /// Reason given by the service
        reason: String,
    },
}

impl RegistrationError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistrationError::IdUnavailable { .. } => "ID_UNAVAILABLE",
            RegistrationError::Unreachable { .. } => "RENDEZVOUS_UNREACHABLE",
            RegistrationError::Rejected { .. } => "REGISTRATION_REJECTED",
        }
    }
}

/// Main error type for CamLink operations
#[derive(Error, Debug)]
pub enum CamLinkError {
    /// Camera or microphone could not be acquired, even with relaxed constraints
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisition {
        /// Reason for the failure
        reason: String,
    },

    /// Identity registration failed
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Outbound call could not be placed or was refused
    #[error("Dial to {target} failed: {reason}")]
    Dial {
        /// Peer that was dialed
        target: PeerIdentity,
        /// Reason for the failure
        reason: String,
    },

    /// Mid-call network failure
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Pairing input could not be turned into a dial target
    #[error("Invalid pairing input '{input}': {reason}")]
    PairingParse {
        /// Raw input that was rejected
        input: String,
        /// Reason for the rejection
        reason: String,
    },

    /// Lifecycle event not permitted in the current state
    #[error("Invalid transition: {event} is not allowed from {from}")]
    InvalidTransition {
        /// State the machine was in
        from: String,
        /// Event that was rejected
        event: String,
    },

    /// Operation requires a different state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Manual retry budget used up
    #[error("Retry limit exceeded: {attempts} attempts (limit {limit})")]
    RetryLimitExceeded {
        /// Attempts made so far
        attempts: u32,
        /// Maximum attempts allowed
        limit: u32,
    },

    /// Operation needs a registered identity
    #[error("No peer identity is registered")]
    NotRegistered,

    /// Operation was cancelled by teardown
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Internal channel closed unexpectedly
    #[error("Channel closed: {channel}")]
    ChannelClosed {
        /// Channel name
        channel: String,
    },

    /// Rendezvous protocol error
    #[error("Signaling error: {reason}")]
    Signaling {
        /// Reason for the error
        reason: String,
    },

    /// Server start failed
    #[error("Failed to start server on {address}: {source}")]
    ServerStartFailed {
        /// Address that failed to bind
        address: std::net::SocketAddr,
        /// Underlying error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for CamLink operations
pub type CamLinkResult<T> = Result<T, CamLinkError>;

impl CamLinkError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            CamLinkError::MediaAcquisition { .. } => "MEDIA_ACQUISITION_FAILED".to_string(),
            CamLinkError::Registration(inner) => inner.error_code().to_string(),
            CamLinkError::Dial { .. } => "DIAL_FAILED".to_string(),
            CamLinkError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            CamLinkError::PairingParse { .. } => "PAIRING_PARSE_ERROR".to_string(),
            CamLinkError::InvalidTransition { .. } => "INVALID_TRANSITION".to_string(),
            CamLinkError::InvalidState { .. } => "INVALID_STATE".to_string(),
            CamLinkError::RetryLimitExceeded { .. } => "RETRY_LIMIT_EXCEEDED".to_string(),
            CamLinkError::NotRegistered => "NOT_REGISTERED".to_string(),
            CamLinkError::Cancelled => "CANCELLED".to_string(),
            CamLinkError::Timeout { .. } => "TIMEOUT".to_string(),
            CamLinkError::ChannelClosed { .. } => "CHANNEL_CLOSED".to_string(),
            CamLinkError::Signaling { .. } => "SIGNALING_ERROR".to_string(),
            CamLinkError::ServerStartFailed { .. } => "SERVER_START_FAILED".to_string(),
            CamLinkError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            CamLinkError::MediaAcquisition { .. } => ErrorCategory::Media,
            CamLinkError::Registration(_) | CamLinkError::NotRegistered => {
                ErrorCategory::Registration
            }
            CamLinkError::Dial { .. } | CamLinkError::RetryLimitExceeded { .. } => {
                ErrorCategory::Dial
            }
            CamLinkError::Transport { .. } | CamLinkError::Timeout { .. } => {
                ErrorCategory::Transport
            }
            CamLinkError::PairingParse { .. } => ErrorCategory::Pairing,
            CamLinkError::InvalidTransition { .. }
            | CamLinkError::InvalidState { .. }
            | CamLinkError::Cancelled => ErrorCategory::State,
            CamLinkError::Signaling { .. } | CamLinkError::InvalidMessage { .. } => {
                ErrorCategory::Signaling
            }
            CamLinkError::ChannelClosed { .. } | CamLinkError::ServerStartFailed { .. } => {
                ErrorCategory::System
            }
        }
    }

    /// Whether local resources (media, identity) stay valid after this error.
    ///
    /// Recoverable errors leave the controller able to take a new call
    /// without re-initialising; everything else is terminal for the session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CamLinkError::Dial { .. }
            | CamLinkError::Transport { .. }
            | CamLinkError::Timeout { .. }
            | CamLinkError::PairingParse { .. }
            | CamLinkError::InvalidState { .. }
            | CamLinkError::InvalidTransition { .. } => true,
            CamLinkError::Registration(RegistrationError::IdUnavailable {
                same_owner: true, ..
            }) => true,
            _ => false,
        }
    }

    /// Snapshot suitable for status indicators and event payloads
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.error_code(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Device acquisition errors
    Media,
    /// Identity registration errors
    Registration,
    /// Outbound call errors
    Dial,
    /// Mid-call transport errors
    Transport,
    /// Pairing token errors
    Pairing,
    /// State machine misuse
    State,
    /// Rendezvous protocol errors
    Signaling,
    /// System-level errors
    System,
}

/// Cloneable summary of the most recent error, exposed to status indicators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Stable error code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Whether local resources survived the error
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CamLinkError::Dial {
            target: PeerIdentity::new("mob-1"),
            reason: "peer unavailable".to_string(),
        };
        assert_eq!(err.error_code(), "DIAL_FAILED");
        assert_eq!(err.category(), ErrorCategory::Dial);
        assert!(err.is_recoverable());

        let err = CamLinkError::from(RegistrationError::Unreachable {
            reason: "connection refused".to_string(),
        });
        assert_eq!(err.error_code(), "RENDEZVOUS_UNREACHABLE");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_collision_recoverability() {
        let stale = CamLinkError::from(RegistrationError::IdUnavailable {
            id: PeerIdentity::new("mob-1"),
            same_owner: true,
        });
        assert!(stale.is_recoverable());

        let foreign = CamLinkError::from(RegistrationError::IdUnavailable {
            id: PeerIdentity::new("mob-1"),
            same_owner: false,
        });
        assert!(!foreign.is_recoverable());
    }

    #[test]
    fn test_error_report() {
        let err = CamLinkError::MediaAcquisition {
            reason: "permission denied".to_string(),
        };
        let report = err.report();
        assert_eq!(report.code, "MEDIA_ACQUISITION_FAILED");
        assert_eq!(report.message, "Media acquisition failed: permission denied");
        assert!(!report.recoverable);
    }
}

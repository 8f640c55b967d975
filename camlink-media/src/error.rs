//! Media acquisition error types
//!
//! Device failures are classified so the adapter can decide whether a
//! relaxed retry is worthwhile and so callers can explain the failure.

use camlink_core::{CamLinkError, TrackKind};
use thiserror::Error;

/// Main error type for media acquisition operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused access
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Device is locked by another consumer
    #[error("Device busy: {device_id}")]
    DeviceBusy {
        /// Device identifier
        device_id: String,
    },

    /// No device satisfies the requested constraints
    #[error("Constraint unsatisfiable: {constraint}")]
    ConstraintUnsatisfiable {
        /// Constraint that could not be met
        constraint: String,
    },

    /// No device of the requested kind exists
    #[error("No {kind} input device available")]
    NoDevice {
        /// Kind of device that is missing
        kind: TrackKind,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Operation needs an acquired handle
    #[error("No media source handle is held")]
    NotAcquired,

    /// Every constraint attempt failed
    #[error("Media acquisition failed after {attempts} attempt(s): {last}")]
    AcquisitionFailed {
        /// Number of constraint sets tried
        attempts: usize,
        /// Error from the final attempt
        #[source]
        last: Box<MediaError>,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Whether a retry with relaxed constraints may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::DeviceBusy { .. } => true,
            MediaError::ConstraintUnsatisfiable { .. } => true,
            MediaError::NoDevice { .. } => true,
            // Some platforms report a rejected facing constraint as a denial
            MediaError::PermissionDenied { .. } => true,
            MediaError::DeviceEnumerationFailed { .. } => false,
            MediaError::NotAcquired => false,
            MediaError::AcquisitionFailed { .. } => false,
        }
    }

    /// Innermost device error
    pub fn root_cause(&self) -> &MediaError {
        match self {
            MediaError::AcquisitionFailed { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

impl From<MediaError> for CamLinkError {
    fn from(err: MediaError) -> Self {
        CamLinkError::MediaAcquisition {
            reason: err.to_string(),
        }
    }
}

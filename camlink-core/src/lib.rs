//! # CamLink Core
//!
//! Shared vocabulary for the CamLink pairing pipeline: peer identifiers,
//! media stream descriptors, the connection lifecycle state machine, the
//! error taxonomy, and the rendezvous/transport seam that the signaling
//! backends implement.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod lifecycle;
pub mod transport;
pub mod types;

// Re-export main types
pub use error::{CamLinkError, CamLinkResult, ErrorCategory, ErrorReport, RegistrationError};
pub use lifecycle::{ConsumerStatus, LifecycleEvent, LifecycleState};
pub use transport::{
    CallAcceptor, CallControl, CallEvent, CallLink, IncomingCall, PeerEndpoint, PeerRegistration,
    RegisterRequest, RegistrationStatus, Rendezvous,
};
pub use types::{
    CallRole, FacingMode, OwnerToken, PeerIdentity, SessionId, StreamDescriptor, TrackDescriptor,
    TrackKind,
};

//! Rendezvous protocol messages

use camlink_core::{
    OwnerToken, PeerIdentity, RegistrationError, SessionId, StreamDescriptor, TrackDescriptor,
};
use serde::{Deserialize, Serialize};

/// Messages sent by a peer to the rendezvous server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim an identity for this connection
    Register {
        /// Identifier to claim; the server assigns one when absent
        desired_id: Option<PeerIdentity>,
        /// Logical peer making the request
        owner: OwnerToken,
        /// Take over a live registration held under the same owner
        #[serde(default)]
        resume: bool,
    },
    /// Release the identity held by this connection
    Unregister,
    /// Place a call to another registered peer
    Offer {
        /// Session ID chosen by the caller
        session_id: SessionId,
        /// Peer being dialed
        target: PeerIdentity,
        /// Caller's local stream
        stream: StreamDescriptor,
    },
    /// Accept an offered call
    Answer {
        /// Session ID from the offer
        session_id: SessionId,
        /// Answerer's local stream
        stream: StreamDescriptor,
    },
    /// Refuse an offered call
    Reject {
        /// Session ID from the offer
        session_id: SessionId,
        /// Reason for refusing
        reason: String,
    },
    /// End a call
    Hangup {
        /// Session to end
        session_id: SessionId,
    },
    /// Swap one outgoing track in place
    ReplaceTrack {
        /// Session carrying the track
        session_id: SessionId,
        /// Replacement track
        track: TrackDescriptor,
    },
}

/// Messages sent by the rendezvous server to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity claimed
    Registered {
        /// Identity now held by the connection
        id: PeerIdentity,
        /// Whether a stale registration was taken over
        resumed: bool,
    },
    /// Identity could not be claimed
    RegistrationFailed {
        /// Error code for programmatic handling
        code: String,
        /// Human readable reason
        reason: String,
        /// For collisions, whether the holder has the same owner token
        #[serde(default)]
        same_owner: bool,
    },
    /// Another peer is calling
    IncomingOffer {
        /// Session ID chosen by the caller
        session_id: SessionId,
        /// Calling peer
        caller: PeerIdentity,
        /// Caller's stream
        stream: StreamDescriptor,
    },
    /// The dialed peer accepted
    Answered {
        /// Session ID
        session_id: SessionId,
        /// Answerer's stream
        stream: StreamDescriptor,
    },
    /// The dialed peer refused
    Rejected {
        /// Session ID
        session_id: SessionId,
        /// Reason given by the answerer
        reason: String,
    },
    /// The call ended
    HungUp {
        /// Session ID
        session_id: SessionId,
        /// Set when the server ended the call on a peer's behalf
        #[serde(default)]
        reason: Option<String>,
    },
    /// The remote side swapped a track in place
    TrackReplaced {
        /// Session ID
        session_id: SessionId,
        /// Replacement track
        track: TrackDescriptor,
    },
    /// Dial target is not registered
    PeerUnavailable {
        /// Session ID of the failed offer
        session_id: SessionId,
        /// Peer that was dialed
        target: PeerIdentity,
    },
    /// Error response
    Error {
        /// Error message
        error: String,
        /// Error code for programmatic handling
        error_code: String,
    },
}

impl ServerMessage {
    /// Wire form of a registration failure
    pub fn registration_failed(error: &RegistrationError) -> Self {
        let same_owner = matches!(
            error,
            RegistrationError::IdUnavailable {
                same_owner: true,
                ..
            }
        );
        ServerMessage::RegistrationFailed {
            code: error.error_code().to_string(),
            reason: error.to_string(),
            same_owner,
        }
    }

    /// Session this message belongs to, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            ServerMessage::IncomingOffer { session_id, .. }
            | ServerMessage::Answered { session_id, .. }
            | ServerMessage::Rejected { session_id, .. }
            | ServerMessage::HungUp { session_id, .. }
            | ServerMessage::TrackReplaced { session_id, .. }
            | ServerMessage::PeerUnavailable { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

/// Rebuild a [`RegistrationError`] from its wire form
pub fn registration_error_from_wire(
    desired: Option<&PeerIdentity>,
    code: &str,
    reason: String,
    same_owner: bool,
) -> RegistrationError {
    match (code, desired) {
        ("ID_UNAVAILABLE", Some(id)) => RegistrationError::IdUnavailable {
            id: id.clone(),
            same_owner,
        },
        ("RENDEZVOUS_UNREACHABLE", _) => RegistrationError::Unreachable { reason },
        _ => RegistrationError::Rejected { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_core::TrackKind;

    #[test]
    fn test_client_message_tagging() {
        let message = ClientMessage::Register {
            desired_id: Some(PeerIdentity::new("mob-12345")),
            owner: OwnerToken::new("owner-a"),
            resume: false,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        assert!(json.contains("mob-12345"));

        let decoded: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_resume_defaults_to_false() {
        let json = r#"{"type":"register","desired_id":null,"owner":"abc"}"#;
        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::Register { resume, .. } => assert!(!resume),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_offer_carries_stream() {
        let stream = StreamDescriptor::new(vec![TrackDescriptor::new(TrackKind::Audio, "mic")]);
        let session_id = SessionId::new();
        let message = ServerMessage::IncomingOffer {
            session_id,
            caller: PeerIdentity::new("viewer"),
            stream: stream.clone(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"incoming_offer\""));

        let decoded: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.session_id(), Some(session_id));
        match decoded {
            ServerMessage::IncomingOffer { stream: s, .. } => assert_eq!(s, stream),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_registration_failure_wire_form() {
        let id = PeerIdentity::new("mob-48213");
        let error = RegistrationError::IdUnavailable {
            id: id.clone(),
            same_owner: true,
        };
        let message = ServerMessage::registration_failed(&error);
        match message {
            ServerMessage::RegistrationFailed {
                code,
                reason,
                same_owner,
            } => {
                assert_eq!(code, "ID_UNAVAILABLE");
                assert!(same_owner);
                assert_eq!(
                    registration_error_from_wire(Some(&id), &code, reason, same_owner),
                    error
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_maps_to_rejected() {
        let error = registration_error_from_wire(None, "WHATEVER", "nope".to_string(), false);
        assert!(matches!(error, RegistrationError::Rejected { .. }));
    }
}

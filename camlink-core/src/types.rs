//! Identifiers and media descriptors shared across the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Rendezvous-assigned identifier that lets one endpoint be dialed by another
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identifier is blank
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies the logical peer behind a registration across page reloads.
///
/// Two registrations carrying the same owner token are the same device, so a
/// collision between them is a stale duplicate rather than a foreign claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Wrap an existing token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a fresh random token
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::random()
    }
}

/// Identifier of one peer-to-peer call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a call this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// Dials the remote peer (the viewing console)
    Caller,
    /// Accepts inbound calls (the handheld camera)
    Answerer,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Caller => write!(f, "caller"),
            CallRole::Answerer => write!(f, "answerer"),
        }
    }
}

/// Track kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Camera facing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Front camera, facing the holder
    User,
    /// Rear camera, facing the scene
    Environment,
}

impl FacingMode {
    /// The opposite direction
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl Default for FacingMode {
    fn default() -> Self {
        FacingMode::Environment
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// Wire-level description of one media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Track ID, unique per acquisition
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Human readable device label
    pub label: String,
    /// Device the track was captured from
    pub device_id: Option<String>,
    /// Facing direction for camera tracks
    pub facing: Option<FacingMode>,
}

impl TrackDescriptor {
    /// Describe a new track with a random ID
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            device_id: None,
            facing: None,
        }
    }

    /// Attach the capturing device
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Attach a facing direction
    pub fn with_facing(mut self, facing: Option<FacingMode>) -> Self {
        self.facing = facing;
        self
    }
}

/// Wire-level description of a media stream carried by a call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream ID
    pub stream_id: String,
    /// Tracks in the stream
    pub tracks: Vec<TrackDescriptor>,
}

impl StreamDescriptor {
    /// Build a stream from its tracks
    pub fn new(tracks: Vec<TrackDescriptor>) -> Self {
        Self {
            stream_id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// A stream with no tracks
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Check if the stream carries no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks of the given kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &TrackDescriptor> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    /// Check if the stream carries at least one video track
    pub fn has_video(&self) -> bool {
        self.tracks_of(TrackKind::Video).next().is_some()
    }

    /// Check if the stream carries at least one audio track
    pub fn has_audio(&self) -> bool {
        self.tracks_of(TrackKind::Audio).next().is_some()
    }

    /// Swap the first track of the same kind for `track`, appending it if none exists.
    ///
    /// Returns `true` when an existing track was replaced.
    pub fn replace_track(&mut self, track: TrackDescriptor) -> bool {
        match self.tracks.iter_mut().find(|t| t.kind == track.kind) {
            Some(slot) => {
                *slot = track;
                true
            }
            None => {
                self.tracks.push(track);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_toggle() {
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::default(), FacingMode::Environment);
    }

    #[test]
    fn test_stream_replace_track() {
        let video = TrackDescriptor::new(TrackKind::Video, "rear").with_facing(Some(FacingMode::Environment));
        let audio = TrackDescriptor::new(TrackKind::Audio, "mic");
        let mut stream = StreamDescriptor::new(vec![video, audio.clone()]);
        assert!(stream.has_video());
        assert!(stream.has_audio());

        let front = TrackDescriptor::new(TrackKind::Video, "front").with_facing(Some(FacingMode::User));
        assert!(stream.replace_track(front.clone()));
        assert_eq!(stream.tracks.len(), 2);
        assert_eq!(stream.tracks_of(TrackKind::Video).next(), Some(&front));
        assert_eq!(stream.tracks_of(TrackKind::Audio).next(), Some(&audio));

        let mut empty = StreamDescriptor::empty();
        assert!(!empty.replace_track(front));
        assert!(empty.has_video());
    }

    #[test]
    fn test_peer_identity_serialization() {
        let id = PeerIdentity::new("mob-48213");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"mob-48213\"");
        let back: PeerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(PeerIdentity::new("  ").is_empty());
    }
}

//! User-controlled track flags

use crate::source::MediaSourceHandle;
use camlink_core::{FacingMode, TrackKind};
use serde::{Deserialize, Serialize};

/// Per-track enable flags and the active facing preference.
///
/// Changed only by explicit user action. A replacement handle starts with all
/// tracks enabled, so these flags are re-applied after every camera switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackControlState {
    /// Microphone content enabled
    pub audio_enabled: bool,
    /// Camera content enabled
    pub video_enabled: bool,
    /// Preferred camera direction
    pub facing: FacingMode,
}

impl TrackControlState {
    /// Everything enabled, facing `facing`
    pub fn new(facing: FacingMode) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            facing,
        }
    }

    /// Flag for the given kind
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_enabled,
            TrackKind::Video => self.video_enabled,
        }
    }

    /// Update the flag for the given kind
    pub fn set_enabled(&mut self, kind: TrackKind, enabled: bool) {
        match kind {
            TrackKind::Audio => self.audio_enabled = enabled,
            TrackKind::Video => self.video_enabled = enabled,
        }
    }

    /// Push the flags onto every track of `handle`
    pub fn apply_to(&self, handle: &MediaSourceHandle) {
        handle.set_kind_enabled(TrackKind::Audio, self.audio_enabled);
        handle.set_kind_enabled(TrackKind::Video, self.video_enabled);
    }
}

impl Default for TrackControlState {
    fn default() -> Self {
        Self::new(FacingMode::default())
    }
}

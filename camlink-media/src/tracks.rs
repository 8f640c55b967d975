//! Live local tracks and their hardware leases

use camlink_core::{TrackDescriptor, TrackKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Track state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Track is capturing
    Live,
    /// Track was stopped and its hardware released
    Ended,
}

type Release = Box<dyn FnOnce() + Send>;

/// A live camera or microphone track.
///
/// Holds the hardware lock for its device until [`LocalTrack::stop`] runs
/// (or the track is dropped).
pub struct LocalTrack {
    descriptor: TrackDescriptor,
    enabled: AtomicBool,
    state: Mutex<TrackState>,
    release: Mutex<Option<Release>>,
}

impl LocalTrack {
    /// Create a live track whose hardware is freed by `release`
    pub fn new(descriptor: TrackDescriptor, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            descriptor,
            enabled: AtomicBool::new(true),
            state: Mutex::new(TrackState::Live),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// Create a live track with no hardware behind it
    pub fn detached(descriptor: TrackDescriptor) -> Self {
        Self {
            descriptor,
            enabled: AtomicBool::new(true),
            state: Mutex::new(TrackState::Live),
            release: Mutex::new(None),
        }
    }

    /// Wire-level description
    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Get track kind
    pub fn kind(&self) -> TrackKind {
        self.descriptor.kind
    }

    /// Whether media content is carried (false means black frames / silence)
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Toggle content without touching the track itself
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::SeqCst) != enabled {
            debug!("🎚️ Track {} ({}) enabled={}", self.descriptor.id, self.descriptor.kind, enabled);
        }
    }

    /// Get track state
    pub fn state(&self) -> TrackState {
        *self.state.lock()
    }

    /// Check if the track still holds its device
    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// Stop capturing and release the hardware. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == TrackState::Ended {
                return;
            }
            *state = TrackState::Ended;
        }
        if let Some(release) = self.release.lock().take() {
            release();
        }
        debug!("⏹️ Track {} stopped", self.descriptor.id);
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("descriptor", &self.descriptor)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

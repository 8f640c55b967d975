//! Media source adapter
//!
//! Owns at most one [`MediaSourceHandle`] at a time. Acquisitions are
//! serialized: a second request waits for the first to resolve, then
//! releases whatever the first produced before touching the hardware again.

use crate::constraints::{ConstraintLadder, DEFAULT_IDEAL_HEIGHT, DEFAULT_IDEAL_WIDTH};
use crate::control::TrackControlState;
use crate::devices::MediaDevices;
use crate::error::{MediaError, MediaResult};
use crate::tracks::LocalTrack;
use camlink_core::{FacingMode, StreamDescriptor, TrackKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Live audio/video tracks from one acquisition
#[derive(Debug)]
pub struct MediaSourceHandle {
    id: String,
    facing: Option<FacingMode>,
    tracks: Vec<LocalTrack>,
}

impl MediaSourceHandle {
    /// Wrap freshly acquired tracks
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        let facing = tracks
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .and_then(|t| t.descriptor().facing);
        Self {
            id: Uuid::new_v4().to_string(),
            facing,
            tracks,
        }
    }

    /// Get handle ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Facing direction of the camera track, when known
    pub fn facing(&self) -> Option<FacingMode> {
        self.facing
    }

    /// All tracks
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Describe the stream for signaling
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            stream_id: self.id.clone(),
            tracks: self.tracks.iter().map(|t| t.descriptor().clone()).collect(),
        }
    }

    /// Toggle content for every track of `kind`
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Check if every track still holds its device
    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.is_live())
    }

    /// Stop every track and free the hardware
    pub fn release(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Acquires and owns the local camera/microphone
#[derive(Debug)]
pub struct MediaSourceAdapter {
    devices: Arc<dyn MediaDevices>,
    ideal: (u32, u32),
    current: Mutex<Option<Arc<MediaSourceHandle>>>,
    last_error: parking_lot::Mutex<Option<MediaError>>,
}

impl MediaSourceAdapter {
    /// Adapter over `devices` with the default ideal resolution
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self::with_resolution(devices, (DEFAULT_IDEAL_WIDTH, DEFAULT_IDEAL_HEIGHT))
    }

    /// Adapter with a custom ideal resolution
    pub fn with_resolution(devices: Arc<dyn MediaDevices>, ideal: (u32, u32)) -> Self {
        Self {
            devices,
            ideal,
            current: Mutex::new(None),
            last_error: parking_lot::Mutex::new(None),
        }
    }

    /// Acquire a camera facing `preferred`, falling back to any camera
    pub async fn acquire(&self, preferred: FacingMode) -> MediaResult<Arc<MediaSourceHandle>> {
        self.acquire_with(&ConstraintLadder::camera(preferred, self.ideal))
            .await
    }

    /// Acquire using an explicit constraint ladder
    pub async fn acquire_with(
        &self,
        ladder: &ConstraintLadder,
    ) -> MediaResult<Arc<MediaSourceHandle>> {
        let mut current = self.current.lock().await;
        release_slot(&mut current);

        match self.run_ladder(ladder).await {
            Ok(handle) => {
                *current = Some(Arc::clone(&handle));
                *self.last_error.lock() = None;
                Ok(handle)
            }
            Err(err) => {
                *self.last_error.lock() = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Replace the current handle with a camera facing `facing`.
    ///
    /// The old handle is released before the new acquisition starts and
    /// `controls` is re-applied to the new tracks. If the new direction cannot
    /// be acquired, the previous direction is re-acquired so an ongoing call
    /// keeps media, and the error is still returned.
    pub async fn switch_facing(
        &self,
        facing: FacingMode,
        controls: &TrackControlState,
    ) -> MediaResult<Arc<MediaSourceHandle>> {
        let mut current = self.current.lock().await;
        let previous = current.as_ref().and_then(|h| h.facing());
        release_slot(&mut current);

        match self
            .run_ladder(&ConstraintLadder::camera(facing, self.ideal))
            .await
        {
            Ok(handle) => {
                controls.apply_to(&handle);
                *current = Some(Arc::clone(&handle));
                *self.last_error.lock() = None;
                Ok(handle)
            }
            Err(err) => {
                let fallback = previous.unwrap_or_else(|| facing.toggled());
                warn!("Switch to {} failed, restoring {}: {}", facing, fallback, err);
                if let Ok(handle) = self
                    .run_ladder(&ConstraintLadder::camera(fallback, self.ideal))
                    .await
                {
                    controls.apply_to(&handle);
                    *current = Some(handle);
                }
                *self.last_error.lock() = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Release the current handle. Returns whether one was held.
    pub async fn release(&self) -> bool {
        let mut current = self.current.lock().await;
        release_slot(&mut current)
    }

    /// The handle currently held
    pub async fn current(&self) -> Option<Arc<MediaSourceHandle>> {
        self.current.lock().await.clone()
    }

    /// Check if a live handle is held
    pub async fn is_holding(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .map_or(false, |h| h.is_live())
    }

    /// Error from the most recent failed acquisition
    pub fn last_error(&self) -> Option<MediaError> {
        self.last_error.lock().clone()
    }

    async fn run_ladder(&self, ladder: &ConstraintLadder) -> MediaResult<Arc<MediaSourceHandle>> {
        let mut last = MediaError::ConstraintUnsatisfiable {
            constraint: "empty constraint ladder".to_string(),
        };
        let mut tried = 0;

        for constraints in ladder.attempts() {
            tried += 1;
            match self.devices.get_user_media(constraints).await {
                Ok(tracks) if !tracks.is_empty() => {
                    let handle = MediaSourceHandle::new(tracks);
                    info!(
                        "🎥 Acquired media source {} with {} (attempt {})",
                        handle.id(),
                        constraints,
                        tried
                    );
                    return Ok(Arc::new(handle));
                }
                Ok(_) => {
                    last = MediaError::ConstraintUnsatisfiable {
                        constraint: constraints.to_string(),
                    };
                }
                Err(err) => {
                    warn!("Acquisition attempt {} with {} failed: {}", tried, constraints, err);
                    let retry = err.is_recoverable();
                    last = err;
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(MediaError::AcquisitionFailed {
            attempts: tried,
            last: Box::new(last),
        })
    }
}

fn release_slot(slot: &mut Option<Arc<MediaSourceHandle>>) -> bool {
    match slot.take() {
        Some(handle) => {
            handle.release();
            info!("🔓 Released media source {}", handle.id());
            true
        }
        None => false,
    }
}

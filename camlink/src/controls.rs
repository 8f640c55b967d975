//! Track control surface
//!
//! Enable flags act on the tracks of the media source handle currently held,
//! never on the call, so toggling them cannot change lifecycle state. A
//! facing switch replaces the handle and pushes the new tracks into an active
//! call in place when the transport allows it.

use crate::event::Event;
use crate::sender::{Command, SenderShared};
use camlink_core::{CamLinkError, CamLinkResult, FacingMode, TrackKind};
use camlink_media::{MediaError, MediaSourceHandle, TrackControlState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How a facing switch reached an active call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// New tracks are live (in the call, if one is active)
    Applied,
    /// The transport cannot replace tracks in place; the viewer must dial again
    RedialRequired,
}

/// User-facing audio/video/facing controls of a sender
#[derive(Debug, Clone)]
pub struct TrackControls {
    shared: Arc<SenderShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TrackControls {
    pub(crate) fn new(shared: Arc<SenderShared>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { shared, commands }
    }

    /// Current flags and facing preference
    pub fn state(&self) -> TrackControlState {
        *self.shared.controls.lock()
    }

    /// Mute or unmute the microphone
    pub async fn set_audio_enabled(&self, enabled: bool) {
        self.set_enabled(TrackKind::Audio, enabled).await;
    }

    /// Blank or show the camera
    pub async fn set_video_enabled(&self, enabled: bool) {
        self.set_enabled(TrackKind::Video, enabled).await;
    }

    async fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        self.shared.controls.lock().set_enabled(kind, enabled);
        if let Some(handle) = self.shared.adapter.current().await {
            handle.set_kind_enabled(kind, enabled);
        }
        info!("🎚️ {} {}", kind, if enabled { "enabled" } else { "disabled" });
        self.shared
            .tracker
            .events()
            .emit(Event::TrackEnabledChanged { kind, enabled });
    }

    /// Flip between the front and rear camera.
    ///
    /// The old camera is released before the new one is opened and the
    /// enable flags carry over. If the new direction cannot be opened, the
    /// previous one is restored, pushed into an active call, and the error is
    /// returned. Losing both directions is a terminal media failure.
    pub async fn switch_facing(&self) -> CamLinkResult<SwitchOutcome> {
        let state = self.shared.tracker.state();
        if state.is_terminal() {
            return Err(CamLinkError::InvalidState {
                expected: "an active sender".to_string(),
                actual: state.to_string(),
            });
        }

        let _switching = self.shared.switching.lock().await;
        let controls = self.state();
        let target = controls.facing.toggled();

        let handle = match self.shared.adapter.switch_facing(target, &controls).await {
            Ok(handle) => handle,
            Err(media_err) => {
                let err = CamLinkError::from(media_err.clone());
                self.shared.tracker.record_error(&err);
                self.recover(&media_err).await;
                return Err(err);
            }
        };

        // Flags toggled while the camera was reopening win
        let controls = {
            let mut current = self.shared.controls.lock();
            current.facing = target;
            *current
        };
        controls.apply_to(&handle);

        let outcome = self.reattach(&handle).await?;
        info!("🔄 Switched to {} camera ({:?})", target, outcome);
        self.shared.tracker.events().emit(Event::FacingSwitched {
            facing: target,
            outcome,
        });
        Ok(outcome)
    }

    /// Camera direction currently requested
    pub fn facing(&self) -> FacingMode {
        self.state().facing
    }

    /// Keep an active call off released tracks after a failed switch
    async fn recover(&self, err: &MediaError) {
        match self.shared.adapter.current().await {
            Some(restored) => {
                self.state().apply_to(&restored);
                if let Err(reattach) = self.reattach(&restored).await {
                    warn!("Restored camera could not rejoin the call: {}", reattach);
                    let _ = self.commands.send(Command::MediaLost(reattach));
                }
            }
            None => {
                warn!("No camera could be restored after a failed switch");
                let _ = self.commands.send(Command::MediaLost(CamLinkError::from(err.clone())));
            }
        }
    }

    async fn reattach(&self, handle: &MediaSourceHandle) -> CamLinkResult<SwitchOutcome> {
        let control = self.shared.active.lock().clone();
        let Some(control) = control else {
            return Ok(SwitchOutcome::Applied);
        };

        if !control.supports_track_replacement() {
            warn!("Transport cannot replace tracks in place; the viewer has to dial again");
            return Ok(SwitchOutcome::RedialRequired);
        }

        for track in handle.tracks() {
            let descriptor = track.descriptor().clone();
            if let Err(err) = control.replace_track(descriptor.clone()).await {
                self.shared.tracker.record_error(&err);
                return Err(err);
            }
            let _ = self.commands.send(Command::LocalTrackReplaced(descriptor));
        }
        Ok(SwitchOutcome::Applied)
    }
}

//! # CamLink Media
//!
//! Local camera and microphone acquisition for the pairing pipeline.
//! This crate owns the hardware side: the host device capability seam,
//! ordered constraint fallback, the exclusive media source handle, and the
//! per-track enable flags that must survive a camera switch.

#![warn(clippy::all)]

pub mod constraints;
pub mod control;
pub mod devices;
pub mod error;
pub mod simulated;
pub mod source;
pub mod tracks;

// Re-export main types
pub use constraints::{ConstraintLadder, MediaConstraints, VideoConstraints};
pub use control::TrackControlState;
pub use devices::{DeviceInfo, MediaDevices};
pub use error::{MediaError, MediaResult};
pub use simulated::{DeviceLogEntry, SimulatedDevices};
pub use source::{MediaSourceAdapter, MediaSourceHandle};
pub use tracks::{LocalTrack, TrackState};

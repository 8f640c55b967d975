//! Host platform device capability

use crate::constraints::MediaConstraints;
use crate::error::MediaError;
use crate::tracks::LocalTrack;
use async_trait::async_trait;
use camlink_core::FacingMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A video input reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device identifier
    pub device_id: String,
    /// Human readable label
    pub label: String,
    /// Facing direction, when the host reports one
    pub facing: Option<FacingMode>,
}

/// "Enumerate devices" and "acquire stream with constraints" as provided by
/// the host. Implementations do not retry; fallback is the adapter's job.
#[async_trait]
pub trait MediaDevices: Send + Sync + fmt::Debug {
    /// List video input devices
    async fn enumerate_video_inputs(&self) -> Result<Vec<DeviceInfo>, MediaError>;

    /// Acquire live tracks satisfying `constraints`
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaError>;
}

//! Simulated host devices
//!
//! Backs the same-origin simulator link offered in restricted network
//! environments, and records every hardware lock so lock discipline can be
//! checked.

use crate::constraints::{MediaConstraints, VideoConstraints};
use crate::devices::{DeviceInfo, MediaDevices};
use crate::error::MediaError;
use crate::tracks::LocalTrack;
use async_trait::async_trait;
use camlink_core::{FacingMode, TrackDescriptor, TrackKind};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Hardware lock activity recorded by [`SimulatedDevices`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLogEntry {
    /// A device lock was taken
    Acquired {
        /// Device identifier
        device_id: String,
    },
    /// A device lock was released
    Released {
        /// Device identifier
        device_id: String,
    },
}

/// In-process camera/microphone host
#[derive(Debug, Clone)]
pub struct SimulatedDevices {
    inner: Arc<SimulatedInner>,
}

#[derive(Debug)]
struct SimulatedInner {
    cameras: Vec<DeviceInfo>,
    microphone: Option<String>,
    permission_denied: AtomicBool,
    scripted_failures: Mutex<VecDeque<MediaError>>,
    latency: Mutex<Option<Duration>>,
    held: Mutex<HashSet<String>>,
    log: Mutex<Vec<DeviceLogEntry>>,
    peak_camera_locks: AtomicUsize,
    attempts: AtomicUsize,
    grants: AtomicUsize,
}

impl SimulatedInner {
    fn is_camera(&self, device_id: &str) -> bool {
        self.cameras.iter().any(|c| c.device_id == device_id)
    }

    fn release(&self, device_id: &str) {
        if self.held.lock().remove(device_id) {
            self.log.lock().push(DeviceLogEntry::Released {
                device_id: device_id.to_string(),
            });
            debug!("🔓 Released {}", device_id);
        }
    }

    fn pick_camera(&self, video: &VideoConstraints) -> Result<&DeviceInfo, MediaError> {
        if self.cameras.is_empty() {
            return Err(MediaError::NoDevice {
                kind: TrackKind::Video,
            });
        }

        let candidates: Vec<&DeviceInfo> = self
            .cameras
            .iter()
            .filter(|c| video.device_id.as_ref().map_or(true, |id| *id == c.device_id))
            .filter(|c| video.facing.map_or(true, |f| c.facing == Some(f)))
            .collect();

        if candidates.is_empty() {
            let constraint = match (&video.device_id, video.facing) {
                (Some(id), _) => format!("deviceId={}", id),
                (None, Some(facing)) => format!("facingMode={}", facing),
                (None, None) => "video".to_string(),
            };
            return Err(MediaError::ConstraintUnsatisfiable { constraint });
        }

        // Prefer a camera nobody holds; report busy only if all are taken
        let held = self.held.lock();
        Ok(candidates
            .iter()
            .copied()
            .find(|c| !held.contains(&c.device_id))
            .unwrap_or(candidates[0]))
    }
}

impl SimulatedDevices {
    /// Host with the given cameras and optional microphone
    pub fn new(cameras: Vec<DeviceInfo>, microphone: Option<String>) -> Self {
        Self {
            inner: Arc::new(SimulatedInner {
                cameras,
                microphone,
                permission_denied: AtomicBool::new(false),
                scripted_failures: Mutex::new(VecDeque::new()),
                latency: Mutex::new(None),
                held: Mutex::new(HashSet::new()),
                log: Mutex::new(Vec::new()),
                peak_camera_locks: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                grants: AtomicUsize::new(0),
            }),
        }
    }

    /// Handset with front and rear cameras and a microphone
    pub fn phone() -> Self {
        Self::new(
            vec![
                DeviceInfo {
                    device_id: "cam-front".to_string(),
                    label: "Front Camera".to_string(),
                    facing: Some(FacingMode::User),
                },
                DeviceInfo {
                    device_id: "cam-back".to_string(),
                    label: "Back Camera".to_string(),
                    facing: Some(FacingMode::Environment),
                },
            ],
            Some("mic-0".to_string()),
        )
    }

    /// Desktop with one camera of unknown facing and a microphone
    pub fn laptop() -> Self {
        Self::new(
            vec![DeviceInfo {
                device_id: "cam-0".to_string(),
                label: "Integrated Webcam".to_string(),
                facing: None,
            }],
            Some("mic-0".to_string()),
        )
    }

    /// Console with no capture hardware at all
    pub fn headless() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Fail the next acquisition with `error`
    pub fn fail_next(&self, error: MediaError) {
        self.inner.scripted_failures.lock().push_back(error);
    }

    /// Deny (or grant) permission for every subsequent acquisition
    pub fn deny_permission(&self, denied: bool) {
        self.inner.permission_denied.store(denied, Ordering::SeqCst);
    }

    /// Delay every acquisition by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Ordered lock activity
    pub fn log(&self) -> Vec<DeviceLogEntry> {
        self.inner.log.lock().clone()
    }

    /// Number of device locks currently held
    pub fn active_locks(&self) -> usize {
        self.inner.held.lock().len()
    }

    /// Check whether `device_id` is locked
    pub fn is_held(&self, device_id: &str) -> bool {
        self.inner.held.lock().contains(device_id)
    }

    /// Highest number of cameras ever locked at the same time
    pub fn peak_camera_locks(&self) -> usize {
        self.inner.peak_camera_locks.load(Ordering::SeqCst)
    }

    /// Number of acquisition calls, successful or not
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Number of successful acquisitions (permission prompts shown)
    pub fn grants(&self) -> usize {
        self.inner.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn enumerate_video_inputs(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(self.inner.cameras.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.inner.scripted_failures.lock().pop_front() {
            debug!("Simulated failure for {}: {}", constraints, error);
            return Err(error);
        }

        if self.inner.permission_denied.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied {
                operation: constraints.to_string(),
            });
        }

        let mut picked: Vec<TrackDescriptor> = Vec::new();
        if let Some(video) = &constraints.video {
            let camera = self.inner.pick_camera(video)?;
            picked.push(
                TrackDescriptor::new(TrackKind::Video, camera.label.clone())
                    .with_device(camera.device_id.clone())
                    .with_facing(camera.facing),
            );
        }
        if constraints.audio {
            let mic = self.inner.microphone.as_ref().ok_or(MediaError::NoDevice {
                kind: TrackKind::Audio,
            })?;
            picked.push(TrackDescriptor::new(TrackKind::Audio, "Microphone").with_device(mic.clone()));
        }

        {
            let mut held = self.inner.held.lock();
            for descriptor in &picked {
                if let Some(device_id) = &descriptor.device_id {
                    if held.contains(device_id) {
                        return Err(MediaError::DeviceBusy {
                            device_id: device_id.clone(),
                        });
                    }
                }
            }

            let mut log = self.inner.log.lock();
            for device_id in picked.iter().filter_map(|d| d.device_id.clone()) {
                held.insert(device_id.clone());
                log.push(DeviceLogEntry::Acquired { device_id });
            }

            let cameras_held = held.iter().filter(|id| self.inner.is_camera(id)).count();
            self.inner
                .peak_camera_locks
                .fetch_max(cameras_held, Ordering::SeqCst);
        }

        self.inner.grants.fetch_add(1, Ordering::SeqCst);
        info!("📷 Simulated acquisition granted: {}", constraints);

        Ok(picked
            .into_iter()
            .map(|descriptor| {
                let inner = Arc::clone(&self.inner);
                let device_id = descriptor.device_id.clone().unwrap_or_default();
                LocalTrack::new(descriptor, move || inner.release(&device_id))
            })
            .collect())
    }
}

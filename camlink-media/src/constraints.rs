//! Media constraints and the ordered fallback ladder

use camlink_core::FacingMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default ideal capture width
pub const DEFAULT_IDEAL_WIDTH: u32 = 1280;
/// Default ideal capture height
pub const DEFAULT_IDEAL_HEIGHT: u32 = 720;

/// Video part of a constraint set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Required facing direction
    pub facing: Option<FacingMode>,
    /// Required device
    pub device_id: Option<String>,
    /// Preferred width; never a hard requirement
    pub ideal_width: Option<u32>,
    /// Preferred height; never a hard requirement
    pub ideal_height: Option<u32>,
}

impl VideoConstraints {
    /// Any camera at any resolution
    pub fn any() -> Self {
        Self::default()
    }

    /// A camera facing `facing` at the given ideal resolution
    pub fn facing(facing: FacingMode, ideal: (u32, u32)) -> Self {
        Self {
            facing: Some(facing),
            device_id: None,
            ideal_width: Some(ideal.0),
            ideal_height: Some(ideal.1),
        }
    }
}

/// One `getUserMedia`-style constraint set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Video requirement; `None` requests no video
    pub video: Option<VideoConstraints>,
    /// Whether a microphone is requested
    pub audio: bool,
}

impl MediaConstraints {
    /// Preferred camera plus microphone
    pub fn preferred(facing: FacingMode, ideal: (u32, u32)) -> Self {
        Self {
            video: Some(VideoConstraints::facing(facing, ideal)),
            audio: true,
        }
    }

    /// Any camera, any microphone
    pub fn permissive() -> Self {
        Self {
            video: Some(VideoConstraints::any()),
            audio: true,
        }
    }

    /// Microphone only
    pub fn audio_only() -> Self {
        Self {
            video: None,
            audio: true,
        }
    }
}

impl fmt::Display for MediaConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.video {
            Some(v) => {
                write!(f, "video(")?;
                match v.facing {
                    Some(facing) => write!(f, "facing={}", facing)?,
                    None => write!(f, "any")?,
                }
                if let (Some(w), Some(h)) = (v.ideal_width, v.ideal_height) {
                    write!(f, ", ideal={}x{}", w, h)?;
                }
                write!(f, ")")?;
            }
            None => write!(f, "no-video")?,
        }
        if self.audio {
            write!(f, " + audio")?;
        }
        Ok(())
    }
}

/// Ordered list of constraint sets tried one after another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintLadder {
    attempts: Vec<MediaConstraints>,
}

impl ConstraintLadder {
    /// Build from explicit attempts
    pub fn new(attempts: Vec<MediaConstraints>) -> Self {
        Self { attempts }
    }

    /// Preferred camera first, then anything that works
    pub fn camera(facing: FacingMode, ideal: (u32, u32)) -> Self {
        Self::new(vec![
            MediaConstraints::preferred(facing, ideal),
            MediaConstraints::permissive(),
        ])
    }

    /// The throwaway audio-only capability a caller offers
    pub fn audio_only() -> Self {
        Self::new(vec![MediaConstraints::audio_only()])
    }

    /// Attempts in order
    pub fn attempts(&self) -> &[MediaConstraints] {
        &self.attempts
    }

    /// Number of attempts
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Check if there is nothing to try
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

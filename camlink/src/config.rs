//! Configuration types and defaults

use camlink_core::{FacingMode, OwnerToken, PeerIdentity};
use camlink_media::constraints::{DEFAULT_IDEAL_HEIGHT, DEFAULT_IDEAL_WIDTH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`GlobalConfig::base_url`]
pub const ENV_BASE_URL: &str = "CAMLINK_BASE_URL";
/// Environment variable overriding [`GlobalConfig::signaling_url`]
pub const ENV_SIGNALING_URL: &str = "CAMLINK_SIGNALING_URL";
/// Environment variable overriding [`GlobalConfig::restricted_network`]
pub const ENV_RESTRICTED_NETWORK: &str = "CAMLINK_RESTRICTED_NETWORK";
/// Environment variable overriding [`GlobalConfig::debug_logging`]
pub const ENV_DEBUG: &str = "CAMLINK_DEBUG";

/// Global CamLink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Page the pairing token points at
    pub base_url: String,
    /// WebSocket rendezvous server URL
    pub signaling_url: Option<String>,
    /// Host detection reported a network where QR pairing is unusable
    pub restricted_network: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            debug_logging: false,
            base_url: "http://localhost:5173/".to_string(),
            signaling_url: None,
            restricted_network: false,
        }
    }
}

impl GlobalConfig {
    /// Defaults overridden by `CAMLINK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            config.base_url = base_url;
        }
        if let Some(url) = lookup(ENV_SIGNALING_URL).filter(|v| !v.is_empty()) {
            config.signaling_url = Some(url);
        }
        if let Some(flag) = lookup(ENV_RESTRICTED_NETWORK) {
            config.restricted_network = parse_flag(&flag);
        }
        if let Some(flag) = lookup(ENV_DEBUG) {
            config.debug_logging = parse_flag(&flag);
        }
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Sender (answerer) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Camera direction tried first
    pub preferred_facing: FacingMode,
    /// Ideal capture resolution (width, height)
    pub ideal_resolution: (u32, u32),
    /// Identifier to claim; a `mob-NNNNN` id is generated when absent
    pub desired_id: Option<PeerIdentity>,
    /// Logical peer token, stable across reconnects of the same sender
    pub owner: OwnerToken,
    /// How long a call that arrives before media is ready may wait
    pub pending_call_timeout: Duration,
    /// Return to ready automatically when a call ends
    pub auto_rearm: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            preferred_facing: FacingMode::Environment,
            ideal_resolution: (DEFAULT_IDEAL_WIDTH, DEFAULT_IDEAL_HEIGHT),
            desired_id: None,
            owner: OwnerToken::random(),
            pending_call_timeout: Duration::from_secs(10),
            auto_rearm: true,
        }
    }
}

/// Viewer (caller) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Manual redials allowed per pairing input
    pub max_redials: u32,
    /// Bound on waiting for the remote stream after dialing
    pub dial_timeout: Duration,
    /// Identifier to claim; the rendezvous assigns one when absent
    pub desired_id: Option<PeerIdentity>,
    /// Logical peer token
    pub owner: OwnerToken,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_redials: 3,
            dial_timeout: Duration::from_secs(15),
            desired_id: None,
            owner: OwnerToken::random(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let sender = SenderConfig::default();
        assert_eq!(sender.preferred_facing, FacingMode::Environment);
        assert_eq!(sender.ideal_resolution, (1280, 720));
        assert_eq!(sender.pending_call_timeout, Duration::from_secs(10));
        assert!(sender.auto_rearm);

        let viewer = ViewerConfig::default();
        assert_eq!(viewer.max_redials, 3);
        assert_eq!(viewer.dial_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://cam.example/app/"),
            (ENV_SIGNALING_URL, "ws://127.0.0.1:9000"),
            (ENV_RESTRICTED_NETWORK, "TRUE"),
            (ENV_DEBUG, "0"),
        ]
        .into_iter()
        .collect();

        let config = GlobalConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.base_url, "https://cam.example/app/");
        assert_eq!(config.signaling_url.as_deref(), Some("ws://127.0.0.1:9000"));
        assert!(config.restricted_network);
        assert!(!config.debug_logging);
    }

    #[test]
    fn test_empty_lookup_keeps_defaults() {
        assert_eq!(GlobalConfig::from_lookup(|_| None), GlobalConfig::default());
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string(&SenderConfig::default()).unwrap();
        let back: SenderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.preferred_facing, FacingMode::Environment);
    }
}

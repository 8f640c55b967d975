//! Pairing context passed to every controller
//!
//! Holds the rendezvous service, the host media devices, and global
//! configuration. Nothing here is process-global, so any number of
//! independent senders and viewers can coexist (several per test, say).

use crate::config::GlobalConfig;
use crate::sender::SenderBuilder;
use crate::viewer::ViewerBuilder;
use camlink_core::{CamLinkError, CamLinkResult, Rendezvous};
use camlink_media::{MediaDevices, SimulatedDevices};
use camlink_signaling::{LoopbackRendezvous, WsRendezvous};
use std::sync::Arc;
use tracing::info;

/// Shared collaborators for senders and viewers
#[derive(Debug, Clone)]
pub struct PairingContext {
    rendezvous: Arc<dyn Rendezvous>,
    devices: Arc<dyn MediaDevices>,
    config: GlobalConfig,
}

impl PairingContext {
    /// Context over explicit collaborators with default configuration
    pub fn new(rendezvous: Arc<dyn Rendezvous>, devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            rendezvous,
            devices,
            config: GlobalConfig::default(),
        }
    }

    /// In-process pairing through `rendezvous` on simulated hardware
    pub fn loopback(rendezvous: &LoopbackRendezvous, devices: &SimulatedDevices) -> Self {
        Self::new(Arc::new(rendezvous.clone()), Arc::new(devices.clone()))
    }

    /// Pairing through the WebSocket rendezvous at `signaling_url`
    pub fn websocket(signaling_url: impl Into<String>, devices: Arc<dyn MediaDevices>) -> Self {
        let signaling_url = signaling_url.into();
        let mut context = Self::new(Arc::new(WsRendezvous::new(signaling_url.clone())), devices);
        context.config.signaling_url = Some(signaling_url);
        context
    }

    /// Build from configuration; requires `signaling_url`
    pub fn from_config(config: GlobalConfig, devices: Arc<dyn MediaDevices>) -> CamLinkResult<Self> {
        let url = config
            .signaling_url
            .clone()
            .ok_or_else(|| CamLinkError::Signaling {
                reason: "no signaling URL configured".to_string(),
            })?;
        info!("Using rendezvous at {}", url);
        Ok(Self::websocket(url, devices).with_config(config))
    }

    /// Replace the global configuration
    pub fn with_config(mut self, config: GlobalConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the log subscriber, honouring `debug_logging`
    #[cfg(feature = "diagnostics")]
    pub fn init_logging(&self) -> CamLinkResult<()> {
        camlink_diagnostics::DebugLogger::new()
            .with_debug(self.config.debug_logging)
            .install()
    }

    /// Start configuring a sender
    pub fn sender(&self) -> SenderBuilder {
        SenderBuilder::new(self.clone())
    }

    /// Start configuring a viewer
    pub fn viewer(&self) -> ViewerBuilder {
        ViewerBuilder::new(self.clone())
    }

    /// Rendezvous service
    pub fn rendezvous(&self) -> Arc<dyn Rendezvous> {
        Arc::clone(&self.rendezvous)
    }

    /// Host media devices
    pub fn devices(&self) -> Arc<dyn MediaDevices> {
        Arc::clone(&self.devices)
    }

    /// Global configuration
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }
}

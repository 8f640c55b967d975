//! # CamLink - Phone Camera Pairing
//!
//! CamLink turns a phone into a wireless camera for a desktop viewer. The
//! phone (the *sender*) opens its camera, registers a short peer identity
//! with a rendezvous service and shows a pairing link; the desktop (the
//! *viewer*) scans the link, dials the identity and renders the stream.
//!
//! ## Key Features
//!
//! - **Explicit lifecycle**: `INITIALIZING → READY → STREAMING`, with
//!   `DISCONNECTED` re-arming back to `READY` without reopening the camera
//! - **Constraint fallback**: preferred camera first, any camera second
//! - **Camera switching**: release-before-acquire, flags carried over, tracks
//!   replaced in place on the live call
//! - **Ordered teardown**: session, then hardware, then identity
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camlink::{LoopbackRendezvous, PairingContext, SimulatedDevices};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rendezvous = LoopbackRendezvous::new();
//!     let phone = PairingContext::loopback(&rendezvous, &SimulatedDevices::phone());
//!     let desk = PairingContext::loopback(&rendezvous, &SimulatedDevices::laptop());
//!
//!     let sender = phone.sender().desired_id("mob-48213").start();
//!     sender.wait_for(|s| s.is_ready()).await;
//!     let token = sender.pairing_token().ok_or("sender failed to start")?;
//!
//!     let viewer = desk.viewer().start().await?;
//!     let stream = viewer.dial(token.as_str()).await?;
//!     println!("Receiving {:?}", stream.remote_stream());
//!
//!     viewer.shutdown().await?;
//!     sender.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod consumer;
pub mod context;
pub mod controls;
pub mod event;
pub mod sender;
pub mod session;
pub mod viewer;

mod tracker;

// Re-export core types for easy access
pub use camlink_core::{
    CallRole, CamLinkError, CamLinkResult, ConsumerStatus, ErrorReport, FacingMode,
    LifecycleEvent, LifecycleState, OwnerToken, PeerIdentity, SessionId, StreamDescriptor,
    TrackDescriptor, TrackKind,
};

pub use camlink_media::{
    DeviceInfo, MediaDevices, MediaError, SimulatedDevices, TrackControlState,
};

pub use camlink_signaling::{
    IdentityState, LoopbackRendezvous, PairingAffordance, PairingToken, RendezvousServer,
    WsRendezvous,
};

#[cfg(feature = "diagnostics")]
pub use camlink_diagnostics::{DebugLogger, DotColor, StatusIndicator};

pub use config::{GlobalConfig, SenderConfig, ViewerConfig};
pub use consumer::{NullSurface, RenderSurface, StreamConsumer};
pub use context::PairingContext;
pub use controls::{SwitchOutcome, TrackControls};
pub use event::{Event, EventStream};
pub use sender::{Sender, SenderBuilder};
pub use session::{ConnectionSession, SessionInfo, TeardownStep};
pub use viewer::{Viewer, ViewerBuilder};

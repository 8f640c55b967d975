//! # CamLink Signaling
//!
//! Peer identity registration, pairing tokens and call signaling for CamLink.
//! Ships a WebSocket rendezvous server with a matching client, plus an
//! in-process loopback rendezvous for same-process pairing.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod identity;
pub mod loopback;
pub mod pairing;
pub mod protocol;
pub mod server;

// Re-export main types
pub use client::{WsEndpoint, WsRendezvous};
pub use identity::{generate_sender_id, IdentityState, PeerIdentityProvider, RegisteredPeer};
pub use loopback::{LoopbackEndpoint, LoopbackRendezvous};
pub use pairing::{
    decode as decode_pairing, normalize_base_url, PairingAffordance, PairingError, PairingToken,
    PAIRING_PARAM, PAIRING_ROUTE,
};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{Registration, RelayedCall, RendezvousServer};

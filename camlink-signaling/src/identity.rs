//! Peer identity provider
//!
//! Claims an identity from a [`Rendezvous`] and publishes its progress on a
//! watch channel. A collision with a live registration carrying the same
//! owner token is a stale duplicate of this very peer: the provider takes it
//! over and reports [`RegistrationStatus::DegradedReady`]. Any other
//! registration failure is fatal.

use camlink_core::{
    CamLinkError, CamLinkResult, ErrorReport, IncomingCall, OwnerToken, PeerEndpoint,
    PeerIdentity, PeerRegistration, RegisterRequest, RegistrationError, RegistrationStatus,
    Rendezvous,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Prefix of generated sender identifiers
pub const SENDER_ID_PREFIX: &str = "mob-";

/// Generate a sender identifier of the form `mob-NNNNN`
pub fn generate_sender_id() -> PeerIdentity {
    let digits: u32 = rand::thread_rng().gen_range(10_000..100_000);
    PeerIdentity::new(format!("{}{}", SENDER_ID_PREFIX, digits))
}

/// Registration progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// Nothing requested yet
    Unregistered,
    /// Waiting for the rendezvous service
    Registering,
    /// Identity held cleanly
    Ready(PeerIdentity),
    /// Identity held after taking over a stale duplicate
    DegradedReady {
        /// Identity held
        id: PeerIdentity,
        /// Why the registration is degraded
        reason: String,
    },
    /// Registration failed terminally
    Failed(ErrorReport),
    /// Identity released
    Deregistered,
}

impl IdentityState {
    /// Identity held in this state, if any
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match self {
            IdentityState::Ready(id) | IdentityState::DegradedReady { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// A successful registration
#[derive(Debug)]
pub struct RegisteredPeer {
    /// Identity now held
    pub identity: PeerIdentity,
    /// Clean or degraded
    pub status: RegistrationStatus,
    /// Calls addressed to the identity
    pub incoming: mpsc::UnboundedReceiver<IncomingCall>,
    /// Handle for dialing
    pub endpoint: Arc<dyn PeerEndpoint>,
}

/// Obtains and releases this process's peer identity
#[derive(Debug)]
pub struct PeerIdentityProvider {
    rendezvous: Arc<dyn Rendezvous>,
    owner: OwnerToken,
    state: watch::Sender<IdentityState>,
    endpoint: Mutex<Option<Arc<dyn PeerEndpoint>>>,
}

impl PeerIdentityProvider {
    /// Provider registering through `rendezvous` on behalf of `owner`
    pub fn new(rendezvous: Arc<dyn Rendezvous>, owner: OwnerToken) -> Self {
        let (state, _) = watch::channel(IdentityState::Unregistered);
        Self {
            rendezvous,
            owner,
            state,
            endpoint: Mutex::new(None),
        }
    }

    /// Owner token sent with every request
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// Current registration state
    pub fn state(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    /// Observe registration state changes
    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    /// Identity currently held
    pub fn identity(&self) -> Option<PeerIdentity> {
        self.state.borrow().identity().cloned()
    }

    /// Register, claiming `desired` when given
    pub async fn register(
        &self,
        desired: Option<PeerIdentity>,
    ) -> Result<RegisteredPeer, RegistrationError> {
        self.state.send_replace(IdentityState::Registering);
        let request = RegisterRequest::new(desired, self.owner.clone());

        let result = match self.rendezvous.register(request.clone()).await {
            Ok(registration) => Ok((registration, RegistrationStatus::Ready)),
            Err(RegistrationError::IdUnavailable {
                id,
                same_owner: true,
            }) => {
                warn!("⚠️ Identifier {} held by a stale registration of this peer, resuming", id);
                self.rendezvous
                    .register(request.resuming())
                    .await
                    .map(|registration| {
                        let reason = format!("took over stale registration of {}", id);
                        (registration, RegistrationStatus::DegradedReady { reason })
                    })
            }
            Err(err) => Err(err),
        };

        match result {
            Ok((registration, status)) => Ok(self.install(registration, status)),
            Err(err) => {
                error!("❌ Registration failed: {}", err);
                let report = CamLinkError::from(err.clone()).report();
                self.state.send_replace(IdentityState::Failed(report));
                Err(err)
            }
        }
    }

    fn install(&self, registration: PeerRegistration, status: RegistrationStatus) -> RegisteredPeer {
        let PeerRegistration {
            identity,
            resumed,
            incoming,
            endpoint,
        } = registration;

        let status = match status {
            // The service may resume silently; still surface it
            RegistrationStatus::Ready if resumed => RegistrationStatus::DegradedReady {
                reason: format!("resumed stale registration of {}", identity),
            },
            other => other,
        };

        let state = match &status {
            RegistrationStatus::Ready => IdentityState::Ready(identity.clone()),
            RegistrationStatus::DegradedReady { reason } => IdentityState::DegradedReady {
                id: identity.clone(),
                reason: reason.clone(),
            },
        };
        info!("🪪 Registered as {} ({:?})", identity, status);

        *self.endpoint.lock() = Some(Arc::clone(&endpoint));
        self.state.send_replace(state);

        RegisteredPeer {
            identity,
            status,
            incoming,
            endpoint,
        }
    }

    /// Release the identity. A no-op when nothing is held.
    pub async fn deregister(&self) -> CamLinkResult<()> {
        let endpoint = self.endpoint.lock().take();
        if let Some(endpoint) = endpoint {
            endpoint.deregister().await?;
            info!("Deregistered {}", endpoint.identity());
            self.state.send_replace(IdentityState::Deregistered);
        }
        Ok(())
    }
}

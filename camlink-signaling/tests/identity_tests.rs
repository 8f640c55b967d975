//! Peer identity provider tests
//!
//! Runs the provider against the loopback rendezvous:
//! - Clean registration
//! - Stale duplicate from the same owner (degraded-ready)
//! - Foreign collision and unreachable service (fatal)
//! - Deregistration

use std::sync::Arc;

use camlink_core::{
    OwnerToken, PeerIdentity, RegisterRequest, RegistrationError, RegistrationStatus, Rendezvous,
};
use camlink_signaling::{IdentityState, LoopbackRendezvous, PeerIdentityProvider};

fn provider(rendezvous: &LoopbackRendezvous, owner: &str) -> PeerIdentityProvider {
    PeerIdentityProvider::new(Arc::new(rendezvous.clone()), OwnerToken::new(owner))
}

#[tokio::test]
async fn test_clean_registration() {
    let rendezvous = LoopbackRendezvous::new();
    let provider = provider(&rendezvous, "owner-a");
    let mut states = provider.subscribe();
    assert_eq!(*states.borrow(), IdentityState::Unregistered);

    let peer = provider
        .register(Some(PeerIdentity::new("mob-48213")))
        .await
        .unwrap();
    assert_eq!(peer.identity.as_str(), "mob-48213");
    assert_eq!(peer.status, RegistrationStatus::Ready);

    states.changed().await.unwrap();
    assert_eq!(
        *states.borrow(),
        IdentityState::Ready(PeerIdentity::new("mob-48213"))
    );
    assert_eq!(provider.identity(), Some(PeerIdentity::new("mob-48213")));
}

#[tokio::test]
async fn test_assigned_identity_when_none_desired() {
    let rendezvous = LoopbackRendezvous::new();
    let provider = provider(&rendezvous, "owner-a");

    let peer = provider.register(None).await.unwrap();
    assert!(!peer.identity.is_empty());
    assert!(rendezvous.is_registered(&peer.identity));
}

#[tokio::test]
async fn test_stale_duplicate_is_degraded_ready() {
    let rendezvous = LoopbackRendezvous::new();
    let id = PeerIdentity::new("mob-11111");

    // A previous incarnation of the same peer still holds the identifier
    let _stale = rendezvous
        .register(RegisterRequest::new(Some(id.clone()), OwnerToken::new("owner-a")))
        .await
        .unwrap();

    let provider = provider(&rendezvous, "owner-a");
    let peer = provider.register(Some(id.clone())).await.unwrap();
    assert!(peer.status.is_degraded());
    assert!(matches!(
        provider.state(),
        IdentityState::DegradedReady { .. }
    ));
    assert_eq!(provider.identity(), Some(id));
}

#[tokio::test]
async fn test_foreign_collision_is_fatal() {
    let rendezvous = LoopbackRendezvous::new();
    let id = PeerIdentity::new("mob-22222");
    let _other = rendezvous
        .register(RegisterRequest::new(Some(id.clone()), OwnerToken::new("owner-b")))
        .await
        .unwrap();

    let provider = provider(&rendezvous, "owner-a");
    let err = provider.register(Some(id.clone())).await.unwrap_err();
    assert_eq!(
        err,
        RegistrationError::IdUnavailable {
            id,
            same_owner: false
        }
    );

    match provider.state() {
        IdentityState::Failed(report) => {
            assert_eq!(report.code, "ID_UNAVAILABLE");
            assert!(!report.recoverable);
        }
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(provider.identity(), None);
}

#[tokio::test]
async fn test_unreachable_service_is_fatal() {
    let rendezvous = LoopbackRendezvous::new();
    rendezvous.fail_next_registration(RegistrationError::Unreachable {
        reason: "connection refused".to_string(),
    });

    let provider = provider(&rendezvous, "owner-a");
    let err = provider.register(None).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Unreachable { .. }));
    assert!(matches!(provider.state(), IdentityState::Failed(_)));
}

#[tokio::test]
async fn test_deregister_releases_identifier() {
    let rendezvous = LoopbackRendezvous::new();
    let provider = provider(&rendezvous, "owner-a");
    let id = PeerIdentity::new("mob-33333");

    let _peer = provider.register(Some(id.clone())).await.unwrap();
    assert!(rendezvous.is_registered(&id));

    provider.deregister().await.unwrap();
    assert!(!rendezvous.is_registered(&id));
    assert_eq!(provider.state(), IdentityState::Deregistered);

    // Second call is a no-op
    provider.deregister().await.unwrap();

    // A foreign owner can now claim it
    let other = rendezvous
        .register(RegisterRequest::new(Some(id), OwnerToken::new("owner-b")))
        .await;
    assert!(other.is_ok());
}

//! Rendezvous server integration tests
//!
//! Drives a real WebSocket server through the `WsRendezvous` client:
//! - Registration, assigned identities and collisions
//! - Offer/answer relay and hang-up
//! - Unknown dial targets
//! - Cleanup when a peer disconnects

use std::net::SocketAddr;
use std::time::Duration;

use camlink_core::{
    CallEvent, OwnerToken, PeerIdentity, RegisterRequest, RegistrationError, Rendezvous,
    StreamDescriptor, TrackDescriptor, TrackKind,
};
use camlink_signaling::{RendezvousServer, WsRendezvous};
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

async fn start_test_server() -> (RendezvousServer, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RendezvousServer::new(addr);

    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    (server, addr)
}

fn client(addr: SocketAddr) -> WsRendezvous {
    WsRendezvous::new(format!("ws://{}", addr))
}

fn request(id: &str, owner: &str) -> RegisterRequest {
    RegisterRequest::new(Some(PeerIdentity::new(id)), OwnerToken::new(owner))
}

fn camera_stream() -> StreamDescriptor {
    StreamDescriptor::new(vec![
        TrackDescriptor::new(TrackKind::Video, "Back Camera"),
        TrackDescriptor::new(TrackKind::Audio, "Microphone"),
    ])
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(STEP, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_register_and_collide() {
    let (server, addr) = start_test_server().await;
    let rendezvous = client(addr);

    let first = timeout(STEP, rendezvous.register(request("mob-48213", "owner-a")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.identity.as_str(), "mob-48213");
    assert!(!first.resumed);
    assert!(server.is_registered(&PeerIdentity::new("mob-48213")));

    let foreign = timeout(STEP, rendezvous.register(request("mob-48213", "owner-b")))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(
        foreign,
        RegistrationError::IdUnavailable {
            id: PeerIdentity::new("mob-48213"),
            same_owner: false
        }
    );

    let stale = timeout(STEP, rendezvous.register(request("mob-48213", "owner-a")))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        stale,
        RegistrationError::IdUnavailable {
            same_owner: true,
            ..
        }
    ));

    let resumed = timeout(
        STEP,
        rendezvous.register(request("mob-48213", "owner-a").resuming()),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(resumed.resumed);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_assigned_identity() {
    let (server, addr) = start_test_server().await;
    let registration = timeout(
        STEP,
        client(addr).register(RegisterRequest::new(None, OwnerToken::random())),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(!registration.identity.is_empty());
    assert!(server.is_registered(&registration.identity));
}

#[tokio::test]
async fn test_unreachable_server() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let err = client(addr)
        .with_connect_timeout(Duration::from_secs(2))
        .register(request("mob-1", "owner-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::Unreachable { .. }));
}

#[tokio::test]
async fn test_call_relay_end_to_end() {
    let (server, addr) = start_test_server().await;
    let rendezvous = client(addr);

    let mut sender = rendezvous
        .register(request("mob-48213", "phone"))
        .await
        .unwrap();
    let viewer = rendezvous
        .register(request("console-1", "console"))
        .await
        .unwrap();

    let mut caller_link = viewer
        .endpoint
        .dial(&PeerIdentity::new("mob-48213"), StreamDescriptor::empty())
        .await
        .unwrap();

    let incoming = timeout(STEP, sender.incoming.recv()).await.unwrap().unwrap();
    assert_eq!(incoming.caller().as_str(), "console-1");
    assert_eq!(incoming.session_id(), caller_link.session_id());

    let mut answer_link = incoming.accept(camera_stream()).await.unwrap();
    match timeout(STEP, caller_link.next_event()).await.unwrap() {
        Some(CallEvent::RemoteStream(stream)) => {
            assert!(stream.has_video());
            assert_eq!(stream, camera_stream());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        answer_link.next_event().await,
        Some(CallEvent::RemoteStream(_))
    ));
    wait_until(|| server.active_calls().iter().any(|c| c.answered)).await;

    // In-place replacement reaches the viewer
    let front = TrackDescriptor::new(TrackKind::Video, "Front Camera");
    answer_link
        .control()
        .replace_track(front.clone())
        .await
        .unwrap();
    assert_eq!(
        timeout(STEP, caller_link.next_event()).await.unwrap(),
        Some(CallEvent::TrackReplaced(front))
    );

    answer_link.close().await;
    assert_eq!(answer_link.next_event().await, Some(CallEvent::Closed));
    assert_eq!(
        timeout(STEP, caller_link.next_event()).await.unwrap(),
        Some(CallEvent::Closed)
    );
    wait_until(|| server.active_calls().is_empty()).await;
}

#[tokio::test]
async fn test_dial_unknown_peer() {
    let (_server, addr) = start_test_server().await;
    let viewer = client(addr)
        .register(request("console-1", "console"))
        .await
        .unwrap();

    let mut link = viewer
        .endpoint
        .dial(&PeerIdentity::new("mob-00000"), StreamDescriptor::empty())
        .await
        .unwrap();
    match timeout(STEP, link.next_event()).await.unwrap() {
        Some(CallEvent::Failed { reason }) => assert!(reason.contains("mob-00000")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_reject_reaches_caller() {
    let (_server, addr) = start_test_server().await;
    let rendezvous = client(addr);
    let mut sender = rendezvous.register(request("mob-1", "phone")).await.unwrap();
    let viewer = rendezvous
        .register(request("console-1", "console"))
        .await
        .unwrap();

    let mut link = viewer
        .endpoint
        .dial(&PeerIdentity::new("mob-1"), StreamDescriptor::empty())
        .await
        .unwrap();
    let incoming = timeout(STEP, sender.incoming.recv()).await.unwrap().unwrap();
    incoming.reject("busy").await;

    match timeout(STEP, link.next_event()).await.unwrap() {
        Some(CallEvent::Failed { reason }) => assert!(reason.contains("busy")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_cleans_up() {
    let (server, addr) = start_test_server().await;
    let rendezvous = client(addr);
    let mut sender = rendezvous.register(request("mob-2", "phone")).await.unwrap();
    let viewer = rendezvous
        .register(request("console-1", "console"))
        .await
        .unwrap();

    let mut link = viewer
        .endpoint
        .dial(&PeerIdentity::new("mob-2"), StreamDescriptor::empty())
        .await
        .unwrap();
    let _answer = timeout(STEP, sender.incoming.recv())
        .await
        .unwrap()
        .unwrap()
        .accept(camera_stream())
        .await
        .unwrap();
    assert!(matches!(
        timeout(STEP, link.next_event()).await.unwrap(),
        Some(CallEvent::RemoteStream(_))
    ));

    sender.endpoint.deregister().await.unwrap();

    assert_eq!(
        timeout(STEP, link.next_event()).await.unwrap(),
        Some(CallEvent::Closed)
    );
    wait_until(|| !server.is_registered(&PeerIdentity::new("mob-2"))).await;
    assert!(server.active_calls().is_empty());
}

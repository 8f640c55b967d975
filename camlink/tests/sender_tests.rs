//! Sender lifecycle controller tests
//!
//! Runs a sender on simulated hardware against the loopback rendezvous and
//! drives calls from a bare registered endpoint:
//! - Boot to READY, pairing token and affordance
//! - Media and registration failures reaching ERROR
//! - Calls that arrive before media is ready
//! - Track toggles, camera switches and transport failures mid-call
//! - Ordered teardown

use std::time::Duration;

use camlink::{
    Event, FacingMode, GlobalConfig, LifecycleState, LoopbackRendezvous, OwnerToken,
    PairingAffordance, PairingContext, Sender, SimulatedDevices, SwitchOutcome, TeardownStep,
    TrackKind,
};
use camlink_core::{
    CallEvent, CallLink, PeerIdentity, PeerRegistration, RegisterRequest, Rendezvous,
    StreamDescriptor,
};
use camlink_media::MediaError;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

async fn raw_viewer(rendezvous: &LoopbackRendezvous, id: &str) -> PeerRegistration {
    rendezvous
        .register(RegisterRequest::new(
            Some(PeerIdentity::new(id)),
            OwnerToken::new(id),
        ))
        .await
        .unwrap()
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

async fn ready_sender(rendezvous: &LoopbackRendezvous, devices: &SimulatedDevices, id: &str) -> Sender {
    let sender = PairingContext::loopback(rendezvous, devices)
        .sender()
        .desired_id(id)
        .start();
    let state = timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();
    assert_eq!(state, LifecycleState::Ready);
    sender
}

/// Dial `target` and wait for the sender's stream
async fn streaming_call(viewer: &PeerRegistration, target: &str) -> CallLink {
    let mut link = viewer
        .endpoint
        .dial(&PeerIdentity::new(target), StreamDescriptor::empty())
        .await
        .unwrap();
    match timeout(STEP, link.next_event()).await.unwrap() {
        Some(CallEvent::RemoteStream(stream)) => assert!(stream.has_video()),
        other => panic!("unexpected event: {other:?}"),
    }
    link
}

#[tokio::test]
async fn test_sender_reaches_ready() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = PairingContext::loopback(&rendezvous, &devices).sender().start();

    let state = timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();
    assert_eq!(state, LifecycleState::Ready);

    let identity = sender.identity().unwrap();
    assert!(identity.as_str().starts_with("mob-"));
    assert!(rendezvous.is_registered(&identity));

    let token = sender.pairing_token().unwrap();
    assert!(token
        .as_str()
        .ends_with(&format!("#/mobile-sender?id={}", identity)));
    assert!(matches!(
        sender.affordance(),
        Some(PairingAffordance::QrCode { .. })
    ));

    // Rear camera preferred by default
    assert!(devices.is_held("cam-back"));
    assert!(!devices.is_held("cam-front"));
    assert!(sender.last_error().is_none());
}

#[tokio::test]
async fn test_restricted_network_uses_simulator_link() {
    let rendezvous = LoopbackRendezvous::new();
    let context = PairingContext::loopback(&rendezvous, &SimulatedDevices::phone()).with_config(
        GlobalConfig {
            restricted_network: true,
            ..GlobalConfig::default()
        },
    );
    let sender = context.sender().desired_id("mob-10001").start();
    timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();

    match sender.affordance() {
        Some(PairingAffordance::SimulatorLink { url }) => {
            assert!(url.contains("id=mob-10001"));
            assert!(url.ends_with("&mode=simulator"));
        }
        other => panic!("unexpected affordance: {other:?}"),
    }
}

#[tokio::test]
async fn test_double_media_failure_reaches_error() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    devices.deny_permission(true);

    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-20002")
        .start();
    let mut events = sender.take_events().unwrap();

    let state = timeout(STEP, sender.wait_for(|s| s.is_terminal()))
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Error);

    // Preferred and permissive constraints were both tried
    assert_eq!(devices.attempts(), 2);
    assert_eq!(devices.grants(), 0);

    let report = sender.last_error().unwrap();
    assert_eq!(report.code, "MEDIA_ACQUISITION_FAILED");
    assert!(!report.recoverable);

    let never_ready = events.drain().into_iter().all(|event| match event {
        Event::StateChanged { to, .. } => !to.is_ready(),
        _ => true,
    });
    assert!(never_ready);

    // Nothing stays registered once the sender failed
    wait_until(|| !rendezvous.is_registered(&PeerIdentity::new("mob-20002"))).await;
    assert!(sender.pairing_token().is_none());
}

#[tokio::test]
async fn test_foreign_collision_reaches_error_and_releases_camera() {
    let rendezvous = LoopbackRendezvous::new();
    let _other = rendezvous
        .register(RegisterRequest::new(
            Some(PeerIdentity::new("mob-30003")),
            OwnerToken::new("someone-else"),
        ))
        .await
        .unwrap();

    let devices = SimulatedDevices::phone();
    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-30003")
        .start();

    let state = timeout(STEP, sender.wait_for(|s| s.is_terminal()))
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Error);
    assert_eq!(sender.last_error().unwrap().code, "ID_UNAVAILABLE");
    wait_until(|| devices.active_locks() == 0).await;
}

#[tokio::test]
async fn test_stale_registration_is_degraded_ready() {
    let rendezvous = LoopbackRendezvous::new();
    let owner = OwnerToken::new("phone-1");
    let _stale = rendezvous
        .register(RegisterRequest::new(
            Some(PeerIdentity::new("mob-40004")),
            owner.clone(),
        ))
        .await
        .unwrap();

    let sender = PairingContext::loopback(&rendezvous, &SimulatedDevices::phone())
        .sender()
        .desired_id("mob-40004")
        .owner(owner)
        .start();

    let state = timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();
    assert_eq!(state, LifecycleState::DegradedReady);
    assert_eq!(sender.identity(), Some(PeerIdentity::new("mob-40004")));
}

#[tokio::test]
async fn test_call_before_media_is_queued_then_answered() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    devices.set_latency(Some(Duration::from_millis(300)));

    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-50005")
        .start();
    let mut events = sender.take_events().unwrap();
    wait_until(|| rendezvous.is_registered(&PeerIdentity::new("mob-50005"))).await;
    assert_eq!(sender.state(), LifecycleState::Initializing);

    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let _link = streaming_call(&viewer, "mob-50005").await;

    let state = timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Streaming);
    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(e, Event::CallQueued { .. })));
}

#[tokio::test]
async fn test_queued_call_rejected_after_bounded_wait() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    devices.set_latency(Some(Duration::from_millis(400)));

    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-60006")
        .pending_call_timeout(Duration::from_millis(50))
        .start();
    wait_until(|| rendezvous.is_registered(&PeerIdentity::new("mob-60006"))).await;

    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let mut link = viewer
        .endpoint
        .dial(&PeerIdentity::new("mob-60006"), StreamDescriptor::empty())
        .await
        .unwrap();
    match timeout(STEP, link.next_event()).await.unwrap() {
        Some(CallEvent::Failed { reason }) => assert!(reason.contains("media not ready")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(sender.last_error().unwrap().code, "TIMEOUT");

    // The rejected call does not stop the sender from becoming ready
    let state = timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();
    assert_eq!(state, LifecycleState::Ready);
}

#[tokio::test]
async fn test_second_caller_is_rejected_while_streaming() {
    let rendezvous = LoopbackRendezvous::new();
    let sender = ready_sender(&rendezvous, &SimulatedDevices::phone(), "mob-70007").await;

    let first = raw_viewer(&rendezvous, "console-1").await;
    let _first_link = streaming_call(&first, "mob-70007").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    let second = raw_viewer(&rendezvous, "console-2").await;
    let mut link = second
        .endpoint
        .dial(&PeerIdentity::new("mob-70007"), StreamDescriptor::empty())
        .await
        .unwrap();
    match timeout(STEP, link.next_event()).await.unwrap() {
        Some(CallEvent::Failed { reason }) => assert!(reason.contains("busy")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(sender.state(), LifecycleState::Streaming);
}

#[tokio::test]
async fn test_video_toggle_keeps_streaming() {
    let rendezvous = LoopbackRendezvous::new();
    let sender = ready_sender(&rendezvous, &SimulatedDevices::phone(), "mob-80008").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let _link = streaming_call(&viewer, "mob-80008").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();
    let session = sender.session().unwrap();

    let controls = sender.controls();
    controls.set_video_enabled(false).await;
    controls.set_audio_enabled(false).await;

    assert_eq!(sender.state(), LifecycleState::Streaming);
    assert!(!controls.state().video_enabled);
    assert!(!controls.state().audio_enabled);
    assert_eq!(sender.session().unwrap().session_id, session.session_id);

    controls.set_video_enabled(true).await;
    assert!(controls.state().video_enabled);
    assert_eq!(sender.state(), LifecycleState::Streaming);
}

#[tokio::test]
async fn test_transport_failure_rearms_without_new_grant() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-90009").await;
    let mut events = sender.take_events().unwrap();

    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let _link = streaming_call(&viewer, "mob-90009").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();
    let grants = devices.grants();
    let session_id = sender.session().unwrap().session_id;

    assert!(rendezvous.fail_transport(session_id, "network unreachable"));

    let state = timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();
    assert_eq!(state, LifecycleState::Ready);
    assert_eq!(devices.grants(), grants, "re-arm must not reopen the camera");
    assert!(sender.session().is_none());

    let transitions: Vec<(LifecycleState, LifecycleState)> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            Event::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert!(transitions.ends_with(&[
        (LifecycleState::Ready, LifecycleState::Streaming),
        (LifecycleState::Streaming, LifecycleState::Disconnected),
        (LifecycleState::Disconnected, LifecycleState::Ready),
    ]));

    let report = sender.last_error().unwrap();
    assert!(report.recoverable);
    assert!(report.message.contains("network unreachable"));

    // A new viewer can connect straight away
    let again = raw_viewer(&rendezvous, "console-2").await;
    let _link = streaming_call(&again, "mob-90009").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_manual_rearm() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-11110")
        .auto_rearm(false)
        .start();
    timeout(STEP, sender.wait_for(|s| s.is_ready())).await.unwrap();

    assert!(sender.rearm().await.is_err());

    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let link = streaming_call(&viewer, "mob-11110").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    link.close().await;
    let state = timeout(STEP, sender.wait_for(|s| s == LifecycleState::Disconnected))
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Disconnected);

    assert_eq!(sender.rearm().await.unwrap(), LifecycleState::Ready);
    assert_eq!(devices.grants(), 1);
}

#[tokio::test]
async fn test_switch_facing_replaces_track_in_call() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-12121").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let mut link = streaming_call(&viewer, "mob-12121").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    let controls = sender.controls();
    controls.set_audio_enabled(false).await;
    assert_eq!(controls.switch_facing().await.unwrap(), SwitchOutcome::Applied);
    assert_eq!(controls.facing(), FacingMode::User);
    assert!(!controls.state().audio_enabled);

    // Never two cameras at once
    assert!(devices.peak_camera_locks() <= 1);
    assert!(devices.is_held("cam-front"));
    assert!(!devices.is_held("cam-back"));

    let replaced = timeout(STEP, async {
        loop {
            match link.next_event().await {
                Some(CallEvent::TrackReplaced(track)) if track.kind == TrackKind::Video => {
                    return track;
                }
                Some(CallEvent::TrackReplaced(_)) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(replaced.facing, Some(FacingMode::User));
    assert_eq!(sender.state(), LifecycleState::Streaming);

    wait_until(|| {
        sender.session().map_or(false, |info| {
            info.local_stream
                .tracks_of(TrackKind::Video)
                .any(|t| t.facing == Some(FacingMode::User))
        })
    })
    .await;

    // And back again
    assert_eq!(controls.switch_facing().await.unwrap(), SwitchOutcome::Applied);
    assert_eq!(controls.facing(), FacingMode::Environment);
    assert!(devices.peak_camera_locks() <= 1);
}

#[tokio::test]
async fn test_switch_without_in_place_replacement_requires_redial() {
    let rendezvous = LoopbackRendezvous::new();
    rendezvous.set_track_replacement(false);
    let sender = ready_sender(&rendezvous, &SimulatedDevices::phone(), "mob-13131").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let _link = streaming_call(&viewer, "mob-13131").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    assert_eq!(
        sender.controls().switch_facing().await.unwrap(),
        SwitchOutcome::RedialRequired
    );
    assert_eq!(sender.state(), LifecycleState::Streaming);
}

#[tokio::test]
async fn test_failed_switch_keeps_previous_camera() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-14141").await;

    // Both constraint attempts for the front camera fail
    devices.fail_next(MediaError::DeviceBusy {
        device_id: "cam-front".to_string(),
    });
    devices.fail_next(MediaError::DeviceBusy {
        device_id: "cam-front".to_string(),
    });

    let err = sender.controls().switch_facing().await.unwrap_err();
    assert_eq!(err.error_code(), "MEDIA_ACQUISITION_FAILED");
    assert!(devices.is_held("cam-back"));
    assert_eq!(sender.controls().facing(), FacingMode::Environment);
    assert_eq!(sender.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_failed_switch_in_call_rejoins_restored_camera() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-14242").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let mut link = streaming_call(&viewer, "mob-14242").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    let video_id = |sender: &Sender| {
        sender.session().and_then(|info| {
            info.local_stream
                .tracks_of(TrackKind::Video)
                .next()
                .map(|t| t.id.clone())
        })
    };
    let before = video_id(&sender).unwrap();

    for _ in 0..2 {
        devices.fail_next(MediaError::DeviceBusy {
            device_id: "cam-front".to_string(),
        });
    }
    let err = sender.controls().switch_facing().await.unwrap_err();
    assert_eq!(err.error_code(), "MEDIA_ACQUISITION_FAILED");
    assert!(devices.is_held("cam-back"));

    // The viewer gets the reopened rear camera in place of the released one
    let replaced = timeout(STEP, async {
        loop {
            match link.next_event().await {
                Some(CallEvent::TrackReplaced(track)) if track.kind == TrackKind::Video => {
                    return track;
                }
                Some(CallEvent::TrackReplaced(_)) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(replaced.facing, Some(FacingMode::Environment));
    assert_ne!(replaced.id, before);

    wait_until(|| video_id(&sender).as_deref() == Some(replaced.id.as_str())).await;
    assert_eq!(sender.state(), LifecycleState::Streaming);
    assert_eq!(sender.controls().facing(), FacingMode::Environment);
}

#[tokio::test]
async fn test_switch_losing_both_cameras_in_call_reaches_error() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-14343").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let mut link = streaming_call(&viewer, "mob-14343").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    // Both attempts for the front camera and both for the restore fail
    for _ in 0..4 {
        devices.fail_next(MediaError::DeviceBusy {
            device_id: "cam-any".to_string(),
        });
    }
    assert!(sender.controls().switch_facing().await.is_err());

    let state = timeout(STEP, sender.wait_for(|s| s.is_terminal()))
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Error);
    assert!(sender.session().is_none());
    assert!(!devices.is_held("cam-back"));
    assert!(!devices.is_held("cam-front"));

    let ended = timeout(STEP, async {
        loop {
            match link.next_event().await {
                Some(CallEvent::TrackReplaced(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        ended,
        None | Some(CallEvent::Closed) | Some(CallEvent::Failed { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_runs_in_order() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    let sender = ready_sender(&rendezvous, &devices, "mob-15151").await;
    let viewer = raw_viewer(&rendezvous, "console-1").await;
    let mut link = streaming_call(&viewer, "mob-15151").await;
    timeout(STEP, sender.wait_for(|s| s == LifecycleState::Streaming))
        .await
        .unwrap();

    let steps = timeout(STEP, sender.shutdown()).await.unwrap().unwrap();
    assert_eq!(
        steps,
        vec![
            TeardownStep::SessionClosed,
            TeardownStep::MediaReleased,
            TeardownStep::IdentityDeregistered,
        ]
    );
    assert_eq!(
        timeout(STEP, link.next_event()).await.unwrap(),
        Some(CallEvent::Closed)
    );
    assert_eq!(devices.active_locks(), 0);
    assert!(!rendezvous.is_registered(&PeerIdentity::new("mob-15151")));
    assert_eq!(sender.state(), LifecycleState::Closed);

    // Already torn down
    assert!(sender.shutdown().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_while_initializing() {
    let rendezvous = LoopbackRendezvous::new();
    let devices = SimulatedDevices::phone();
    devices.set_latency(Some(Duration::from_secs(30)));

    let sender = PairingContext::loopback(&rendezvous, &devices)
        .sender()
        .desired_id("mob-16161")
        .start();
    wait_until(|| rendezvous.is_registered(&PeerIdentity::new("mob-16161"))).await;

    let steps = timeout(STEP, sender.shutdown()).await.unwrap().unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(sender.state(), LifecycleState::Closed);
    assert_eq!(devices.grants(), 0);
    assert!(!rendezvous.is_registered(&PeerIdentity::new("mob-16161")));
}

//! In-process rendezvous
//!
//! Pairs peers living in the same process without any network. Used by the
//! simulator link and by tests, and offers fault injection for registration
//! failures and transport drops.

use async_trait::async_trait;
use camlink_core::{
    CallAcceptor, CallControl, CallEvent, CallLink, CallRole, CamLinkError, IncomingCall,
    OwnerToken, PeerEndpoint, PeerIdentity, PeerRegistration, RegisterRequest, RegistrationError,
    Rendezvous, SessionId, StreamDescriptor, TrackDescriptor,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct PeerSlot {
    owner: OwnerToken,
    generation: u64,
    incoming: mpsc::UnboundedSender<IncomingCall>,
}

impl PeerSlot {
    // A slot whose receiver is gone belongs to a peer that vanished without
    // deregistering; it no longer blocks the identifier.
    fn is_live(&self) -> bool {
        !self.incoming.is_closed()
    }
}

#[derive(Debug)]
struct CallSlot {
    caller: PeerIdentity,
    answerer: PeerIdentity,
    offer: StreamDescriptor,
    caller_events: mpsc::UnboundedSender<CallEvent>,
    answerer_events: Option<mpsc::UnboundedSender<CallEvent>>,
}

impl CallSlot {
    fn send_to(&self, role: CallRole, event: CallEvent) {
        let target = match role {
            CallRole::Caller => Some(&self.caller_events),
            CallRole::Answerer => self.answerer_events.as_ref(),
        };
        if let Some(tx) = target {
            let _ = tx.send(event);
        }
    }

    fn send_both(&self, event: CallEvent) {
        self.send_to(CallRole::Caller, event.clone());
        self.send_to(CallRole::Answerer, event);
    }
}

#[derive(Debug)]
struct LoopbackInner {
    peers: DashMap<PeerIdentity, PeerSlot>,
    calls: DashMap<SessionId, CallSlot>,
    registration_failures: Mutex<VecDeque<RegistrationError>>,
    track_replacement: AtomicBool,
    generations: AtomicU64,
}

/// Rendezvous service living inside the current process
#[derive(Debug, Clone)]
pub struct LoopbackRendezvous {
    inner: Arc<LoopbackInner>,
}

impl Default for LoopbackRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRendezvous {
    /// Create an empty rendezvous
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                peers: DashMap::new(),
                calls: DashMap::new(),
                registration_failures: Mutex::new(VecDeque::new()),
                track_replacement: AtomicBool::new(true),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Fail the next registration with `error`
    pub fn fail_next_registration(&self, error: RegistrationError) {
        self.inner.registration_failures.lock().push_back(error);
    }

    /// Drop a call's transport; both sides see [`CallEvent::Failed`]
    pub fn fail_transport(&self, session_id: SessionId, reason: impl Into<String>) -> bool {
        match self.inner.calls.remove(&session_id) {
            Some((_, call)) => {
                let reason = reason.into();
                warn!("💥 Injected transport failure on {}: {}", session_id, reason);
                call.send_both(CallEvent::Failed { reason });
                true
            }
            None => false,
        }
    }

    /// Toggle in-place track replacement support
    pub fn set_track_replacement(&self, supported: bool) {
        self.inner
            .track_replacement
            .store(supported, Ordering::SeqCst);
    }

    /// Sessions currently relayed
    pub fn active_calls(&self) -> Vec<SessionId> {
        self.inner.calls.iter().map(|entry| *entry.key()).collect()
    }

    /// Identities currently held by a live peer
    pub fn registered_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .inner
            .peers
            .iter()
            .filter(|entry| entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Check whether `id` is held by a live peer
    pub fn is_registered(&self, id: &PeerIdentity) -> bool {
        self.inner
            .peers
            .get(id)
            .map_or(false, |slot| slot.is_live())
    }

    fn control(&self, session_id: SessionId, side: CallRole) -> Arc<dyn CallControl> {
        Arc::new(LoopbackControl {
            rendezvous: self.clone(),
            session_id,
            side,
        })
    }
}

#[async_trait]
impl Rendezvous for LoopbackRendezvous {
    async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<PeerRegistration, RegistrationError> {
        if let Some(error) = self.inner.registration_failures.lock().pop_front() {
            debug!("Injected registration failure: {}", error);
            return Err(error);
        }

        let identity = request
            .desired_id
            .clone()
            .unwrap_or_else(|| PeerIdentity::new(Uuid::new_v4().to_string()));
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let slot = PeerSlot {
            owner: request.owner.clone(),
            generation,
            incoming: incoming_tx,
        };

        let mut resumed = false;
        match self.inner.peers.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let held = entry.get();
                if held.is_live() {
                    let same_owner = held.owner == request.owner;
                    if !(request.resume && same_owner) {
                        return Err(RegistrationError::IdUnavailable {
                            id: identity,
                            same_owner,
                        });
                    }
                    resumed = true;
                }
                entry.insert(slot);
            }
            Entry::Vacant(entry) => {
                entry.insert(slot);
            }
        }

        info!("Loopback registered {} (resumed: {})", identity, resumed);
        Ok(PeerRegistration {
            identity: identity.clone(),
            resumed,
            incoming: incoming_rx,
            endpoint: Arc::new(LoopbackEndpoint {
                rendezvous: self.clone(),
                identity,
                generation,
            }),
        })
    }
}

/// Registered loopback peer
#[derive(Debug)]
pub struct LoopbackEndpoint {
    rendezvous: LoopbackRendezvous,
    identity: PeerIdentity,
    generation: u64,
}

#[async_trait]
impl PeerEndpoint for LoopbackEndpoint {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn dial(
        &self,
        target: &PeerIdentity,
        local: StreamDescriptor,
    ) -> Result<CallLink, CamLinkError> {
        let inner = &self.rendezvous.inner;
        let incoming = inner
            .peers
            .get(target)
            .filter(|slot| slot.is_live())
            .map(|slot| slot.incoming.clone())
            .ok_or_else(|| CamLinkError::Dial {
                target: target.clone(),
                reason: "peer unavailable".to_string(),
            })?;

        let session_id = SessionId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        inner.calls.insert(
            session_id,
            CallSlot {
                caller: self.identity.clone(),
                answerer: target.clone(),
                offer: local.clone(),
                caller_events: events_tx,
                answerer_events: None,
            },
        );

        let call = IncomingCall::new(
            session_id,
            self.identity.clone(),
            local,
            Box::new(LoopbackAcceptor {
                rendezvous: self.rendezvous.clone(),
                session_id,
            }),
        );
        if incoming.send(call).is_err() {
            inner.calls.remove(&session_id);
            return Err(CamLinkError::Dial {
                target: target.clone(),
                reason: "peer went away".to_string(),
            });
        }

        debug!("📞 {} dialing {} ({})", self.identity, target, session_id);
        Ok(CallLink::new(
            session_id,
            CallRole::Caller,
            target.clone(),
            events_rx,
            self.rendezvous.control(session_id, CallRole::Caller),
        ))
    }

    async fn deregister(&self) -> Result<(), CamLinkError> {
        let removed = self
            .rendezvous
            .inner
            .peers
            .remove_if(&self.identity, |_, slot| slot.generation == self.generation);
        if removed.is_some() {
            debug!("Loopback deregistered {}", self.identity);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct LoopbackAcceptor {
    rendezvous: LoopbackRendezvous,
    session_id: SessionId,
}

#[async_trait]
impl CallAcceptor for LoopbackAcceptor {
    async fn accept(self: Box<Self>, local: StreamDescriptor) -> Result<CallLink, CamLinkError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let caller = {
            let mut call = self
                .rendezvous
                .inner
                .calls
                .get_mut(&self.session_id)
                .ok_or_else(|| CamLinkError::Transport {
                    reason: format!("call {} no longer exists", self.session_id),
                })?;
            let _ = events_tx.send(CallEvent::RemoteStream(call.offer.clone()));
            call.send_to(CallRole::Caller, CallEvent::RemoteStream(local));
            call.answerer_events = Some(events_tx);
            call.caller.clone()
        };

        Ok(CallLink::new(
            self.session_id,
            CallRole::Answerer,
            caller,
            events_rx,
            self.rendezvous.control(self.session_id, CallRole::Answerer),
        ))
    }

    async fn reject(self: Box<Self>, reason: String) {
        if let Some((_, call)) = self.rendezvous.inner.calls.remove(&self.session_id) {
            debug!("Call {} rejected by {}: {}", self.session_id, call.answerer, reason);
            call.send_to(
                CallRole::Caller,
                CallEvent::Failed {
                    reason: format!("rejected: {}", reason),
                },
            );
        }
    }
}

#[derive(Debug)]
struct LoopbackControl {
    rendezvous: LoopbackRendezvous,
    session_id: SessionId,
    side: CallRole,
}

impl LoopbackControl {
    fn remote_side(&self) -> CallRole {
        match self.side {
            CallRole::Caller => CallRole::Answerer,
            CallRole::Answerer => CallRole::Caller,
        }
    }
}

#[async_trait]
impl CallControl for LoopbackControl {
    fn supports_track_replacement(&self) -> bool {
        self.rendezvous
            .inner
            .track_replacement
            .load(Ordering::SeqCst)
    }

    async fn replace_track(&self, track: TrackDescriptor) -> Result<(), CamLinkError> {
        if !self.supports_track_replacement() {
            return Err(CamLinkError::Transport {
                reason: "in-place track replacement unsupported".to_string(),
            });
        }
        let call = self
            .rendezvous
            .inner
            .calls
            .get(&self.session_id)
            .ok_or_else(|| CamLinkError::Transport {
                reason: format!("call {} is closed", self.session_id),
            })?;
        call.send_to(self.remote_side(), CallEvent::TrackReplaced(track));
        Ok(())
    }

    async fn close(&self) {
        if let Some((_, call)) = self.rendezvous.inner.calls.remove(&self.session_id) {
            debug!("Call {} closed by {}", self.session_id, self.side);
            call.send_both(CallEvent::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_core::TrackKind;

    fn video_stream() -> StreamDescriptor {
        StreamDescriptor::new(vec![
            TrackDescriptor::new(TrackKind::Video, "cam"),
            TrackDescriptor::new(TrackKind::Audio, "mic"),
        ])
    }

    async fn register(rendezvous: &LoopbackRendezvous, id: &str) -> PeerRegistration {
        rendezvous
            .register(RegisterRequest::new(
                Some(PeerIdentity::new(id)),
                OwnerToken::random(),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let rendezvous = LoopbackRendezvous::new();
        let mut sender = register(&rendezvous, "mob-1").await;
        let viewer = register(&rendezvous, "viewer").await;

        let mut caller_link = viewer
            .endpoint
            .dial(&PeerIdentity::new("mob-1"), StreamDescriptor::empty())
            .await
            .unwrap();
        let incoming = sender.incoming.recv().await.unwrap();
        assert_eq!(incoming.caller(), &PeerIdentity::new("viewer"));

        let mut answer_link = incoming.accept(video_stream()).await.unwrap();
        assert_eq!(
            caller_link.next_event().await,
            Some(CallEvent::RemoteStream(video_stream()))
        );
        assert_eq!(
            answer_link.next_event().await,
            Some(CallEvent::RemoteStream(StreamDescriptor::empty()))
        );

        caller_link.close().await;
        caller_link.close().await;
        assert_eq!(answer_link.next_event().await, Some(CallEvent::Closed));
        assert!(rendezvous.active_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_call_stays_pending() {
        let rendezvous = LoopbackRendezvous::new();
        let mut sender = register(&rendezvous, "mob-6").await;
        let viewer = register(&rendezvous, "viewer").await;

        let mut link = viewer
            .endpoint
            .dial(&PeerIdentity::new("mob-6"), StreamDescriptor::empty())
            .await
            .unwrap();
        let incoming = sender.incoming.recv().await.unwrap();

        let mut next = tokio_test::task::spawn(link.next_event());
        tokio_test::assert_pending!(next.poll());

        let _answer = incoming.accept(video_stream()).await.unwrap();
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(
            next.poll(),
            Some(CallEvent::RemoteStream(video_stream()))
        );
    }

    #[tokio::test]
    async fn test_dial_unknown_peer() {
        let rendezvous = LoopbackRendezvous::new();
        let viewer = register(&rendezvous, "viewer").await;
        let err = viewer
            .endpoint
            .dial(&PeerIdentity::new("nobody"), StreamDescriptor::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, CamLinkError::Dial { .. }));
    }

    #[tokio::test]
    async fn test_collision_and_resume() {
        let rendezvous = LoopbackRendezvous::new();
        let owner = OwnerToken::new("owner-a");
        let request = RegisterRequest::new(Some(PeerIdentity::new("mob-2")), owner.clone());

        let first = rendezvous.register(request.clone()).await.unwrap();
        let err = rendezvous.register(request.clone()).await.unwrap_err();
        assert_eq!(
            err,
            RegistrationError::IdUnavailable {
                id: PeerIdentity::new("mob-2"),
                same_owner: true
            }
        );

        let foreign = RegisterRequest::new(Some(PeerIdentity::new("mob-2")), OwnerToken::random())
            .resuming();
        assert!(matches!(
            rendezvous.register(foreign).await,
            Err(RegistrationError::IdUnavailable {
                same_owner: false,
                ..
            })
        ));

        let second = rendezvous.register(request.resuming()).await.unwrap();
        assert!(second.resumed);

        // The stale endpoint cannot evict its successor
        first.endpoint.deregister().await.unwrap();
        assert!(rendezvous.is_registered(&PeerIdentity::new("mob-2")));
        second.endpoint.deregister().await.unwrap();
        assert!(!rendezvous.is_registered(&PeerIdentity::new("mob-2")));
    }

    #[tokio::test]
    async fn test_dropped_receiver_frees_identifier() {
        let rendezvous = LoopbackRendezvous::new();
        let first = register(&rendezvous, "mob-3").await;
        drop(first);
        let again = register(&rendezvous, "mob-3").await;
        assert!(!again.resumed);
    }

    #[tokio::test]
    async fn test_reject_and_transport_failure() {
        let rendezvous = LoopbackRendezvous::new();
        let mut sender = register(&rendezvous, "mob-4").await;
        let viewer = register(&rendezvous, "viewer").await;
        let target = PeerIdentity::new("mob-4");

        let mut link = viewer
            .endpoint
            .dial(&target, StreamDescriptor::empty())
            .await
            .unwrap();
        sender.incoming.recv().await.unwrap().reject("busy").await;
        assert!(matches!(
            link.next_event().await,
            Some(CallEvent::Failed { .. })
        ));

        let mut link = viewer
            .endpoint
            .dial(&target, StreamDescriptor::empty())
            .await
            .unwrap();
        let mut answer = sender
            .incoming
            .recv()
            .await
            .unwrap()
            .accept(video_stream())
            .await
            .unwrap();
        assert!(rendezvous.fail_transport(link.session_id(), "network lost"));
        assert!(matches!(
            link.next_event().await,
            Some(CallEvent::RemoteStream(_))
        ));
        assert!(matches!(
            link.next_event().await,
            Some(CallEvent::Failed { .. })
        ));
        assert!(matches!(
            answer.next_event().await,
            Some(CallEvent::RemoteStream(_))
        ));
        assert!(matches!(
            answer.next_event().await,
            Some(CallEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_track_replacement_toggle() {
        let rendezvous = LoopbackRendezvous::new();
        let mut sender = register(&rendezvous, "mob-5").await;
        let viewer = register(&rendezvous, "viewer").await;

        let mut link = viewer
            .endpoint
            .dial(&PeerIdentity::new("mob-5"), StreamDescriptor::empty())
            .await
            .unwrap();
        let answer = sender
            .incoming
            .recv()
            .await
            .unwrap()
            .accept(video_stream())
            .await
            .unwrap();
        link.next_event().await;

        let track = TrackDescriptor::new(TrackKind::Video, "front");
        answer.control().replace_track(track.clone()).await.unwrap();
        assert_eq!(link.next_event().await, Some(CallEvent::TrackReplaced(track.clone())));

        rendezvous.set_track_replacement(false);
        assert!(!answer.control().supports_track_replacement());
        assert!(answer.control().replace_track(track).await.is_err());
    }
}

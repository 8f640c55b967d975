//! Viewer (caller) lifecycle controller
//!
//! The viewer registers an identity, decodes pairing input and dials the
//! sender. It only receives video; any local audio it offers exists because
//! a call has to carry at least one local track.

use crate::config::ViewerConfig;
use crate::consumer::{NullSurface, RenderSurface, StreamConsumer};
use crate::context::PairingContext;
use crate::event::{event_channel, Event, EventStream};
use crate::session::TeardownStep;
use crate::tracker::{wait_for_state, LifecycleTracker};
use camlink_core::{
    CallControl, CamLinkError, CamLinkResult, ConsumerStatus, ErrorReport, LifecycleEvent,
    LifecycleState, OwnerToken, PeerEndpoint, PeerIdentity, StreamDescriptor, TrackKind,
};
use camlink_media::{ConstraintLadder, MediaSourceAdapter};
use camlink_signaling::{decode_pairing, PeerIdentityProvider};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for a [`Viewer`]
#[derive(Debug, Clone)]
pub struct ViewerBuilder {
    context: PairingContext,
    config: ViewerConfig,
    surface: Arc<dyn RenderSurface>,
}

impl ViewerBuilder {
    pub(crate) fn new(context: PairingContext) -> Self {
        Self {
            context,
            config: ViewerConfig::default(),
            surface: Arc::new(NullSurface::new()),
        }
    }

    /// Manual redials allowed per pairing input
    pub fn max_redials(mut self, limit: u32) -> Self {
        self.config.max_redials = limit;
        self
    }

    /// Bound on waiting for the remote stream after dialing
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Identifier to claim; the rendezvous assigns one otherwise
    pub fn desired_id(mut self, id: impl Into<String>) -> Self {
        self.config.desired_id = Some(PeerIdentity::new(id));
        self
    }

    /// Owner token
    pub fn owner(mut self, owner: OwnerToken) -> Self {
        self.config.owner = owner;
        self
    }

    /// Surface the remote stream is rendered onto
    pub fn render_to(mut self, surface: Arc<dyn RenderSurface>) -> Self {
        self.surface = surface;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ViewerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the viewer's identity.
    ///
    /// On a registration failure the error is returned and nothing is held.
    pub async fn start(self) -> CamLinkResult<Viewer> {
        Viewer::start(self.context, self.config, self.surface).await
    }
}

#[derive(Debug)]
struct ViewerInner {
    identity: PeerIdentityProvider,
    endpoint: Arc<dyn PeerEndpoint>,
    adapter: MediaSourceAdapter,
    tracker: LifecycleTracker,
    config: ViewerConfig,
    surface: Arc<dyn RenderSurface>,
    degraded: bool,
    /// One dial in flight at a time
    dialing: tokio::sync::Mutex<()>,
    last_target: Mutex<Option<PeerIdentity>>,
    redials: Mutex<u32>,
    active: Mutex<Option<Arc<dyn CallControl>>>,
    /// Set once shutdown starts, so the closing registration is expected
    closing: AtomicBool,
}

impl ViewerInner {
    /// The registration went away underneath the viewer
    async fn rendezvous_lost(&self) {
        let err = CamLinkError::Signaling {
            reason: "rendezvous registration lost".to_string(),
        };
        self.tracker.fail(&err);

        let control = self.active.lock().take();
        if let Some(control) = control {
            control.close().await;
        }
        if self.adapter.release().await {
            self.tracker.events().emit(Event::MediaReleased);
        }
    }
}

/// Console-side controller: dials a sender and consumes its stream
#[derive(Debug)]
pub struct Viewer {
    inner: Arc<ViewerInner>,
    events: Mutex<Option<EventStream>>,
    rejector: JoinHandle<()>,
}

impl Viewer {
    /// Start configuring a viewer over `context`
    pub fn builder(context: &PairingContext) -> ViewerBuilder {
        ViewerBuilder::new(context.clone())
    }

    async fn start(
        context: PairingContext,
        config: ViewerConfig,
        surface: Arc<dyn RenderSurface>,
    ) -> CamLinkResult<Self> {
        let (sink, stream) = event_channel();
        let tracker = LifecycleTracker::new("viewer", sink);
        let identity = PeerIdentityProvider::new(context.rendezvous(), config.owner.clone());

        let peer = match identity.register(config.desired_id.clone()).await {
            Ok(peer) => peer,
            Err(err) => {
                let err = CamLinkError::from(err);
                tracker.fail(&err);
                return Err(err);
            }
        };
        let degraded = peer.status.is_degraded();
        tracker.events().emit(Event::IdentityRegistered {
            identity: peer.identity.clone(),
            degraded,
        });

        tracker.apply(LifecycleEvent::BootCompleted { degraded })?;
        info!("👀 Viewer ready as {}", peer.identity);

        let inner = Arc::new(ViewerInner {
            identity,
            endpoint: peer.endpoint,
            adapter: MediaSourceAdapter::new(context.devices()),
            tracker,
            config,
            surface,
            degraded,
            dialing: tokio::sync::Mutex::new(()),
            last_target: Mutex::new(None),
            redials: Mutex::new(0),
            active: Mutex::new(None),
            closing: AtomicBool::new(false),
        });

        // Viewers never answer
        let mut incoming = peer.incoming;
        let watched = Arc::clone(&inner);
        let rejector = tokio::spawn(async move {
            while let Some(call) = incoming.recv().await {
                debug!("Viewer rejecting inbound call from {}", call.caller());
                call.reject("viewer does not accept calls").await;
            }
            if !watched.closing.load(Ordering::SeqCst) {
                watched.rendezvous_lost().await;
            }
        });

        Ok(Self {
            inner,
            events: Mutex::new(Some(stream)),
            rejector,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.tracker.state()
    }

    /// Observe lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.tracker.subscribe()
    }

    /// Wait until `predicate` holds for the lifecycle state
    pub async fn wait_for(&self, predicate: impl Fn(LifecycleState) -> bool) -> LifecycleState {
        wait_for_state(self.subscribe(), predicate).await
    }

    /// Identity this viewer registered
    pub fn identity(&self) -> Option<PeerIdentity> {
        self.inner.identity.identity()
    }

    /// Most recent error
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.inner.tracker.last_error()
    }

    /// Status indicator for the UI shell
    #[cfg(feature = "diagnostics")]
    pub fn status_indicator(&self) -> camlink_diagnostics::StatusIndicator {
        camlink_diagnostics::StatusIndicator::for_lifecycle(self.state(), self.last_error())
    }

    /// Take the event stream. Only the first call gets it.
    pub fn take_events(&self) -> Option<EventStream> {
        self.events.lock().take()
    }

    /// Redials used against the current pairing input
    pub fn redials_used(&self) -> u32 {
        *self.inner.redials.lock()
    }

    /// Decode scanned or pasted pairing input and dial the sender it names.
    ///
    /// Input without a peer identifier is rejected before any dial. A failed
    /// attempt is reported once and never retried automatically.
    pub async fn dial(&self, raw: &str) -> CamLinkResult<StreamConsumer> {
        let target = match decode_pairing(raw) {
            Ok(target) => target,
            Err(err) => {
                let err = CamLinkError::from(err);
                self.inner.tracker.record_error(&err);
                return Err(err);
            }
        };
        self.dial_peer(target).await
    }

    /// Dial `target` directly, resetting the redial budget
    pub async fn dial_peer(&self, target: PeerIdentity) -> CamLinkResult<StreamConsumer> {
        let _dialing = self.inner.dialing.lock().await;
        *self.inner.last_target.lock() = Some(target.clone());
        *self.inner.redials.lock() = 0;
        self.place_call(target, 0).await
    }

    /// Dial the last target again, within the redial bound
    pub async fn redial(&self) -> CamLinkResult<StreamConsumer> {
        let _dialing = self.inner.dialing.lock().await;
        let target = self
            .inner
            .last_target
            .lock()
            .clone()
            .ok_or_else(|| CamLinkError::InvalidState {
                expected: "a previous dial".to_string(),
                actual: "no pairing input".to_string(),
            })?;

        let attempt = {
            let mut redials = self.inner.redials.lock();
            if *redials >= self.inner.config.max_redials {
                let err = CamLinkError::RetryLimitExceeded {
                    attempts: *redials,
                    limit: self.inner.config.max_redials,
                };
                drop(redials);
                self.inner.tracker.record_error(&err);
                return Err(err);
            }
            *redials += 1;
            *redials
        };
        info!("🔁 Redialing {} (attempt {})", target, attempt);
        self.place_call(target, attempt).await
    }

    async fn place_call(
        &self,
        target: PeerIdentity,
        retry_count: u32,
    ) -> CamLinkResult<StreamConsumer> {
        let inner = &self.inner;
        let state = inner.tracker.state();
        if !state.is_ready() {
            return Err(CamLinkError::InvalidState {
                expected: LifecycleState::Ready.to_string(),
                actual: state.to_string(),
            });
        }

        let local = self.throwaway_audio().await;
        let link = match inner.endpoint.dial(&target, local).await {
            Ok(link) => link,
            Err(err) => {
                inner.adapter.release().await;
                inner.tracker.record_error(&err);
                return Err(err);
            }
        };

        let session_id = link.session_id();
        info!("📞 Dialing {} ({}, retry {})", target, session_id, retry_count);
        inner.tracker.events().emit(Event::DialStarted {
            session_id,
            target: target.clone(),
        });
        *inner.active.lock() = Some(link.control());

        let consumer = StreamConsumer::spawn_with_events(
            link,
            Arc::clone(&inner.surface),
            inner.tracker.events().clone(),
        );

        let attached = consumer
            .wait_connected(inner.config.dial_timeout)
            .await
            .and_then(|_| inner.tracker.apply(LifecycleEvent::CallAttached));
        if let Err(err) = attached {
            consumer.close().await;
            inner.active.lock().take();
            inner.adapter.release().await;
            inner.tracker.record_error(&err);
            return Err(err);
        }

        tokio::spawn(follow_call(Arc::clone(inner), consumer.outcome()));
        Ok(consumer)
    }

    /// Minimal local track a call has to carry. Muted, since the viewer
    /// only receives; an empty stream is offered if no microphone opens.
    async fn throwaway_audio(&self) -> StreamDescriptor {
        match self
            .inner
            .adapter
            .acquire_with(&ConstraintLadder::audio_only())
            .await
        {
            Ok(handle) => {
                handle.set_kind_enabled(TrackKind::Audio, false);
                handle.descriptor()
            }
            Err(err) => {
                warn!("No local audio ({}), dialing receive-only", err);
                StreamDescriptor::empty()
            }
        }
    }

    /// Close the active call
    pub async fn hang_up(&self) -> CamLinkResult<()> {
        let control = self.inner.active.lock().take();
        match control {
            Some(control) => {
                control.close().await;
                Ok(())
            }
            None => Err(CamLinkError::InvalidState {
                expected: LifecycleState::Streaming.to_string(),
                actual: self.state().to_string(),
            }),
        }
    }

    /// Close the call, release local audio, then release the identity
    pub async fn shutdown(&self) -> CamLinkResult<Vec<TeardownStep>> {
        let inner = &self.inner;
        if inner.tracker.state() == LifecycleState::Closed {
            return Ok(Vec::new());
        }
        inner.closing.store(true, Ordering::SeqCst);
        let mut steps = Vec::with_capacity(3);

        let control = inner.active.lock().take();
        if let Some(control) = control {
            control.close().await;
        }
        steps.push(TeardownStep::SessionClosed);

        if inner.adapter.release().await {
            inner.tracker.events().emit(Event::MediaReleased);
        }
        steps.push(TeardownStep::MediaReleased);

        let identity = inner.identity.identity();
        inner.identity.deregister().await?;
        if let Some(identity) = identity {
            inner
                .tracker
                .events()
                .emit(Event::IdentityDeregistered { identity });
        }
        self.rejector.abort();
        steps.push(TeardownStep::IdentityDeregistered);

        if !inner.tracker.state().is_terminal() {
            inner.tracker.apply(LifecycleEvent::Shutdown)?;
        }
        info!("🛑 Viewer torn down");
        Ok(steps)
    }
}

/// Return the viewer to ready once its call ends
async fn follow_call(inner: Arc<ViewerInner>, outcome: crate::consumer::ConsumerOutcome) {
    let (status, error) = outcome.finished().await;
    inner.active.lock().take();
    inner.adapter.release().await;

    if status == ConsumerStatus::Failed {
        if let Some(report) = error {
            inner.tracker.record_report(report);
        }
    }
    if inner.tracker.apply(LifecycleEvent::CallEnded).is_err() {
        debug!("Viewer no longer streaming; skipping re-arm");
        return;
    }
    if let Err(err) = inner.tracker.apply(LifecycleEvent::Rearmed {
        degraded: inner.degraded,
    }) {
        warn!("Viewer re-arm rejected: {}", err);
    }
}

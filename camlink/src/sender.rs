//! Sender (answerer) lifecycle controller
//!
//! A single driver task owns every mutable piece of the sender: boot
//! futures, the queued call, and the active session. It reacts to media,
//! registration, call and command events in one `select!` loop, so
//! transitions happen in a single, auditable order.
//!
//! ```text
//! INITIALIZING ──media+identity──▶ READY ──accept──▶ STREAMING
//!       │                           ▲                    │
//!       │                           └──re-arm── DISCONNECTED
//!       └──────────── fatal error (any non-terminal) ──▶ ERROR
//! ```

use crate::config::{GlobalConfig, SenderConfig};
use crate::context::PairingContext;
use crate::controls::TrackControls;
use crate::event::{event_channel, Event, EventStream};
use crate::session::{ConnectionSession, SessionInfo, TeardownStep};
use crate::tracker::{wait_for_state, LifecycleTracker};
use camlink_core::{
    CallControl, CallEvent, CamLinkError, CamLinkResult, ErrorReport, FacingMode, IncomingCall,
    LifecycleEvent, LifecycleState, OwnerToken, PeerIdentity, RegistrationError,
    RegistrationStatus, TrackDescriptor,
};
use camlink_media::{MediaResult, MediaSourceAdapter, MediaSourceHandle, TrackControlState};
use camlink_signaling::{
    generate_sender_id, IdentityState, PairingAffordance, PairingToken, PeerIdentityProvider,
    RegisteredPeer,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Requests from handles to the driver task
#[derive(Debug)]
pub(crate) enum Command {
    Rearm(oneshot::Sender<CamLinkResult<LifecycleState>>),
    HangUp(oneshot::Sender<CamLinkResult<()>>),
    LocalTrackReplaced(TrackDescriptor),
    MediaLost(CamLinkError),
    Shutdown(oneshot::Sender<Vec<TeardownStep>>),
}

/// State read by handles and written by the driver
#[derive(Debug)]
pub(crate) struct SenderShared {
    pub(crate) adapter: MediaSourceAdapter,
    pub(crate) controls: Mutex<TrackControlState>,
    /// Serializes facing switches against answering a call
    pub(crate) switching: tokio::sync::Mutex<()>,
    pub(crate) active: Mutex<Option<Arc<dyn CallControl>>>,
    pub(crate) tracker: LifecycleTracker,
    pub(crate) session: watch::Sender<Option<SessionInfo>>,
}

/// Builder for a [`Sender`]
#[derive(Debug, Clone)]
pub struct SenderBuilder {
    context: PairingContext,
    config: SenderConfig,
}

impl SenderBuilder {
    pub(crate) fn new(context: PairingContext) -> Self {
        Self {
            context,
            config: SenderConfig::default(),
        }
    }

    /// Camera direction to try first
    pub fn prefer_facing(mut self, facing: FacingMode) -> Self {
        self.config.preferred_facing = facing;
        self
    }

    /// Ideal capture resolution
    pub fn ideal_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.ideal_resolution = (width, height);
        self
    }

    /// Identifier to claim instead of a generated `mob-NNNNN`
    pub fn desired_id(mut self, id: impl Into<String>) -> Self {
        self.config.desired_id = Some(PeerIdentity::new(id));
        self
    }

    /// Owner token; reuse it across restarts to recover a stale registration
    pub fn owner(mut self, owner: OwnerToken) -> Self {
        self.config.owner = owner;
        self
    }

    /// Bound on how long a call that beats media acquisition may wait
    pub fn pending_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.pending_call_timeout = timeout;
        self
    }

    /// Return to ready automatically after a call ends
    pub fn auto_rearm(mut self, enabled: bool) -> Self {
        self.config.auto_rearm = enabled;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Start acquiring media and registering. Must run inside a Tokio runtime.
    ///
    /// Returns immediately in `INITIALIZING`; watch [`Sender::subscribe`] or
    /// the event stream for progress.
    pub fn start(self) -> Sender {
        Sender::spawn(self.context, self.config)
    }
}

/// Phone-side controller: holds the camera, registers an identity and
/// answers one viewer at a time
#[derive(Debug)]
pub struct Sender {
    shared: Arc<SenderShared>,
    identity: Arc<PeerIdentityProvider>,
    global: GlobalConfig,
    commands: mpsc::UnboundedSender<Command>,
    events: Mutex<Option<EventStream>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Sender {
    /// Start configuring a sender over `context`
    pub fn builder(context: &PairingContext) -> SenderBuilder {
        SenderBuilder::new(context.clone())
    }

    fn spawn(context: PairingContext, config: SenderConfig) -> Self {
        let (sink, stream) = event_channel();
        let (session, _) = watch::channel(None);
        let shared = Arc::new(SenderShared {
            adapter: MediaSourceAdapter::with_resolution(
                context.devices(),
                config.ideal_resolution,
            ),
            controls: Mutex::new(TrackControlState::new(config.preferred_facing)),
            switching: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            tracker: LifecycleTracker::new("sender", sink),
            session,
        });
        let identity = Arc::new(PeerIdentityProvider::new(
            context.rendezvous(),
            config.owner.clone(),
        ));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let desired = config.desired_id.clone().or_else(|| Some(generate_sender_id()));
        info!(
            "🚀 Starting sender ({} camera, desired id {:?})",
            config.preferred_facing, desired
        );

        let media_boot: BoxFuture<'static, MediaResult<Arc<MediaSourceHandle>>> = {
            let shared = Arc::clone(&shared);
            let facing = config.preferred_facing;
            Box::pin(async move { shared.adapter.acquire(facing).await })
        };
        let registration_boot: BoxFuture<'static, Result<RegisteredPeer, RegistrationError>> = {
            let identity = Arc::clone(&identity);
            Box::pin(async move { identity.register(desired).await })
        };

        let driver = SenderDriver {
            shared: Arc::clone(&shared),
            identity: Arc::clone(&identity),
            config,
            commands: command_rx,
            media_boot: Some(media_boot),
            registration_boot: Some(registration_boot),
            media_ready: false,
            registration: None,
            incoming: None,
            pending: None,
            session: None,
        };
        let driver = tokio::spawn(driver.run());

        Self {
            shared,
            identity,
            global: context.config().clone(),
            commands,
            events: Mutex::new(Some(stream)),
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.shared.tracker.state()
    }

    /// Observe lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.shared.tracker.subscribe()
    }

    /// Wait until `predicate` holds for the lifecycle state
    pub async fn wait_for(&self, predicate: impl Fn(LifecycleState) -> bool) -> LifecycleState {
        wait_for_state(self.subscribe(), predicate).await
    }

    /// Identity currently registered
    pub fn identity(&self) -> Option<PeerIdentity> {
        self.identity.identity()
    }

    /// Registration state of the identity provider
    pub fn identity_state(&self) -> IdentityState {
        self.identity.state()
    }

    /// Token a viewer scans or opens to dial this sender
    pub fn pairing_token(&self) -> Option<PairingToken> {
        if self.state().is_terminal() {
            return None;
        }
        self.identity()
            .map(|id| PairingToken::encode(&self.global.base_url, &id))
    }

    /// QR payload or simulator link, depending on the network environment
    pub fn affordance(&self) -> Option<PairingAffordance> {
        self.pairing_token().map(|token| {
            PairingAffordance::for_environment(&token, self.global.restricted_network)
        })
    }

    /// Most recent error
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.shared.tracker.last_error()
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

    /// Audio, video and facing controls
    pub fn controls(&self) -> TrackControls {
        TrackControls::new(Arc::clone(&self.shared), self.commands.clone())
    }

    /// Snapshot of the active call
    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.session.borrow().clone()
    }

    /// Return to ready after a call ended (needed when auto re-arm is off)
    pub async fn rearm(&self) -> CamLinkResult<LifecycleState> {
        self.request(Command::Rearm).await?
    }

    /// Close the active call
    pub async fn hang_up(&self) -> CamLinkResult<()> {
        self.request(Command::HangUp).await?
    }

    /// Close the call, release the camera, then release the identity.
    ///
    /// Works at any point, including while still initializing. Returns the
    /// steps in the order they ran; empty if already shut down.
    pub async fn shutdown(&self) -> CamLinkResult<Vec<TeardownStep>> {
        let steps = match self.request(Command::Shutdown).await {
            Ok(steps) => steps,
            Err(CamLinkError::ChannelClosed { .. }) => Vec::new(),
            Err(err) => return Err(err),
        };
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                warn!("Sender driver ended abnormally: {}", err);
            }
        }
        Ok(steps)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> CamLinkResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| CamLinkError::ChannelClosed {
                channel: "sender commands".to_string(),
            })?;
        response.await.map_err(|_| CamLinkError::ChannelClosed {
            channel: "sender commands".to_string(),
        })
    }
}

struct PendingCall {
    call: IncomingCall,
    deadline: Instant,
}

struct SenderDriver {
    shared: Arc<SenderShared>,
    identity: Arc<PeerIdentityProvider>,
    config: SenderConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    media_boot: Option<BoxFuture<'static, MediaResult<Arc<MediaSourceHandle>>>>,
    registration_boot: Option<BoxFuture<'static, Result<RegisteredPeer, RegistrationError>>>,
    media_ready: bool,
    registration: Option<RegistrationStatus>,
    incoming: Option<mpsc::UnboundedReceiver<IncomingCall>>,
    pending: Option<PendingCall>,
    session: Option<ConnectionSession>,
}

impl SenderDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                result = poll_boot(&mut self.media_boot) => {
                    self.media_boot = None;
                    self.on_media(result).await;
                }
                result = poll_boot(&mut self.registration_boot) => {
                    self.registration_boot = None;
                    self.on_registration(result).await;
                }
                call = recv_call(&mut self.incoming) => match call {
                    Some(call) => self.on_incoming(call).await,
                    None => self.on_rendezvous_lost().await,
                },
                event = next_call_event(&mut self.session) => {
                    self.on_call_event(event).await;
                }
                _ = pending_deadline(self.pending.as_ref().map(|p| p.deadline)) => {
                    self.on_pending_timeout().await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let steps = self.teardown().await;
                        let _ = reply.send(steps);
                        return;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("All sender handles dropped");
                        self.teardown().await;
                        return;
                    }
                },
            }
        }
    }

    fn emit(&self, event: Event) {
        self.shared.tracker.events().emit(event);
    }

    async fn on_media(&mut self, result: MediaResult<Arc<MediaSourceHandle>>) {
        match result {
            Ok(handle) => {
                let controls = *self.shared.controls.lock();
                controls.apply_to(&handle);
                self.media_ready = true;
                self.emit(Event::MediaAcquired {
                    stream: handle.descriptor(),
                });
                self.maybe_ready().await;
            }
            Err(err) => self.enter_error(&CamLinkError::from(err)).await,
        }
    }

    async fn on_registration(&mut self, result: Result<RegisteredPeer, RegistrationError>) {
        match result {
            Ok(peer) => {
                self.emit(Event::IdentityRegistered {
                    identity: peer.identity.clone(),
                    degraded: peer.status.is_degraded(),
                });
                self.incoming = Some(peer.incoming);
                self.registration = Some(peer.status);
                self.maybe_ready().await;
            }
            Err(err) => self.enter_error(&CamLinkError::from(err)).await,
        }
    }

    async fn maybe_ready(&mut self) {
        if !self.media_ready || self.shared.tracker.state() != LifecycleState::Initializing {
            return;
        }
        let Some(status) = &self.registration else {
            return;
        };

        let degraded = status.is_degraded();
        if let Err(err) = self
            .shared
            .tracker
            .apply(LifecycleEvent::BootCompleted { degraded })
        {
            warn!("Boot completion rejected: {}", err);
            return;
        }

        if let Some(pending) = self.pending.take() {
            info!("Answering queued call from {}", pending.call.caller());
            self.answer(pending.call).await;
        }
    }

    async fn on_incoming(&mut self, call: IncomingCall) {
        let state = self.shared.tracker.state();
        match state {
            LifecycleState::Initializing if self.pending.is_none() => {
                info!(
                    "⏳ Call from {} arrived before media was ready, queuing",
                    call.caller()
                );
                self.emit(Event::CallQueued {
                    session_id: call.session_id(),
                    caller: call.caller().clone(),
                });
                self.pending = Some(PendingCall {
                    call,
                    deadline: Instant::now() + self.config.pending_call_timeout,
                });
            }
            LifecycleState::Initializing => {
                self.reject(call, "another call is already waiting").await;
            }
            s if s.is_ready() && self.session.is_none() => self.answer(call).await,
            LifecycleState::Streaming => self.reject(call, "busy").await,
            other => self.reject(call, format!("not ready ({})", other)).await,
        }
    }

    async fn answer(&mut self, call: IncomingCall) {
        let shared = Arc::clone(&self.shared);
        let _switching = shared.switching.lock().await;
        let session_id = call.session_id();
        let caller = call.caller().clone();

        let local = match self.shared.adapter.current().await {
            Some(handle) if handle.is_live() => handle.descriptor(),
            _ => {
                let err = CamLinkError::MediaAcquisition {
                    reason: "media source handle is no longer live".to_string(),
                };
                self.shared.tracker.record_error(&err);
                self.reject(call, "media unavailable").await;
                return;
            }
        };

        match call.accept(local.clone()).await {
            Ok(link) => {
                let session = ConnectionSession::new(link, local, 0);
                *self.shared.active.lock() = Some(session.control());
                self.session = Some(session);
                if let Err(err) = self.shared.tracker.apply(LifecycleEvent::CallAttached) {
                    warn!("Call attach rejected: {}", err);
                }
                info!("📡 Streaming to {} ({})", caller, session_id);
                self.emit(Event::CallAccepted {
                    session_id,
                    remote: caller,
                });
                self.publish_session();
            }
            Err(err) => self.shared.tracker.record_error(&err),
        }
    }

    async fn reject(&mut self, call: IncomingCall, reason: impl Into<String>) {
        let reason = reason.into();
        info!(
            "Rejecting call {} from {}: {}",
            call.session_id(),
            call.caller(),
            reason
        );
        self.emit(Event::CallRejected {
            session_id: call.session_id(),
            caller: call.caller().clone(),
            reason: reason.clone(),
        });
        call.reject(reason).await;
    }

    async fn on_call_event(&mut self, event: Option<CallEvent>) {
        match event {
            Some(CallEvent::RemoteStream(stream)) => {
                if let Some(session) = &self.session {
                    debug!(
                        "Viewer {} attached {} track(s)",
                        session.remote(),
                        stream.tracks.len()
                    );
                    self.emit(Event::RemoteStreamAttached {
                        session_id: session.session_id(),
                        stream,
                    });
                }
                self.publish_session();
            }
            Some(CallEvent::TrackReplaced(track)) => {
                debug!("Viewer replaced its {} track", track.kind);
                self.publish_session();
            }
            Some(CallEvent::Closed) => self.end_session(None).await,
            Some(CallEvent::Failed { reason }) => self.end_session(Some(reason)).await,
            None => {
                self.end_session(Some("call transport dropped".to_string()))
                    .await
            }
        }
    }

    async fn end_session(&mut self, reason: Option<String>) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.shared.active.lock().take();
        session.control().close().await;

        let session_id = session.session_id();
        match &reason {
            Some(reason) => {
                let err = CamLinkError::Transport {
                    reason: reason.clone(),
                };
                self.shared.tracker.record_error(&err);
            }
            None => info!("Call {} with {} closed", session_id, session.remote()),
        }
        if let Err(err) = self.shared.tracker.apply(LifecycleEvent::CallEnded) {
            warn!("Call end rejected: {}", err);
        }
        self.emit(Event::CallEnded { session_id, reason });
        self.publish_session();

        if self.config.auto_rearm {
            if let Err(err) = self.rearm().await {
                warn!("Automatic re-arm failed: {}", err);
            }
        }
    }

    async fn rearm(&mut self) -> CamLinkResult<LifecycleState> {
        let state = self.shared.tracker.state();
        if state != LifecycleState::Disconnected {
            return Err(CamLinkError::InvalidState {
                expected: LifecycleState::Disconnected.to_string(),
                actual: state.to_string(),
            });
        }

        if !self.shared.adapter.is_holding().await {
            warn!("Camera was lost during the call, re-acquiring");
            let facing = self.shared.controls.lock().facing;
            match self.shared.adapter.acquire(facing).await {
                Ok(handle) => {
                    let controls = *self.shared.controls.lock();
                    controls.apply_to(&handle);
                    self.emit(Event::MediaAcquired {
                        stream: handle.descriptor(),
                    });
                }
                Err(err) => {
                    let err = CamLinkError::from(err);
                    self.enter_error(&err).await;
                    return Err(err);
                }
            }
        }

        let degraded = self
            .registration
            .as_ref()
            .map_or(false, RegistrationStatus::is_degraded);
        self.shared
            .tracker
            .apply(LifecycleEvent::Rearmed { degraded })
    }

    async fn on_rendezvous_lost(&mut self) {
        self.incoming = None;
        let err = CamLinkError::Signaling {
            reason: "rendezvous registration lost".to_string(),
        };
        self.enter_error(&err).await;
    }

    async fn on_pending_timeout(&mut self) {
        if let Some(pending) = self.pending.take() {
            let err = CamLinkError::Timeout {
                operation: format!("answering call from {}", pending.call.caller()),
                duration: self.config.pending_call_timeout,
            };
            self.shared.tracker.record_error(&err);
            self.reject(pending.call, "media not ready").await;
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Rearm(reply) => {
                let result = self.rearm().await;
                let _ = reply.send(result);
            }
            Command::HangUp(reply) => {
                let result = if self.session.is_some() {
                    self.end_session(None).await;
                    Ok(())
                } else {
                    Err(CamLinkError::InvalidState {
                        expected: LifecycleState::Streaming.to_string(),
                        actual: self.shared.tracker.state().to_string(),
                    })
                };
                let _ = reply.send(result);
            }
            Command::LocalTrackReplaced(track) => {
                if let Some(session) = self.session.as_mut() {
                    session.replace_local_track(track);
                }
                self.publish_session();
            }
            Command::MediaLost(err) => {
                if !self.shared.tracker.state().is_terminal() {
                    self.enter_error(&err).await;
                }
            }
            // Handled by the run loop
            Command::Shutdown(reply) => {
                let _ = reply.send(Vec::new());
            }
        }
    }

    fn publish_session(&self) {
        let state = self.shared.tracker.state();
        self.shared
            .session
            .send_replace(self.session.as_ref().map(|s| s.info(state)));
    }

    /// Enter ERROR and let go of everything still held
    async fn enter_error(&mut self, err: &CamLinkError) {
        self.shared.tracker.fail(err);
        self.media_boot = None;
        self.registration_boot = None;

        if let Some(pending) = self.pending.take() {
            self.reject(pending.call, "sender failed").await;
        }
        if let Some(session) = self.session.take() {
            self.shared.active.lock().take();
            session.control().close().await;
            self.publish_session();
        }
        if self.shared.adapter.release().await {
            self.emit(Event::MediaReleased);
        }
        self.release_identity().await;
        self.incoming = None;
    }

    async fn release_identity(&mut self) {
        let identity = self.identity.identity();
        match self.identity.deregister().await {
            Ok(()) => {
                if let Some(identity) = identity {
                    self.emit(Event::IdentityDeregistered { identity });
                }
            }
            Err(err) => warn!("Deregistration failed: {}", err),
        }
    }

    /// Close the session, release media, then deregister, in that order
    async fn teardown(&mut self) -> Vec<TeardownStep> {
        // Cancel whatever boot work is still in flight
        self.media_boot = None;
        self.registration_boot = None;
        if let Some(pending) = self.pending.take() {
            self.reject(pending.call, "sender shutting down").await;
        }

        let mut steps = Vec::with_capacity(3);

        if let Some(session) = self.session.take() {
            self.shared.active.lock().take();
            session.control().close().await;
            self.emit(Event::CallEnded {
                session_id: session.session_id(),
                reason: None,
            });
        }
        self.publish_session();
        steps.push(TeardownStep::SessionClosed);

        if self.shared.adapter.release().await {
            self.emit(Event::MediaReleased);
        }
        steps.push(TeardownStep::MediaReleased);

        self.release_identity().await;
        self.incoming = None;
        steps.push(TeardownStep::IdentityDeregistered);

        if !self.shared.tracker.state().is_terminal() {
            if let Err(err) = self.shared.tracker.apply(LifecycleEvent::Shutdown) {
                warn!("Shutdown transition rejected: {}", err);
            }
        }
        info!("🛑 Sender torn down");
        steps
    }
}

async fn poll_boot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot.as_mut() {
        Some(boot) => boot.await,
        None => pending().await,
    }
}

async fn recv_call(
    incoming: &mut Option<mpsc::UnboundedReceiver<IncomingCall>>,
) -> Option<IncomingCall> {
    match incoming.as_mut() {
        Some(incoming) => incoming.recv().await,
        None => pending().await,
    }
}

async fn next_call_event(session: &mut Option<ConnectionSession>) -> Option<CallEvent> {
    match session.as_mut() {
        Some(session) => session.next_event().await,
        None => pending().await,
    }
}

async fn pending_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

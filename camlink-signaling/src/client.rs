//! WebSocket rendezvous client
//!
//! One WebSocket connection per registration. A writer task drains the
//! outbound queue; a reader task routes server messages to the call they
//! belong to. When the connection drops every open call sees
//! [`CallEvent::Failed`].

use crate::protocol::{registration_error_from_wire, ClientMessage, ServerMessage};
use async_trait::async_trait;
use camlink_core::{
    CallAcceptor, CallControl, CallEvent, CallLink, CallRole, CamLinkError, IncomingCall,
    PeerEndpoint, PeerIdentity, PeerRegistration, RegisterRequest, RegistrationError, Rendezvous,
    SessionId, StreamDescriptor, TrackDescriptor,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default bound on connecting and registering
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Rendezvous reached over a WebSocket
#[derive(Debug, Clone)]
pub struct WsRendezvous {
    url: String,
    connect_timeout: Duration,
}

impl WsRendezvous {
    /// Client for the server at `url` (`ws://host:port`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect/register bound
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Server URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Rendezvous for WsRendezvous {
    async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<PeerRegistration, RegistrationError> {
        let unreachable = |reason: String| RegistrationError::Unreachable { reason };

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| unreachable(format!("connect to {} timed out", self.url)))?
            .map_err(|e| unreachable(format!("connect to {} failed: {}", self.url, e)))?;
        let (mut sink, mut source) = ws_stream.split();

        let register = ClientMessage::Register {
            desired_id: request.desired_id.clone(),
            owner: request.owner.clone(),
            resume: request.resume,
        };
        let text = serde_json::to_string(&register)
            .map_err(|e| RegistrationError::Rejected { reason: e.to_string() })?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let reply = tokio::time::timeout(self.connect_timeout, async {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return serde_json::from_str::<ServerMessage>(&text).map_err(|e| {
                            RegistrationError::Rejected {
                                reason: format!("invalid registration reply: {}", e),
                            }
                        });
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(unreachable(e.to_string())),
                }
            }
            Err(unreachable("connection closed during registration".to_string()))
        })
        .await
        .map_err(|_| unreachable("registration reply timed out".to_string()))??;

        let (identity, resumed) = match reply {
            ServerMessage::Registered { id, resumed } => (id, resumed),
            ServerMessage::RegistrationFailed {
                code,
                reason,
                same_owner,
            } => {
                let _ = sink.close().await;
                return Err(registration_error_from_wire(
                    request.desired_id.as_ref(),
                    &code,
                    reason,
                    same_owner,
                ));
            }
            other => {
                let _ = sink.close().await;
                return Err(RegistrationError::Rejected {
                    reason: format!("unexpected registration reply: {:?}", other),
                });
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            identity: identity.clone(),
            outbound: Mutex::new(Some(outbound_tx)),
            calls: DashMap::new(),
            connected: AtomicBool::new(true),
        });

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => reader_shared.dispatch(message, &incoming_tx),
                        Err(e) => warn!("Invalid server message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Rendezvous connection error: {}", e);
                        break;
                    }
                }
            }
            reader_shared.connection_lost();
        });

        info!("🔌 Registered {} with {} (resumed: {})", identity, self.url, resumed);
        Ok(PeerRegistration {
            identity,
            resumed,
            incoming: incoming_rx,
            endpoint: Arc::new(WsEndpoint { shared }),
        })
    }
}

#[derive(Debug)]
struct ClientShared {
    identity: PeerIdentity,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    calls: DashMap<SessionId, mpsc::UnboundedSender<CallEvent>>,
    connected: AtomicBool,
}

impl ClientShared {
    fn send(&self, message: ClientMessage) -> Result<(), CamLinkError> {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if self.connected.load(Ordering::SeqCst) => {
                tx.send(message).map_err(|_| CamLinkError::ChannelClosed {
                    channel: "rendezvous outbound".to_string(),
                })
            }
            _ => Err(CamLinkError::Transport {
                reason: "rendezvous connection lost".to_string(),
            }),
        }
    }

    fn emit(&self, session_id: SessionId, event: CallEvent) {
        if event.is_terminal() {
            if let Some((_, tx)) = self.calls.remove(&session_id) {
                let _ = tx.send(event);
            }
        } else if let Some(tx) = self.calls.get(&session_id) {
            let _ = tx.send(event);
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        message: ServerMessage,
        incoming: &mpsc::UnboundedSender<IncomingCall>,
    ) {
        match message {
            ServerMessage::IncomingOffer {
                session_id,
                caller,
                stream,
            } => {
                debug!("📞 Incoming offer {} from {}", session_id, caller);
                let acceptor = WsAcceptor {
                    shared: Arc::clone(self),
                    session_id,
                    caller: caller.clone(),
                    offer: stream.clone(),
                };
                let call = IncomingCall::new(session_id, caller, stream, Box::new(acceptor));
                if let Err(rejected) = incoming.send(call) {
                    // Nobody is listening for calls any more
                    let call = rejected.0;
                    let _ = self.send(ClientMessage::Reject {
                        session_id: call.session_id(),
                        reason: "not accepting calls".to_string(),
                    });
                }
            }
            ServerMessage::Answered { session_id, stream } => {
                self.emit(session_id, CallEvent::RemoteStream(stream));
            }
            ServerMessage::Rejected { session_id, reason } => {
                self.emit(
                    session_id,
                    CallEvent::Failed {
                        reason: format!("rejected: {}", reason),
                    },
                );
            }
            ServerMessage::HungUp { session_id, reason } => {
                debug!("Call {} hung up remotely ({:?})", session_id, reason);
                self.emit(session_id, CallEvent::Closed);
            }
            ServerMessage::TrackReplaced { session_id, track } => {
                self.emit(session_id, CallEvent::TrackReplaced(track));
            }
            ServerMessage::PeerUnavailable { session_id, target } => {
                self.emit(
                    session_id,
                    CallEvent::Failed {
                        reason: format!("peer {} unavailable", target),
                    },
                );
            }
            ServerMessage::Error { error, error_code } => {
                warn!("Rendezvous reported {}: {}", error_code, error);
            }
            ServerMessage::Registered { .. } | ServerMessage::RegistrationFailed { .. } => {
                debug!("Ignoring late registration reply");
            }
        }
    }

    fn connection_lost(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Rendezvous connection for {} lost", self.identity);
        }
        let sessions: Vec<SessionId> = self.calls.iter().map(|entry| *entry.key()).collect();
        for session_id in sessions {
            self.emit(
                session_id,
                CallEvent::Failed {
                    reason: "rendezvous connection lost".to_string(),
                },
            );
        }
    }

    fn control(self: &Arc<Self>, session_id: SessionId) -> Arc<dyn CallControl> {
        Arc::new(WsControl {
            shared: Arc::clone(self),
            session_id,
        })
    }
}

/// Peer registered through a [`WsRendezvous`]
#[derive(Debug)]
pub struct WsEndpoint {
    shared: Arc<ClientShared>,
}

impl WsEndpoint {
    /// Check whether the rendezvous connection is still up
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerEndpoint for WsEndpoint {
    fn identity(&self) -> &PeerIdentity {
        &self.shared.identity
    }

    async fn dial(
        &self,
        target: &PeerIdentity,
        local: StreamDescriptor,
    ) -> Result<CallLink, CamLinkError> {
        let session_id = SessionId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.shared.calls.insert(session_id, events_tx);

        let offer = ClientMessage::Offer {
            session_id,
            target: target.clone(),
            stream: local,
        };
        if let Err(e) = self.shared.send(offer) {
            self.shared.calls.remove(&session_id);
            return Err(CamLinkError::Dial {
                target: target.clone(),
                reason: e.to_string(),
            });
        }

        Ok(CallLink::new(
            session_id,
            CallRole::Caller,
            target.clone(),
            events_rx,
            self.shared.control(session_id),
        ))
    }

    async fn deregister(&self) -> Result<(), CamLinkError> {
        if self.is_connected() {
            let _ = self.shared.send(ClientMessage::Unregister);
        }
        // Dropping the sender lets the writer flush and close the socket
        self.shared.outbound.lock().take();
        Ok(())
    }
}

#[derive(Debug)]
struct WsAcceptor {
    shared: Arc<ClientShared>,
    session_id: SessionId,
    caller: PeerIdentity,
    offer: StreamDescriptor,
}

#[async_trait]
impl CallAcceptor for WsAcceptor {
    async fn accept(self: Box<Self>, local: StreamDescriptor) -> Result<CallLink, CamLinkError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(CallEvent::RemoteStream(self.offer.clone()));
        self.shared.calls.insert(self.session_id, events_tx);

        if let Err(e) = self.shared.send(ClientMessage::Answer {
            session_id: self.session_id,
            stream: local,
        }) {
            self.shared.calls.remove(&self.session_id);
            return Err(e);
        }

        Ok(CallLink::new(
            self.session_id,
            CallRole::Answerer,
            self.caller.clone(),
            events_rx,
            self.shared.control(self.session_id),
        ))
    }

    async fn reject(self: Box<Self>, reason: String) {
        let _ = self.shared.send(ClientMessage::Reject {
            session_id: self.session_id,
            reason,
        });
    }
}

#[derive(Debug)]
struct WsControl {
    shared: Arc<ClientShared>,
    session_id: SessionId,
}

#[async_trait]
impl CallControl for WsControl {
    fn supports_track_replacement(&self) -> bool {
        true
    }

    async fn replace_track(&self, track: TrackDescriptor) -> Result<(), CamLinkError> {
        if !self.shared.calls.contains_key(&self.session_id) {
            return Err(CamLinkError::Transport {
                reason: format!("call {} is closed", self.session_id),
            });
        }
        self.shared.send(ClientMessage::ReplaceTrack {
            session_id: self.session_id,
            track,
        })
    }

    async fn close(&self) {
        if let Some((_, tx)) = self.shared.calls.remove(&self.session_id) {
            let _ = self.shared.send(ClientMessage::Hangup {
                session_id: self.session_id,
            });
            let _ = tx.send(CallEvent::Closed);
        }
    }
}

//! Rendezvous server implementation

use crate::protocol::{ClientMessage, ServerMessage};
use camlink_core::{
    CamLinkError, CamLinkResult, OwnerToken, PeerIdentity, RegistrationError, SessionId,
    StreamDescriptor, TrackDescriptor,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// An identity held by a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Identity held
    pub id: PeerIdentity,
    /// Logical peer that claimed it
    pub owner: OwnerToken,
    /// Connection the identity is bound to
    pub connection_id: String,
    /// Registration timestamp
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// A call relayed between two registered peers
#[derive(Debug, Clone)]
pub struct RelayedCall {
    /// Session ID chosen by the caller
    pub session_id: SessionId,
    /// Calling peer
    pub caller: PeerIdentity,
    /// Called peer
    pub answerer: PeerIdentity,
    /// Whether the answerer accepted
    pub answered: bool,
}

impl RelayedCall {
    fn involves(&self, id: &PeerIdentity) -> bool {
        self.caller == *id || self.answerer == *id
    }

    fn counterpart(&self, id: &PeerIdentity) -> &PeerIdentity {
        if self.caller == *id {
            &self.answerer
        } else {
            &self.caller
        }
    }
}

/// Outbound frames of each connection, mapped by connection ID
type Connections = Arc<DashMap<String, mpsc::UnboundedSender<Message>>>;

/// WebSocket rendezvous server: hands out identities and relays call signaling
#[derive(Debug, Clone)]
pub struct RendezvousServer {
    /// Address the server binds to
    pub bind_addr: SocketAddr,
    registrations: Arc<DashMap<PeerIdentity, Registration>>,
    connections: Connections,
    connection_peers: Arc<DashMap<String, PeerIdentity>>,
    calls: Arc<DashMap<SessionId, RelayedCall>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RendezvousServer {
    /// Create new rendezvous server
    pub fn new(bind_addr: SocketAddr) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bind_addr,
            registrations: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
            connection_peers: Arc::new(DashMap::new()),
            calls: Arc::new(DashMap::new()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Bind and serve until [`RendezvousServer::stop`] is called
    pub async fn start(&self) -> CamLinkResult<()> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            CamLinkError::ServerStartFailed {
                address: self.bind_addr,
                source: e.into(),
            }
        })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> CamLinkResult<()> {
        let local = listener.local_addr().unwrap_or(self.bind_addr);
        tracing::info!("🛰️ Rendezvous server listening on {}", local);

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("New connection from {}", addr);
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        tracing::info!("Rendezvous server on {} stopped accepting", local);
        Ok(())
    }

    /// Handle incoming WebSocket connection
    async fn handle_connection(&self, stream: TcpStream) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let connection_id = Uuid::new_v4().to_string();
        tracing::debug!("WebSocket connection established: {}", connection_id);

        let (mut sink, mut source) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.connections.insert(connection_id.clone(), tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if let Err(e) = self.handle_client_message(&connection_id, message) {
                            tracing::warn!("Failed to handle message: {}", e);
                            self.send_error(&connection_id, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Invalid message format: {}", e);
                        self.send_error(
                            &connection_id,
                            CamLinkError::InvalidMessage {
                                message: text,
                                source: e.into(),
                            },
                        );
                    }
                },
                Ok(Message::Close(_)) => {
                    tracing::debug!("Connection {} closed", connection_id);
                    break;
                }
                Err(e) => {
                    tracing::error!("WebSocket error on connection {}: {}", connection_id, e);
                    break;
                }
                // Binary, Ping, Pong
                Ok(_) => {}
            }
        }

        self.cleanup_connection(&connection_id);
        let _ = writer.await;
    }

    /// Handle a client message
    fn handle_client_message(
        &self,
        connection_id: &str,
        message: ClientMessage,
    ) -> CamLinkResult<()> {
        match message {
            ClientMessage::Register {
                desired_id,
                owner,
                resume,
            } => self.handle_register(connection_id, desired_id, owner, resume),
            ClientMessage::Unregister => {
                self.handle_unregister(connection_id);
                Ok(())
            }
            ClientMessage::Offer {
                session_id,
                target,
                stream,
            } => self.handle_offer(connection_id, session_id, target, stream),
            ClientMessage::Answer { session_id, stream } => {
                self.handle_answer(connection_id, session_id, stream)
            }
            ClientMessage::Reject { session_id, reason } => {
                self.handle_reject(connection_id, session_id, reason)
            }
            ClientMessage::Hangup { session_id } => self.handle_hangup(connection_id, session_id),
            ClientMessage::ReplaceTrack { session_id, track } => {
                self.handle_replace_track(connection_id, session_id, track)
            }
        }
    }

    /// Handle identity registration
    fn handle_register(
        &self,
        connection_id: &str,
        desired_id: Option<PeerIdentity>,
        owner: OwnerToken,
        resume: bool,
    ) -> CamLinkResult<()> {
        if let Some(held) = self.connection_peers.get(connection_id) {
            return Err(CamLinkError::Signaling {
                reason: format!("connection already registered as {}", *held),
            });
        }

        let id = desired_id.unwrap_or_else(|| PeerIdentity::new(Uuid::new_v4().to_string()));
        let registration = Registration {
            id: id.clone(),
            owner: owner.clone(),
            connection_id: connection_id.to_string(),
            registered_at: chrono::Utc::now(),
        };

        let stale_connection = match self.registrations.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let same_owner = entry.get().owner == owner;
                if !(resume && same_owner) {
                    drop(entry);
                    tracing::info!("Identifier {} unavailable (same owner: {})", id, same_owner);
                    self.send(
                        connection_id,
                        ServerMessage::registration_failed(&RegistrationError::IdUnavailable {
                            id,
                            same_owner,
                        }),
                    );
                    return Ok(());
                }
                let previous = entry.insert(registration);
                Some(previous.connection_id)
            }
            Entry::Vacant(entry) => {
                entry.insert(registration);
                None
            }
        };

        let resumed = stale_connection.is_some();
        if let Some(stale) = stale_connection {
            self.connection_peers.remove(&stale);
            self.end_calls_involving(&id, "peer re-registered");
            tracing::warn!("⚠️ {} resumed, evicting stale connection {}", id, stale);
        }

        self.connection_peers
            .insert(connection_id.to_string(), id.clone());
        self.send(
            connection_id,
            ServerMessage::Registered {
                id: id.clone(),
                resumed,
            },
        );

        tracing::info!("Peer {} registered on {}", id, connection_id);
        Ok(())
    }

    /// Handle identity release
    fn handle_unregister(&self, connection_id: &str) {
        if let Some((_, id)) = self.connection_peers.remove(connection_id) {
            self.release_identity(&id, connection_id, "peer unregistered");
            tracing::info!("Peer {} unregistered", id);
        }
    }

    /// Handle call offer
    fn handle_offer(
        &self,
        connection_id: &str,
        session_id: SessionId,
        target: PeerIdentity,
        stream: StreamDescriptor,
    ) -> CamLinkResult<()> {
        let caller = self.peer_of(connection_id)?;

        let target_connection = self
            .registrations
            .get(&target)
            .map(|registration| registration.connection_id.clone());
        let Some(target_connection) = target_connection else {
            tracing::debug!("Offer {} from {} to unknown peer {}", session_id, caller, target);
            self.send(connection_id, ServerMessage::PeerUnavailable { session_id, target });
            return Ok(());
        };

        self.calls.insert(
            session_id,
            RelayedCall {
                session_id,
                caller: caller.clone(),
                answerer: target.clone(),
                answered: false,
            },
        );
        self.send(
            &target_connection,
            ServerMessage::IncomingOffer {
                session_id,
                caller: caller.clone(),
                stream,
            },
        );

        tracing::debug!("📞 Relayed offer {} from {} to {}", session_id, caller, target);
        Ok(())
    }

    /// Handle call answer
    fn handle_answer(
        &self,
        connection_id: &str,
        session_id: SessionId,
        stream: StreamDescriptor,
    ) -> CamLinkResult<()> {
        let answerer = self.peer_of(connection_id)?;
        let caller = {
            let mut call = self
                .calls
                .get_mut(&session_id)
                .filter(|call| call.answerer == answerer)
                .ok_or_else(|| unknown_session(session_id))?;
            call.answered = true;
            call.caller.clone()
        };

        self.send_to_peer(&caller, ServerMessage::Answered { session_id, stream });
        tracing::info!("Call {} between {} and {} answered", session_id, caller, answerer);
        Ok(())
    }

    /// Handle call rejection
    fn handle_reject(
        &self,
        connection_id: &str,
        session_id: SessionId,
        reason: String,
    ) -> CamLinkResult<()> {
        let answerer = self.peer_of(connection_id)?;
        let (_, call) = self
            .calls
            .remove_if(&session_id, |_, call| call.answerer == answerer)
            .ok_or_else(|| unknown_session(session_id))?;

        self.send_to_peer(&call.caller, ServerMessage::Rejected { session_id, reason });
        Ok(())
    }

    /// Handle hang-up from either side
    fn handle_hangup(&self, connection_id: &str, session_id: SessionId) -> CamLinkResult<()> {
        let me = self.peer_of(connection_id)?;
        // Hang-up races are normal; an unknown session is already gone
        if let Some((_, call)) = self.calls.remove_if(&session_id, |_, call| call.involves(&me)) {
            self.send_to_peer(
                call.counterpart(&me),
                ServerMessage::HungUp {
                    session_id,
                    reason: None,
                },
            );
            tracing::debug!("Call {} hung up by {}", session_id, me);
        }
        Ok(())
    }

    /// Handle in-place track replacement
    fn handle_replace_track(
        &self,
        connection_id: &str,
        session_id: SessionId,
        track: TrackDescriptor,
    ) -> CamLinkResult<()> {
        let me = self.peer_of(connection_id)?;
        let remote = self
            .calls
            .get(&session_id)
            .filter(|call| call.involves(&me))
            .map(|call| call.counterpart(&me).clone())
            .ok_or_else(|| unknown_session(session_id))?;

        self.send_to_peer(&remote, ServerMessage::TrackReplaced { session_id, track });
        Ok(())
    }

    fn peer_of(&self, connection_id: &str) -> CamLinkResult<PeerIdentity> {
        self.connection_peers
            .get(connection_id)
            .map(|id| id.clone())
            .ok_or(CamLinkError::NotRegistered)
    }

    /// Drop `id` if still bound to `connection_id` and end its calls
    fn release_identity(&self, id: &PeerIdentity, connection_id: &str, reason: &str) {
        let removed = self
            .registrations
            .remove_if(id, |_, registration| {
                registration.connection_id == connection_id
            });
        if removed.is_some() {
            self.end_calls_involving(id, reason);
        }
    }

    /// End every call `id` takes part in, notifying the other side
    fn end_calls_involving(&self, id: &PeerIdentity, reason: &str) {
        let sessions: Vec<SessionId> = self
            .calls
            .iter()
            .filter(|entry| entry.value().involves(id))
            .map(|entry| *entry.key())
            .collect();

        for session_id in sessions {
            if let Some((_, call)) = self.calls.remove(&session_id) {
                self.send_to_peer(
                    call.counterpart(id),
                    ServerMessage::HungUp {
                        session_id,
                        reason: Some(reason.to_string()),
                    },
                );
            }
        }
    }

    /// Send message to the connection holding `id`
    fn send_to_peer(&self, id: &PeerIdentity, message: ServerMessage) {
        let connection_id = self
            .registrations
            .get(id)
            .map(|registration| registration.connection_id.clone());
        match connection_id {
            Some(connection_id) => self.send(&connection_id, message),
            None => tracing::debug!("Dropping message for unregistered peer {}", id),
        }
    }

    /// Send message to a specific connection
    fn send(&self, connection_id: &str, message: ServerMessage) {
        let text = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        if let Some(connection) = self.connections.get(connection_id) {
            if connection.send(Message::Text(text)).is_err() {
                tracing::debug!("Connection {} already closed", connection_id);
            }
        }
    }

    /// Send error to a specific connection
    fn send_error(&self, connection_id: &str, error: CamLinkError) {
        self.send(
            connection_id,
            ServerMessage::Error {
                error: error.to_string(),
                error_code: error.error_code(),
            },
        );
    }

    /// Cleanup connection and the identity bound to it
    fn cleanup_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);

        if let Some((_, id)) = self.connection_peers.remove(connection_id) {
            self.release_identity(&id, connection_id, "peer disconnected");
            tracing::info!("Peer {} disconnected", id);
        }
    }

    /// Stop the rendezvous server
    pub async fn stop(&self) -> CamLinkResult<()> {
        self.shutdown.send_replace(true);

        // Dropping the outbound senders closes every socket
        self.connections.clear();
        self.connection_peers.clear();
        self.registrations.clear();
        self.calls.clear();

        tracing::info!("Rendezvous server stopped");
        Ok(())
    }

    /// Current registrations (for monitoring/debugging)
    pub fn registered_peers(&self) -> Vec<Registration> {
        self.registrations
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Check whether `id` is registered
    pub fn is_registered(&self, id: &PeerIdentity) -> bool {
        self.registrations.contains_key(id)
    }

    /// Calls currently relayed
    pub fn active_calls(&self) -> Vec<RelayedCall> {
        self.calls.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

fn unknown_session(session_id: SessionId) -> CamLinkError {
    CamLinkError::Signaling {
        reason: format!("unknown session {}", session_id),
    }
}

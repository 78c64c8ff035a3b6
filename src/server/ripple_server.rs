//! QUIC chat server implementation
//!
//! This module provides the main server that accepts connections, registers
//! participants, and wires connection events into the store, the fan-out
//! router, the snapshot loader and the moderation trigger.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, error, info, warn};

use crate::current_timestamp;
use crate::error::{Result, RippleError};
use crate::generate_post_id;
use crate::matching::MatchMode;
use crate::protocol::messages::{Error as ErrorMessage, Post, SettingsUpdate, VoteType};
use crate::registry::ParticipantRegistry;
use crate::server::connection::{ConnectionCommand, ConnectionHandler, ServerEvent};
use crate::server::moderation::{DEFAULT_DOWNVOTE_THRESHOLD, ModerationTrigger};
use crate::server::router::FanoutRouter;
use crate::server::snapshot::SnapshotLoader;
use crate::store::{PostStore, VoteAction};

use tokio::sync::mpsc;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Most recent posts fetched per snapshot
    pub snapshot_limit: usize,
    /// Delay between registration and the initial snapshot, giving the
    /// client's first settings update time to arrive
    pub snapshot_delay: Duration,
    /// Distinct downvoters required to auto-remove a post
    pub downvote_threshold: u64,
    /// Filter posts by location radius in addition to channel
    pub geofence: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 10000,
            idle_timeout: Duration::from_secs(300),
            snapshot_limit: 100,
            snapshot_delay: Duration::from_millis(500),
            downvote_threshold: DEFAULT_DOWNVOTE_THRESHOLD,
            geofence: false,
        }
    }
}

/// QUIC chat server
pub struct RippleServer {
    /// Server configuration
    config: ServerConfig,
    /// QUIC endpoint
    endpoint: Option<Endpoint>,
    /// Membership registry
    registry: Arc<ParticipantRegistry>,
    /// Post/vote persistence
    store: Arc<dyn PostStore>,
    /// Fan-out router
    router: Arc<FanoutRouter>,
    /// Snapshot loader
    snapshots: Arc<SnapshotLoader>,
    /// Moderation trigger
    moderation: Arc<ModerationTrigger>,
}

impl RippleServer {
    /// Create a new server over the given store
    pub fn new(config: ServerConfig, store: Arc<dyn PostStore>) -> Self {
        let mode = if config.geofence {
            MatchMode::Geofenced
        } else {
            MatchMode::ChannelOnly
        };

        let registry = Arc::new(ParticipantRegistry::new());
        let router = Arc::new(FanoutRouter::new(Arc::clone(&registry), mode));
        let snapshots = Arc::new(SnapshotLoader::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            mode,
            config.snapshot_limit,
        ));
        let moderation = Arc::new(ModerationTrigger::new(
            Arc::clone(&store),
            Arc::clone(&router),
            config.downvote_threshold,
        ));

        Self {
            config,
            endpoint: None,
            registry,
            store,
            router,
            snapshots,
            moderation,
        }
    }

    /// Get the membership registry
    pub fn registry(&self) -> Arc<ParticipantRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the fan-out router
    pub fn router(&self) -> Arc<FanoutRouter> {
        Arc::clone(&self.router)
    }

    /// Get the post store
    pub fn store(&self) -> Arc<dyn PostStore> {
        Arc::clone(&self.store)
    }

    /// Start the server
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting chat server on {}", self.config.bind_addr);

        // Generate self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| RippleError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(cert.serialize_der().map_err(|e| {
            RippleError::config(format!("Failed to serialize certificate: {}", e))
        })?);
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        // Configure rustls
        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| RippleError::config(format!("Failed to configure TLS: {}", e)))?;

        server_config.alpn_protocols = vec![b"ripple".to_vec()];
        server_config.max_early_data_size = 0;

        // Configure QUIC
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(16u32.into());
        transport_config.max_idle_timeout(Some(
            self.config
                .idle_timeout
                .try_into()
                .map_err(|_| RippleError::config("Idle timeout out of range"))?,
        ));

        let mut quic_server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_config)
                .map_err(|e| RippleError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_server_config.transport_config(Arc::new(transport_config));

        // Create endpoint
        let endpoint = Endpoint::server(quic_server_config, self.config.bind_addr)
            .map_err(|e| RippleError::network(format!("Failed to create endpoint: {}", e)))?;

        info!("Server listening on {}", endpoint.local_addr()?);

        self.endpoint = Some(endpoint.clone());

        // Accept connections
        self.accept_connections(endpoint).await
    }

    /// Accept incoming connections
    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    // Check connection limit
                    if self.registry.len().await >= self.config.max_connections {
                        warn!("Connection limit reached, rejecting connection");
                        incoming.refuse();
                        continue;
                    }

                    // Spawn connection handler
                    let server = self.clone_ref();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_incoming(incoming).await {
                            error!("Connection handling failed: {}", e);
                        }
                    });
                }
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle an incoming connection
    async fn handle_incoming(&self, incoming: quinn::Incoming) -> Result<()> {
        let connection = incoming.await?;
        let remote_addr = connection.remote_address();
        let conn_id = uuid::Uuid::new_v4().to_string();

        debug!("New connection {} from {}", conn_id, remote_addr);

        // Create channels for this connection
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        // Register the participant with defaults; settings follow from the client
        let participant = self.registry.register(&conn_id, command_tx).await;

        // Create connection handler
        let handler = Arc::new(ConnectionHandler::new(
            connection,
            participant.session_id.clone(),
            event_tx,
            command_rx,
        ));

        // Spawn handler task
        let handler_task = tokio::spawn(handler.run());

        // Schedule the initial snapshot after a short fixed delay, so an
        // immediate settings update from the client lands first
        {
            let snapshots = Arc::clone(&self.snapshots);
            let delay = self.config.snapshot_delay;
            let snapshot_conn = conn_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = snapshots.load_for(&snapshot_conn).await;
            });
        }

        // Spawn event processor task
        let conn_id_clone = conn_id.clone();
        let server = self.clone_ref();
        let event_task = tokio::spawn(async move {
            server.process_events(conn_id_clone, event_rx).await;
        });

        // Wait for either task to complete
        tokio::select! {
            result = handler_task => {
                if let Err(e) = result {
                    error!("Handler task error: {}", e);
                }
            }
            _ = event_task => {}
        }

        // Clean up connection
        self.cleanup_connection(&conn_id).await;

        Ok(())
    }

    /// Process events from a connection
    async fn process_events(
        &self,
        conn_id: String,
        mut event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = self.handle_event(&conn_id, event).await {
                warn!("Event handling error for {}: {}", conn_id, e);
            }
        }
    }

    /// Handle a single event from a connection
    async fn handle_event(&self, conn_id: &str, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::UpdateSettings(settings) => {
                self.handle_update_settings(conn_id, settings).await?;
            }

            ServerEvent::SendMessage { message, image } => {
                self.handle_send_message(conn_id, message, image).await?;
            }

            ServerEvent::CastVote { post_id, vote_type } => {
                self.handle_cast_vote(conn_id, post_id, vote_type).await?;
            }

            ServerEvent::Disconnected { reason } => {
                debug!("Connection {} disconnected: {}", conn_id, reason);
            }
        }

        Ok(())
    }

    /// Handle a settings update
    async fn handle_update_settings(
        &self,
        conn_id: &str,
        settings: SettingsUpdate,
    ) -> Result<()> {
        match self.registry.update(conn_id, &settings).await {
            Some((participant, true)) => {
                debug!(
                    "Connection {} moved to channel '{}', refreshing snapshot",
                    conn_id, participant.channel
                );
                // A failed refresh only affects this participant's view
                let _ = self.snapshots.load_for(conn_id).await;
            }
            Some((_, false)) => {}
            None => {
                // Settings update raced a disconnect
                debug!("Settings update for unregistered connection {}", conn_id);
            }
        }

        Ok(())
    }

    /// Handle a new post from a participant
    async fn handle_send_message(
        &self,
        conn_id: &str,
        message: String,
        image: Option<String>,
    ) -> Result<()> {
        let participant = match self.registry.get(conn_id).await {
            Some(p) => p,
            None => {
                debug!("Post from unregistered connection {}", conn_id);
                return Ok(());
            }
        };

        // In geofenced mode a participant must share a location before posting
        let (latitude, longitude) = match self.router.mode() {
            MatchMode::Geofenced => match participant.location() {
                Some(location) => (location.latitude, location.longitude),
                None => {
                    self.send_error_to(
                        conn_id,
                        &RippleError::invalid_message("A location is required before posting"),
                    )
                    .await;
                    return Ok(());
                }
            },
            MatchMode::ChannelOnly => (0.0, 0.0),
        };

        // Snapshot the author identity at send time; later display name
        // changes must not retroactively alter this post
        let post = Post {
            id: generate_post_id(),
            session_id: participant.session_id.clone(),
            display_name: participant.display_name.clone(),
            message,
            image,
            channel: participant.channel.clone(),
            latitude,
            longitude,
            timestamp: current_timestamp(),
        };

        if let Err(e) = self.store.create_post(&post).await {
            warn!("Failed to persist post from {}: {:#}", conn_id, e);
            self.send_error_to(conn_id, &RippleError::from(e)).await;
            return Ok(());
        }

        debug!(
            "Post {} from {} in channel '{}'",
            post.id, post.display_name, post.channel
        );
        self.router.broadcast_new_post(&post).await;

        Ok(())
    }

    /// Handle a vote from a participant
    async fn handle_cast_vote(
        &self,
        conn_id: &str,
        post_id: String,
        vote_type: VoteType,
    ) -> Result<()> {
        let participant = match self.registry.get(conn_id).await {
            Some(p) => p,
            None => {
                debug!("Vote from unregistered connection {}", conn_id);
                return Ok(());
            }
        };

        let action = match self
            .store
            .add_vote(&post_id, &participant.session_id, vote_type)
            .await
        {
            Ok(action) => action,
            Err(e) => {
                warn!("Failed to record vote on {}: {:#}", post_id, e);
                self.send_error_to(conn_id, &RippleError::from(e)).await;
                return Ok(());
            }
        };

        // Vote tallies go to every connection, regardless of channel
        match self.store.post_vote_counts(&post_id).await {
            Ok(counts) => self.router.broadcast_vote_update(&post_id, counts).await,
            Err(e) => {
                warn!("Failed to count votes on {}: {:#}", post_id, e);
                self.send_error_to(conn_id, &RippleError::from(e)).await;
                return Ok(());
            }
        }

        // Only a vote that is a downvote after this call can breach the
        // threshold; a toggled-off downvote cannot
        if vote_type == VoteType::Down && action != VoteAction::Removed {
            if let Err(e) = self.moderation.handle_downvote(&post_id).await {
                self.send_error_to(conn_id, &e).await;
            }
        }

        Ok(())
    }

    /// Best-effort error notification to one connection
    async fn send_error_to(&self, conn_id: &str, err: &RippleError) {
        if let Some(outbox) = self.registry.outbox(conn_id).await {
            let _ = outbox.send(ConnectionCommand::SendError(ErrorMessage::new(
                err.code(),
                err.message().to_string(),
            )));
        }
    }

    /// Clean up a disconnected connection
    async fn cleanup_connection(&self, conn_id: &str) {
        if self.registry.deregister(conn_id).await.is_some() {
            debug!("Cleaned up connection {}", conn_id);
        }
    }

    /// Shutdown the server
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(endpoint) = self.endpoint.take() {
            for (_, outbox) in self.registry.snapshot().await {
                let _ = outbox.send(ConnectionCommand::Close("Server shutdown".to_string()));
            }

            endpoint.close(0u32.into(), b"Server shutdown");
            info!("Server shutdown complete");
        }
        Ok(())
    }

    /// Clone reference for spawning tasks
    fn clone_ref(&self) -> Arc<Self> {
        Arc::new(Self {
            config: self.config.clone(),
            endpoint: self.endpoint.clone(),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            router: Arc::clone(&self.router),
            snapshots: Arc::clone(&self.snapshots),
            moderation: Arc::clone(&self.moderation),
        })
    }
}

//! QUIC chat client implementation
//!
//! This module provides a client for connecting to the chat server, updating
//! settings, sending posts and votes, and receiving real-time updates.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, SendStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use crate::error::{Result, RippleError};
use crate::protocol::codec::{DecodedMessage, Encodable};
use crate::protocol::frame::FrameCodec;
use crate::protocol::messages::{
    CastVote, Error as ErrorMessage, Goodbye, Hello, MessageDeleted, Pong, Post, SendMessage,
    SettingsUpdate, VoteType, VoteUpdate,
};

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum message size in bytes
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

/// Events that the client can receive
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake completed; the server assigned this session identity
    Connected { session_id: String },
    /// Disconnected from server
    Disconnected(String),
    /// Full snapshot of visible history; replaces any rendered posts
    Snapshot(Vec<Post>),
    /// A live post matching the client's settings
    NewPost(Post),
    /// Vote tally change for a post
    VoteUpdate(VoteUpdate),
    /// A post was deleted
    MessageDeleted(MessageDeleted),
    /// Error reported by the server
    ServerError(ErrorMessage),
}

/// QUIC chat client
pub struct RippleClient {
    config: ClientConfig,
    connection: Option<Connection>,
    endpoint: Option<Endpoint>,
    control_send: Option<Arc<Mutex<SendStream>>>,
    event_tx: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl RippleClient {
    /// Create a new chat client with the given configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: None,
            endpoint: None,
            control_send: None,
            event_tx: None,
        }
    }

    /// Connect to the chat server and start the handshake.
    ///
    /// The returned receiver yields a `Connected` event once the server
    /// acknowledges the handshake, followed by snapshots and live events.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("Connecting to chat server at {}", self.config.server_addr);

        // Configure client
        let client_config = self.configure_client()?;

        // Create endpoint
        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| RippleError::network(format!("Failed to create endpoint: {}", e)))?;

        endpoint.set_default_client_config(client_config);
        self.endpoint = Some(endpoint.clone());

        // Connect to server
        let connecting = endpoint
            .connect(self.config.server_addr, "localhost")
            .map_err(|e| RippleError::connection(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| RippleError::timeout("Connection timeout"))?
        .map_err(|e| RippleError::connection(format!("Failed to connect: {}", e)))?;

        info!("Successfully connected to server");
        self.connection = Some(connection.clone());

        // Open the control stream and say hello
        let (mut send, recv) = connection.open_bi().await?;
        let hello = Hello::default();
        let frame = hello
            .encode_frame()
            .map_err(|e| RippleError::serialization(format!("Failed to encode Hello: {}", e)))?;
        send.write_all(&frame.encode_to_bytes()).await?;

        let control_send = Arc::new(Mutex::new(send));
        self.control_send = Some(Arc::clone(&control_send));

        // Set up event channel and start the receiver
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.event_tx = Some(event_tx.clone());

        self.start_receiver(recv, control_send, event_tx);

        Ok(event_rx)
    }

    /// Configure the QUIC client
    fn configure_client(&self) -> Result<QuinnClientConfig> {
        // Create a custom certificate verifier that accepts self-signed certificates
        // WARNING: This is insecure and should only be used for development/testing
        let mut crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        // Set ALPN protocol to match server
        crypto.alpn_protocols = vec![b"ripple".to_vec()];

        Ok(QuinnClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| RippleError::config(format!("Failed to create QUIC config: {}", e)))?,
        )))
    }

    /// Spawn the task that turns incoming frames into client events
    fn start_receiver(
        &self,
        mut recv: quinn::RecvStream,
        control_send: Arc<Mutex<SendStream>>,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
    ) {
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = vec![0u8; 4096];

            loop {
                match recv.read(&mut buf).await {
                    Ok(Some(n)) => {
                        codec.feed(&buf[..n]);

                        loop {
                            match codec.decode_next() {
                                Ok(Some(frame)) => {
                                    match DecodedMessage::decode(&frame) {
                                        Ok(message) => {
                                            Self::dispatch(message, &control_send, &event_tx)
                                                .await;
                                        }
                                        Err(e) => {
                                            error!("Failed to parse frame: {}", e);
                                        }
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    error!("Frame decode error: {}", e);
                                    let _ = event_tx.send(ClientEvent::Disconnected(format!(
                                        "Protocol error: {}",
                                        e
                                    )));
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected("Stream closed".to_string()));
                        break;
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected(format!("Connection lost: {}", e)));
                        break;
                    }
                }
            }
        });
    }

    /// Map one decoded server frame to a client event
    async fn dispatch(
        message: DecodedMessage,
        control_send: &Arc<Mutex<SendStream>>,
        event_tx: &mpsc::UnboundedSender<ClientEvent>,
    ) {
        match message {
            DecodedMessage::HelloAck(ack) => {
                debug!("Handshake complete, session {}", ack.session_id);
                let _ = event_tx.send(ClientEvent::Connected {
                    session_id: ack.session_id,
                });
            }
            DecodedMessage::Posts(snapshot) => {
                let _ = event_tx.send(ClientEvent::Snapshot(snapshot.posts));
            }
            DecodedMessage::NewPost(post) => {
                let _ = event_tx.send(ClientEvent::NewPost(post));
            }
            DecodedMessage::VoteUpdate(update) => {
                let _ = event_tx.send(ClientEvent::VoteUpdate(update));
            }
            DecodedMessage::MessageDeleted(deleted) => {
                let _ = event_tx.send(ClientEvent::MessageDeleted(deleted));
            }
            DecodedMessage::Error(err) => {
                let _ = event_tx.send(ClientEvent::ServerError(err));
            }
            DecodedMessage::Ping(ping) => {
                // Keepalive from the server; answer on the control stream
                let pong = Pong {
                    timestamp: ping.timestamp,
                };
                if let Ok(frame) = pong.encode_frame() {
                    let mut send = control_send.lock().await;
                    if let Err(e) = send.write_all(&frame.encode_to_bytes()).await {
                        debug!("Failed to answer ping: {}", e);
                    }
                }
            }
            DecodedMessage::Pong(_) => {}
            other => {
                debug!("Ignoring unexpected frame {:?}", other.frame_type());
            }
        }
    }

    /// Send a partial settings update
    pub async fn update_settings(&self, settings: SettingsUpdate) -> Result<()> {
        self.send_frame(&settings).await
    }

    /// Send a post to the current channel
    pub async fn send_message(&self, message: String, image: Option<String>) -> Result<()> {
        self.send_frame(&SendMessage { message, image }).await
    }

    /// Cast a vote on a post
    pub async fn cast_vote(&self, post_id: impl Into<String>, vote_type: VoteType) -> Result<()> {
        self.send_frame(&CastVote {
            post_id: post_id.into(),
            vote_type,
        })
        .await
    }

    /// Encode and write one frame to the control stream
    async fn send_frame<T: Encodable>(&self, msg: &T) -> Result<()> {
        let control_send = self
            .control_send
            .as_ref()
            .ok_or_else(|| RippleError::connection("Not connected to server"))?;

        let frame = msg
            .encode_frame()
            .map_err(|e| RippleError::serialization(format!("Failed to encode frame: {}", e)))?;

        let mut send = control_send.lock().await;
        send.write_all(&frame.encode_to_bytes()).await?;
        Ok(())
    }

    /// Disconnect from the chat server
    pub async fn disconnect(&mut self) -> Result<()> {
        // Best-effort goodbye before closing
        if self.control_send.is_some() {
            let _ = self
                .send_frame(&Goodbye {
                    reason: "client disconnect".to_string(),
                })
                .await;
        }

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"Client disconnect");
            info!("Disconnected from chat server");
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"Client shutdown");
        }

        self.control_send = None;
        self.event_tx = None;

        Ok(())
    }

    /// Check if connected to server
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Get connection statistics
    pub fn connection_stats(&self) -> Option<ConnectionStats> {
        self.connection.as_ref().map(|conn| {
            let stats = conn.stats();
            ConnectionStats {
                bytes_sent: stats.udp_tx.bytes,
                bytes_received: stats.udp_rx.bytes,
                packets_sent: stats.udp_tx.datagrams,
                packets_received: stats.udp_rx.datagrams,
                round_trip_time: stats.path.rtt,
            }
        })
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub round_trip_time: std::time::Duration,
}

/// Custom certificate verifier that accepts any certificate (INSECURE - for development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}

//! Per-connection handler for the chat server
//!
//! Manages one client connection: the protocol handshake, the control stream
//! carrying every inbound command and outbound event, and the keepalive loop.

use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::error::{Result, RippleError};
use crate::protocol::codec::{Decodable, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::*;

/// Events emitted by the connection handler to the server
#[derive(Debug)]
pub enum ServerEvent {
    /// Client updated its settings
    UpdateSettings(SettingsUpdate),

    /// Client sent a post
    SendMessage {
        message: String,
        image: Option<String>,
    },

    /// Client cast a vote
    CastVote {
        post_id: String,
        vote_type: VoteType,
    },

    /// Client disconnected
    Disconnected { reason: String },
}

/// Commands that can be sent to the connection handler
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Send a full post snapshot to this client
    SendPosts(Posts),

    /// Send a freshly broadcast post
    SendNewPost(Post),

    /// Send a vote tally change
    SendVoteUpdate(VoteUpdate),

    /// Send a post deletion notification
    SendMessageDeleted(MessageDeleted),

    /// Send an error notification
    SendError(Error),

    /// Close the connection
    Close(String),
}

/// State of the connection handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for Hello from client
    AwaitingHello,
    /// Hello received and acknowledged; commands are accepted
    Ready,
}

/// Per-connection handler that manages the control stream and protocol
pub struct ConnectionHandler {
    /// Underlying QUIC connection
    connection: Connection,

    /// Session ID assigned at registration, echoed to the client in HelloAck
    session_id: String,

    /// Handshake state
    handshake_state: RwLock<HandshakeState>,

    /// Channel for sending events to the server
    event_tx: mpsc::UnboundedSender<ServerEvent>,

    /// Channel for receiving commands from the server
    command_rx: RwLock<Option<mpsc::UnboundedReceiver<ConnectionCommand>>>,

    /// Control stream sender
    control_send: RwLock<Option<SendStream>>,

    /// Connection creation time
    created_at: Instant,

    /// Last activity timestamp
    last_activity: RwLock<Instant>,

    /// Ping timestamp for RTT calculation
    last_ping_time: RwLock<Option<Instant>>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(
        connection: Connection,
        session_id: String,
        event_tx: mpsc::UnboundedSender<ServerEvent>,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Self {
        Self {
            connection,
            session_id,
            handshake_state: RwLock::new(HandshakeState::AwaitingHello),
            event_tx,
            command_rx: RwLock::new(Some(command_rx)),
            control_send: RwLock::new(None),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            last_ping_time: RwLock::new(None),
        }
    }

    /// Get the remote address
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Check if the handshake completed
    pub async fn is_ready(&self) -> bool {
        *self.handshake_state.read().await == HandshakeState::Ready
    }

    /// Get connection uptime
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Update last activity
    async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Run the connection handler
    /// This is the main entry point that should be spawned as a task
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.remote_address();
        info!("New connection from {}", addr);

        let result = self.accept_and_run(Arc::clone(&self)).await;

        let reason = match &result {
            Ok(()) => "normal".to_string(),
            Err(e) => e.to_string(),
        };

        let _ = self.event_tx.send(ServerEvent::Disconnected { reason });

        info!("Connection from {} closed", addr);
        result
    }

    /// Accept the control stream and run the receive/command/ping loops
    async fn accept_and_run(self: &Arc<Self>, handler: Arc<Self>) -> Result<()> {
        // Accept the control bidirectional stream from the client
        let (send, recv) = self.connection.accept_bi().await.map_err(|e| {
            RippleError::connection(format!("Failed to accept control stream: {}", e))
        })?;

        {
            let mut control = self.control_send.write().await;
            *control = Some(send);
        }

        debug!("Control stream accepted from {}", self.remote_address());

        // Spawn control stream receiver
        let recv_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = h.handle_control_stream(recv).await {
                    debug!("Control stream ended: {}", e);
                }
            })
        };

        // Spawn command handler
        let cmd_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.handle_commands().await;
            })
        };

        // Spawn ping task
        let ping_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.ping_loop().await;
            })
        };

        // Wait for any task to complete (usually means disconnect)
        tokio::select! {
            _ = recv_handle => {},
            _ = cmd_handle => {},
            _ = ping_handle => {},
        }

        Ok(())
    }

    /// Handle incoming frames on the control stream
    async fn handle_control_stream(self: &Arc<Self>, mut recv: RecvStream) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            match recv.read(&mut buf).await {
                Ok(Some(n)) => {
                    self.touch().await;
                    codec.feed(&buf[..n]);

                    // Process all available frames
                    loop {
                        match codec.decode_next() {
                            Ok(Some(frame)) => {
                                if let Err(e) = self.handle_control_frame(frame).await {
                                    warn!("Error handling control frame: {}", e);
                                    self.send_error(e).await?;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                return Err(RippleError::protocol(format!(
                                    "Frame decode error: {}",
                                    e
                                )));
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!("Control stream finished");
                    break;
                }
                Err(e) => {
                    return Err(RippleError::network(format!(
                        "Control stream read error: {}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Handle a single control frame
    async fn handle_control_frame(&self, frame: Frame) -> Result<()> {
        let state = *self.handshake_state.read().await;

        match (state, frame.frame_type) {
            // Handshake: Hello
            (HandshakeState::AwaitingHello, FrameType::Hello) => {
                let hello = Hello::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid Hello: {}", e)))?;

                debug!(
                    "Received Hello v{} with caps: {:?}",
                    hello.version, hello.capabilities
                );

                let hello_ack = HelloAck {
                    version: PROTOCOL_VERSION,
                    session_id: self.session_id.clone(),
                };
                self.send_control_frame(&hello_ack).await?;

                *self.handshake_state.write().await = HandshakeState::Ready;
                debug!("Sent HelloAck, connection ready");
            }

            // Ping/Pong
            (HandshakeState::Ready, FrameType::Ping) => {
                let ping = Ping::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid Ping: {}", e)))?;

                let pong = Pong {
                    timestamp: ping.timestamp,
                };
                self.send_control_frame(&pong).await?;
            }

            (HandshakeState::Ready, FrameType::Pong) => {
                let _pong = Pong::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid Pong: {}", e)))?;

                if let Some(ping_time) = *self.last_ping_time.read().await {
                    let rtt = ping_time.elapsed();
                    debug!("RTT: {:?}", rtt);
                }
            }

            // Client commands
            (HandshakeState::Ready, FrameType::UpdateSettings) => {
                let settings = SettingsUpdate::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid UpdateSettings: {}", e)))?;

                let _ = self.event_tx.send(ServerEvent::UpdateSettings(settings));
            }

            (HandshakeState::Ready, FrameType::SendMessage) => {
                let msg = SendMessage::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid SendMessage: {}", e)))?;

                let _ = self.event_tx.send(ServerEvent::SendMessage {
                    message: msg.message,
                    image: msg.image,
                });
            }

            (HandshakeState::Ready, FrameType::CastVote) => {
                let vote = CastVote::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid CastVote: {}", e)))?;

                let _ = self.event_tx.send(ServerEvent::CastVote {
                    post_id: vote.post_id,
                    vote_type: vote.vote_type,
                });
            }

            // Goodbye
            (_, FrameType::Goodbye) => {
                let goodbye = Goodbye::decode_frame(&frame)
                    .map_err(|e| RippleError::protocol(format!("Invalid Goodbye: {}", e)))?;

                info!("Client sent Goodbye: {}", goodbye.reason);
                self.connection.close(0u32.into(), goodbye.reason.as_bytes());
            }

            // Invalid state/frame combination
            (state, frame_type) => {
                warn!("Unexpected frame {:?} in state {:?}", frame_type, state);
                return Err(RippleError::protocol(format!(
                    "Unexpected frame {:?} in state {:?}",
                    frame_type, state
                )));
            }
        }

        Ok(())
    }

    /// Handle commands from the server
    async fn handle_commands(self: &Arc<Self>) {
        let rx = self.command_rx.write().await.take();
        if rx.is_none() {
            return;
        }
        let mut rx = rx.unwrap();

        while let Some(cmd) = rx.recv().await {
            if let Err(e) = self.handle_command(cmd).await {
                warn!("Command handling error: {}", e);
            }
        }
    }

    /// Handle a single command
    async fn handle_command(&self, cmd: ConnectionCommand) -> Result<()> {
        match cmd {
            ConnectionCommand::SendPosts(msg) => {
                self.send_control_frame(&msg).await?;
            }
            ConnectionCommand::SendNewPost(msg) => {
                self.send_control_frame(&msg).await?;
            }
            ConnectionCommand::SendVoteUpdate(msg) => {
                self.send_control_frame(&msg).await?;
            }
            ConnectionCommand::SendMessageDeleted(msg) => {
                self.send_control_frame(&msg).await?;
            }
            ConnectionCommand::SendError(msg) => {
                self.send_control_frame(&msg).await?;
            }
            ConnectionCommand::Close(reason) => {
                self.connection.close(0u32.into(), reason.as_bytes());
            }
        }

        Ok(())
    }

    /// Send a frame on the control stream
    async fn send_control_frame<T: Encodable>(&self, msg: &T) -> Result<()> {
        let frame = msg
            .encode_frame()
            .map_err(|e| RippleError::serialization(format!("Failed to encode frame: {}", e)))?;

        let mut control = self.control_send.write().await;
        if let Some(send) = control.as_mut() {
            let data = frame.encode_to_bytes();
            send.write_all(&data).await.map_err(|e| {
                RippleError::network(format!("Failed to write to control stream: {}", e))
            })?;
        } else {
            return Err(RippleError::connection("Control stream not open"));
        }

        Ok(())
    }

    /// Send an error frame
    async fn send_error(&self, error: RippleError) -> Result<()> {
        let err = Error::new(error.code(), error.message().to_string());
        self.send_control_frame(&err).await
    }

    /// Ping loop for keepalive
    async fn ping_loop(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;

            if !self.is_ready().await {
                continue;
            }

            let ping = Ping {
                timestamp: current_timestamp(),
            };

            *self.last_ping_time.write().await = Some(Instant::now());

            if let Err(e) = self.send_control_frame(&ping).await {
                debug!("Failed to send ping: {}", e);
                break;
            }
        }
    }
}

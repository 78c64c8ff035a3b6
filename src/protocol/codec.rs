//! Codec for encoding/decoding protocol messages to/from frames
//!
//! This module provides the bridge between typed messages and binary frames.

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for a message type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Hello, FrameType::Hello);
impl_codec!(HelloAck, FrameType::HelloAck);
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);
impl_codec!(Goodbye, FrameType::Goodbye);

// Client commands
impl_codec!(SettingsUpdate, FrameType::UpdateSettings);
impl_codec!(SendMessage, FrameType::SendMessage);
impl_codec!(CastVote, FrameType::CastVote);

// Server events
impl_codec!(Posts, FrameType::Posts);
impl_codec!(Post, FrameType::NewPost);
impl_codec!(VoteUpdate, FrameType::VoteUpdate);
impl_codec!(MessageDeleted, FrameType::MessageDeleted);

// Error message
impl_codec!(Error, FrameType::Error);

/// Decode any frame into a typed message enum
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    // Control
    Hello(Hello),
    HelloAck(HelloAck),
    Ping(Ping),
    Pong(Pong),
    Goodbye(Goodbye),

    // Client commands
    UpdateSettings(SettingsUpdate),
    SendMessage(SendMessage),
    CastVote(CastVote),

    // Server events
    Posts(Posts),
    NewPost(Post),
    VoteUpdate(VoteUpdate),
    MessageDeleted(MessageDeleted),

    // Error
    Error(Error),
}

impl DecodedMessage {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        let payload = &frame.payload;

        match frame.frame_type {
            FrameType::Hello => Ok(Self::Hello(serde_json::from_slice(payload)?)),
            FrameType::HelloAck => Ok(Self::HelloAck(serde_json::from_slice(payload)?)),
            FrameType::Ping => Ok(Self::Ping(serde_json::from_slice(payload)?)),
            FrameType::Pong => Ok(Self::Pong(serde_json::from_slice(payload)?)),
            FrameType::Goodbye => Ok(Self::Goodbye(serde_json::from_slice(payload)?)),

            FrameType::UpdateSettings => {
                Ok(Self::UpdateSettings(serde_json::from_slice(payload)?))
            }
            FrameType::SendMessage => Ok(Self::SendMessage(serde_json::from_slice(payload)?)),
            FrameType::CastVote => Ok(Self::CastVote(serde_json::from_slice(payload)?)),

            FrameType::Posts => Ok(Self::Posts(serde_json::from_slice(payload)?)),
            FrameType::NewPost => Ok(Self::NewPost(serde_json::from_slice(payload)?)),
            FrameType::VoteUpdate => Ok(Self::VoteUpdate(serde_json::from_slice(payload)?)),
            FrameType::MessageDeleted => {
                Ok(Self::MessageDeleted(serde_json::from_slice(payload)?))
            }

            FrameType::Error => Ok(Self::Error(serde_json::from_slice(payload)?)),
        }
    }

    /// Get the frame type of this message
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello(_) => FrameType::Hello,
            Self::HelloAck(_) => FrameType::HelloAck,
            Self::Ping(_) => FrameType::Ping,
            Self::Pong(_) => FrameType::Pong,
            Self::Goodbye(_) => FrameType::Goodbye,
            Self::UpdateSettings(_) => FrameType::UpdateSettings,
            Self::SendMessage(_) => FrameType::SendMessage,
            Self::CastVote(_) => FrameType::CastVote,
            Self::Posts(_) => FrameType::Posts,
            Self::NewPost(_) => FrameType::NewPost,
            Self::VoteUpdate(_) => FrameType::VoteUpdate,
            Self::MessageDeleted(_) => FrameType::MessageDeleted,
            Self::Error(_) => FrameType::Error,
        }
    }

    /// Check if this is a control message
    pub fn is_control(&self) -> bool {
        self.frame_type().is_control()
    }

    /// Check if this is a client command
    pub fn is_client_command(&self) -> bool {
        self.frame_type().is_client_command()
    }

    /// Check if this is a server-pushed event
    pub fn is_server_event(&self) -> bool {
        self.frame_type().is_server_event()
    }
}

/// Encode a message directly to bytes (convenience function)
pub fn encode<T: Encodable>(msg: &T) -> io::Result<Bytes> {
    msg.encode_frame().map(|f| f.encode_to_bytes())
}

/// Decode a frame to a specific message type (convenience function)
pub fn decode<T: Decodable>(frame: &Frame) -> io::Result<T> {
    T::decode_frame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = SendMessage {
            message: "Hello, World!".to_string(),
            image: None,
        };

        let frame = original.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::SendMessage);

        let decoded = SendMessage::decode_frame(&frame).unwrap();
        assert_eq!(original.message, decoded.message);
        assert_eq!(original.image, decoded.image);
    }

    #[test]
    fn test_decoded_message_enum() {
        let msg = Ping { timestamp: 12345 };
        let frame = msg.encode_frame().unwrap();

        let decoded = DecodedMessage::decode(&frame).unwrap();
        assert!(decoded.is_control());

        match decoded {
            DecodedMessage::Ping(ping) => {
                assert_eq!(ping.timestamp, 12345);
            }
            _ => panic!("Expected Ping message"),
        }
    }

    #[test]
    fn test_wrong_frame_type() {
        let msg = Ping { timestamp: 12345 };
        let frame = msg.encode_frame().unwrap();

        // Try to decode as Pong (wrong type)
        let result = Pong::decode_frame(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_helper() {
        let msg = Hello::default();
        let bytes = encode(&msg).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_error_message_encoding() {
        let err = Error::new(1006, "datastore unavailable");
        let frame = err.encode_frame().unwrap();

        let decoded = Error::decode_frame(&frame).unwrap();
        assert_eq!(decoded.code, 1006);
        assert_eq!(decoded.message, "datastore unavailable");
    }

    #[test]
    fn test_post_encoding() {
        let post = Post {
            id: "abc-123".to_string(),
            session_id: "session-1".to_string(),
            display_name: "Anonymous".to_string(),
            message: "Test message".to_string(),
            image: Some("blob://42".to_string()),
            channel: "general".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timestamp: 1234567890,
        };

        let frame = post.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::NewPost);

        let decoded = Post::decode_frame(&frame).unwrap();
        assert_eq!(decoded.id, "abc-123");
        assert_eq!(decoded.image.as_deref(), Some("blob://42"));
        assert_eq!(decoded.channel, "general");
    }

    #[test]
    fn test_cast_vote_roundtrip() {
        let vote = CastVote {
            post_id: "p-9".to_string(),
            vote_type: VoteType::Down,
        };

        let frame = vote.encode_frame().unwrap();
        let decoded = CastVote::decode_frame(&frame).unwrap();
        assert_eq!(decoded.post_id, "p-9");
        assert_eq!(decoded.vote_type, VoteType::Down);
    }
}

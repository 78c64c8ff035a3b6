//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Chat server error types
#[derive(Debug, Clone)]
pub enum RippleError {
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol errors
    Protocol(String),
    /// Connection errors
    Connection(String),
    /// Invalid message format
    InvalidMessage(String),
    /// Post not found
    PostNotFound(String),
    /// External datastore failure
    Store(String),
    /// Server internal error
    Internal(String),
    /// Configuration error
    Config(String),
    /// Timeout error
    Timeout(String),
    /// Resource limit exceeded
    ResourceLimit(String),
}

impl RippleError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            RippleError::Network(_) => 1000,
            RippleError::Serialization(_) => 1001,
            RippleError::Protocol(_) => 1002,
            RippleError::Connection(_) => 1003,
            RippleError::InvalidMessage(_) => 1004,
            RippleError::PostNotFound(_) => 1005,
            RippleError::Store(_) => 1006,
            RippleError::Internal(_) => 1007,
            RippleError::Config(_) => 1008,
            RippleError::Timeout(_) => 1009,
            RippleError::ResourceLimit(_) => 1010,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            RippleError::Network(msg) => msg,
            RippleError::Serialization(msg) => msg,
            RippleError::Protocol(msg) => msg,
            RippleError::Connection(msg) => msg,
            RippleError::InvalidMessage(msg) => msg,
            RippleError::PostNotFound(msg) => msg,
            RippleError::Store(msg) => msg,
            RippleError::Internal(msg) => msg,
            RippleError::Config(msg) => msg,
            RippleError::Timeout(msg) => msg,
            RippleError::ResourceLimit(msg) => msg,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        RippleError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        RippleError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        RippleError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        RippleError::Connection(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        RippleError::InvalidMessage(msg.into())
    }

    /// Create a post not found error
    pub fn post_not_found<T: Into<String>>(msg: T) -> Self {
        RippleError::PostNotFound(msg.into())
    }

    /// Create a datastore error
    pub fn store<T: Into<String>>(msg: T) -> Self {
        RippleError::Store(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        RippleError::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        RippleError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        RippleError::Timeout(msg.into())
    }

    /// Create a resource limit error
    pub fn resource_limit<T: Into<String>>(msg: T) -> Self {
        RippleError::ResourceLimit(msg.into())
    }
}

impl fmt::Display for RippleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RippleError::Network(msg) => write!(f, "Network error: {}", msg),
            RippleError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            RippleError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RippleError::Connection(msg) => write!(f, "Connection error: {}", msg),
            RippleError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            RippleError::PostNotFound(msg) => write!(f, "Post not found: {}", msg),
            RippleError::Store(msg) => write!(f, "Datastore error: {}", msg),
            RippleError::Internal(msg) => write!(f, "Internal error: {}", msg),
            RippleError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RippleError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            RippleError::ResourceLimit(msg) => write!(f, "Resource limit exceeded: {}", msg),
        }
    }
}

impl std::error::Error for RippleError {}

impl From<std::io::Error> for RippleError {
    fn from(err: std::io::Error) -> Self {
        RippleError::Network(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectError> for RippleError {
    fn from(err: quinn::ConnectError) -> Self {
        RippleError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ConnectionError> for RippleError {
    fn from(err: quinn::ConnectionError) -> Self {
        RippleError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for RippleError {
    fn from(err: quinn::ReadError) -> Self {
        RippleError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for RippleError {
    fn from(err: quinn::WriteError) -> Self {
        RippleError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for RippleError {
    fn from(err: quinn::ClosedStream) -> Self {
        RippleError::Connection(format!("Stream closed: {}", err))
    }
}

impl From<serde_json::Error> for RippleError {
    fn from(err: serde_json::Error) -> Self {
        RippleError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<uuid::Error> for RippleError {
    fn from(err: uuid::Error) -> Self {
        RippleError::Internal(format!("UUID error: {}", err))
    }
}

impl From<anyhow::Error> for RippleError {
    fn from(err: anyhow::Error) -> Self {
        RippleError::Store(format!("{:#}", err))
    }
}

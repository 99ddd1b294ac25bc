//! Error types for each layer of the call orchestration core.
//!
//! Leaf components return these explicitly; `CallSession` decides which ones
//! are fatal and which are only logged.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the peer media connection.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media negotiation has not been set up")]
    NotReady,
    #[error("media negotiation is already set up")]
    AlreadySetUp,
    #[error("local description unavailable after ICE gathering")]
    MissingLocalDescription,
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// Failures while discovering ICE servers.
#[derive(Debug, Error)]
pub enum IceError {
    #[error("ICE discovery request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Failures on the PBX signaling connection.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("failed to dial signaling endpoint: {0}")]
    Dial(#[source] Box<tungstenite::Error>),
    #[error("failed to send signaling message: {0}")]
    Send(#[source] Box<tungstenite::Error>),
    #[error("failed to encode signaling message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed signaling event: {0}")]
    Malformed(String),
}

/// Failures of a call to the text-generation provider.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("provider request failed: {0}")]
    Provider(#[from] async_openai::error::OpenAIError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("provider returned no choices")]
    EmptyResponse,
}

/// Failures of the call session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("call already started")]
    AlreadyStarted,
    #[error("session was closed during startup")]
    Closed,
    #[error("failed to fetch ICE servers: {0}")]
    Ice(#[from] IceError),
    #[error("failed to set up media: {0}")]
    Media(#[from] MediaError),
    #[error("failed to set up signaling: {0}")]
    Signaling(#[from] SignalingError),
}

/// Failures of the session registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active session with id '{0}'")]
    NotFound(String),
}

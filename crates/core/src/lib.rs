pub mod error;
pub mod gateway;
pub mod ice;
pub mod llm_client;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod types;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use error::{
    GenerationError, IceError, MediaError, RegistryError, SessionError, SignalingError,
};
pub use registry::{RegistryEntry, SessionRegistry, StoppedSession};
pub use session::{CallSession, CallSettings, CallState};

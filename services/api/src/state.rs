//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the store, the session registry and the HTTP
//! client used for ICE discovery.

use crate::{config::Config, models::ChatRequest, store::Store};
use async_openai::config::OpenAIConfig;
use parley_core::{
    CallSession, CallSettings, GenerationError, SessionRegistry,
    ice::HttpIceDiscovery,
    llm_client::OpenAICompatibleClient,
    media::WebRtcNegotiator,
    types::{PromptConfig, ProviderCredentials},
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }

    /// Wires up a not-yet-started call for one chat request. The LLM endpoint
    /// comes from the tenant's credentials, falling back to the configured base.
    pub fn new_call(
        &self,
        session_id: &str,
        credentials: &ProviderCredentials,
        request: &ChatRequest,
        prompt: PromptConfig,
    ) -> Result<Arc<CallSession>, GenerationError> {
        let api_base = if credentials.llm_api_url.is_empty() {
            self.config.llm_api_base.clone()
        } else {
            credentials.llm_api_url.clone()
        };
        let llm = OpenAICompatibleClient::new(
            OpenAIConfig::new()
                .with_api_key(credentials.llm_api_key.clone())
                .with_api_base(api_base),
            self.config.chat_model.clone(),
            self.config.llm_timeout,
        )?;

        let settings = CallSettings {
            signaling_url: self.config.signaling_url(),
            codec: self.config.audio_codec,
            composition: self.config.prompt_composition,
            asr: credentials.asr_config(&request.language),
            tts: credentials.tts_config(&request.speaker, request.speed, request.volume),
            prompt,
            watchdog: self.config.watchdog.clone(),
        };

        Ok(CallSession::new(
            session_id,
            settings,
            Arc::new(llm),
            Arc::new(WebRtcNegotiator::new()),
            Arc::new(HttpIceDiscovery::new(
                self.http.clone(),
                self.config.ice_url(),
            )),
        ))
    }
}

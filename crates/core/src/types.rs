//! Value types shared by the session, the gateway and the HTTP service.

use crate::protocol::{AsrConfig, TtsConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable snapshot of how the assistant should answer, taken at call start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptConfig {
    pub system_prompt: String,
    pub instruction: String,
    pub persona_tag: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history_enabled: bool,
}

/// Identifiers and secrets for the ASR, TTS and LLM providers of one tenant.
///
/// Handed to a session by value; the session never stores them anywhere else.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub asr_provider: String,
    pub asr_app_id: String,
    pub asr_secret_id: String,
    pub asr_secret_key: String,
    pub asr_language: String,
    pub tts_provider: String,
    pub tts_app_id: String,
    pub tts_secret_id: String,
    pub tts_secret_key: String,
}

impl ProviderCredentials {
    /// ASR section of the invite. An empty `language` falls back to the
    /// language stored with the credential.
    pub fn asr_config(&self, language: &str) -> AsrConfig {
        let language = if language.is_empty() {
            self.asr_language.clone()
        } else {
            language.to_string()
        };
        AsrConfig {
            provider: self.asr_provider.clone(),
            app_id: self.asr_app_id.clone(),
            secret_id: self.asr_secret_id.clone(),
            secret_key: self.asr_secret_key.clone(),
            language,
        }
    }

    /// TTS section of the invite.
    pub fn tts_config(&self, speaker: &str, speed: f32, volume: i32) -> TtsConfig {
        TtsConfig {
            provider: self.tts_provider.clone(),
            speaker: speaker.to_string(),
            app_id: self.tts_app_id.clone(),
            secret_id: self.tts_secret_id.clone(),
            secret_key: self.tts_secret_key.clone(),
            speed,
            volume,
        }
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("llm_provider", &self.llm_provider)
            .field("llm_api_url", &self.llm_api_url)
            .field("asr_provider", &self.asr_provider)
            .field("asr_app_id", &self.asr_app_id)
            .field("tts_provider", &self.tts_provider)
            .field("tts_app_id", &self.tts_app_id)
            .finish_non_exhaustive()
    }
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One line of the running conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
        }
    }
}

// User lines carry a "[user] " prefix, agent lines are the bare reply text.
impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::User => write!(f, "[user] {}", self.text),
            Role::Agent => f.write_str(&self.text),
        }
    }
}

/// Joins a transcript into the newline-separated form used for storage.
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

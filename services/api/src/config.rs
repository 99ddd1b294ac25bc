use parley_core::{
    gateway::PromptComposition, media::AudioCodec, watchdog::WatchdogConfig,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Without a database the service keeps credentials and logs in memory.
    pub database_url: Option<String>,
    pub pbx_url: String,
    pub pbx_ws_url: String,
    pub llm_api_base: String,
    pub chat_model: String,
    pub llm_timeout: Duration,
    pub audio_codec: AudioCodec,
    pub prompt_composition: PromptComposition,
    pub watchdog: WatchdogConfig,
    pub log_level: Level,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL").ok();
        let pbx_url = required("PBX_URL")?;
        let pbx_ws_url = required("PBX_WS_URL")?;

        let llm_api_base = std::env::var("LLM_API_BASE")
            .unwrap_or_else(|_| "https://open.bigmodel.cn/api/paas/v4".to_string());
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "glm-4".to_string());
        let llm_timeout = Duration::from_secs(parse_or("LLM_TIMEOUT_SECS", 30u64)?);

        let audio_codec = parse_or("AUDIO_CODEC", AudioCodec::default())?;
        let prompt_composition = parse_or("PROMPT_COMPOSITION", PromptComposition::default())?;

        let defaults = WatchdogConfig::default();
        let nudge_after = parse_or("NUDGE_AFTER_SECS", defaults.nudge_after.as_secs())?;
        let disconnect_after =
            parse_or("DISCONNECT_AFTER_SECS", defaults.disconnect_after.as_secs())?;
        if nudge_after == 0 {
            return Err(ConfigError::InvalidValue(
                "NUDGE_AFTER_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let watchdog = WatchdogConfig {
            nudge_after: Duration::from_secs(nudge_after),
            disconnect_after: Duration::from_secs(disconnect_after),
            nudge_prompt: std::env::var("NUDGE_PROMPT").unwrap_or(defaults.nudge_prompt),
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            pbx_url,
            pbx_ws_url,
            llm_api_base,
            chat_model,
            llm_timeout,
            audio_codec,
            prompt_composition,
            watchdog,
            log_level,
        })
    }

    /// ICE server discovery endpoint on the PBX.
    pub fn ice_url(&self) -> String {
        format!("{}/iceservers", self.pbx_url.trim_end_matches('/'))
    }

    /// WebRTC call-control websocket on the PBX.
    pub fn signaling_url(&self) -> String {
        format!("{}/call/webrtc", self.pbx_ws_url.trim_end_matches('/'))
    }
}

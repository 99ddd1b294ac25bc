//! API and Database Models
//!
//! Request/response bodies of the chat endpoints and the persisted transcript
//! log. Everything on the wire is camelCase.

use chrono::{DateTime, Utc};
use parley_core::types::PromptConfig;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// Body of `POST /chat`.
#[derive(Deserialize, ToSchema, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    #[schema(example = 7)]
    pub assistant_id: i64,
    pub system_prompt: String,
    pub instruction: String,
    #[schema(example = "xiaoyan")]
    pub speaker: String,
    #[schema(example = "zh-cn")]
    pub language: String,
    pub api_key: String,
    pub api_secret: String,
    pub speed: f32,
    pub volume: i32,
    pub persona_tag: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Applies the prompt fields set in this request on top of the
    /// assistant's stored prompt. Empty strings and zero values keep the
    /// stored setting.
    pub fn prompt_over(&self, base: PromptConfig) -> PromptConfig {
        fn pick(requested: &str, stored: String) -> String {
            if requested.is_empty() {
                stored
            } else {
                requested.to_string()
            }
        }

        PromptConfig {
            system_prompt: pick(&self.system_prompt, base.system_prompt),
            instruction: pick(&self.instruction, base.instruction),
            persona_tag: pick(&self.persona_tag, base.persona_tag),
            temperature: if self.temperature > 0.0 {
                self.temperature
            } else {
                base.temperature
            },
            max_tokens: if self.max_tokens > 0 {
                self.max_tokens
            } else {
                base.max_tokens
            },
            history_enabled: false,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatStarted {
    pub session_id: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatStopped {
    pub message: String,
    /// Id of the stored transcript; absent when nothing was said.
    pub log_id: Option<i64>,
}

#[derive(Deserialize, IntoParams, Debug)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Id of the last log of the previous page.
    pub cursor: Option<i64>,
    /// Defaults to 10.
    pub page_size: Option<i64>,
}

/// A stored call transcript.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionLog {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub assistant_id: i64,
    /// Transcript lines joined by `\n`.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A transcript about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatLog {
    pub session_id: String,
    pub user_id: String,
    pub assistant_id: i64,
    pub content: String,
}

/// One row of the log listing; only the opening line of the transcript.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogSummary {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatSessionLog> for ChatLogSummary {
    fn from(log: ChatSessionLog) -> Self {
        let content = match log.content.split_once('\n') {
            Some((first, _)) => first.to_string(),
            None => log.content,
        };
        Self {
            id: log.id,
            content,
            created_at: log.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogPage {
    pub logs: Vec<ChatLogSummary>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

//! Data Access Layer
//!
//! Postgres implementation of [`Store`] using `sqlx` connection pooling.

use anyhow::Result;
use async_trait::async_trait;
use parley_core::types::{PromptConfig, ProviderCredentials};
use sqlx::{FromRow, PgPool};

use crate::{
    models::{ChatSessionLog, NewChatLog},
    store::Store,
};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

#[derive(FromRow)]
struct CredentialRow {
    llm_provider: String,
    llm_api_key: String,
    llm_api_url: String,
    asr_provider: String,
    asr_app_id: String,
    asr_secret_id: String,
    asr_secret_key: String,
    asr_language: String,
    tts_provider: String,
    tts_app_id: String,
    tts_secret_id: String,
    tts_secret_key: String,
}

impl From<CredentialRow> for ProviderCredentials {
    fn from(row: CredentialRow) -> Self {
        Self {
            llm_provider: row.llm_provider,
            llm_api_key: row.llm_api_key,
            llm_api_url: row.llm_api_url,
            asr_provider: row.asr_provider,
            asr_app_id: row.asr_app_id,
            asr_secret_id: row.asr_secret_id,
            asr_secret_key: row.asr_secret_key,
            asr_language: row.asr_language,
            tts_provider: row.tts_provider,
            tts_app_id: row.tts_app_id,
            tts_secret_id: row.tts_secret_id,
            tts_secret_key: row.tts_secret_key,
        }
    }
}

#[derive(FromRow)]
struct AssistantRow {
    system_prompt: String,
    instruction: String,
    persona_tag: String,
    temperature: f32,
    max_tokens: i32,
}

impl From<AssistantRow> for PromptConfig {
    fn from(row: AssistantRow) -> Self {
        Self {
            system_prompt: row.system_prompt,
            instruction: row.instruction,
            persona_tag: row.persona_tag,
            temperature: row.temperature,
            max_tokens: u32::try_from(row.max_tokens).unwrap_or(0),
            history_enabled: false,
        }
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for Db {
    async fn find_credentials(
        &self,
        api_key: &str,
        api_secret: &str,
    ) -> Result<Option<ProviderCredentials>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT llm_provider, llm_api_key, llm_api_url,
                   asr_provider, asr_app_id, asr_secret_id, asr_secret_key, asr_language,
                   tts_provider, tts_app_id, tts_secret_id, tts_secret_key
            FROM user_credentials
            WHERE api_key = $1 AND api_secret = $2
            "#,
        )
        .bind(api_key)
        .bind(api_secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn assistant_prompt(&self, assistant_id: i64) -> Result<Option<PromptConfig>> {
        let row = sqlx::query_as::<_, AssistantRow>(
            r#"
            SELECT system_prompt, instruction, persona_tag, temperature, max_tokens
            FROM assistants
            WHERE id = $1
            "#,
        )
        .bind(assistant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn save_chat_log(&self, log: NewChatLog) -> Result<ChatSessionLog> {
        let saved = sqlx::query_as::<_, ChatSessionLog>(
            r#"
            INSERT INTO chat_session_logs (session_id, user_id, assistant_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, session_id, user_id, assistant_id, content, created_at
            "#,
        )
        .bind(&log.session_id)
        .bind(&log.user_id)
        .bind(log.assistant_id)
        .bind(&log.content)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    async fn list_chat_logs(
        &self,
        user_id: &str,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatSessionLog>> {
        let logs = sqlx::query_as::<_, ChatSessionLog>(
            r#"
            SELECT id, session_id, user_id, assistant_id, content, created_at
            FROM chat_session_logs
            WHERE user_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(cursor.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn get_chat_log(&self, id: i64, user_id: &str) -> Result<Option<ChatSessionLog>> {
        let log = sqlx::query_as::<_, ChatSessionLog>(
            r#"
            SELECT id, session_id, user_id, assistant_id, content, created_at
            FROM chat_session_logs
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(log)
    }
}

//! Persistence seam used by the handlers: credential and assistant lookups
//! plus transcript storage. [`crate::db::Db`] implements it on Postgres;
//! [`MemoryStore`] keeps everything in process.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use parley_core::types::{PromptConfig, ProviderCredentials};
use std::collections::HashMap;

use crate::models::{ChatSessionLog, NewChatLog};

#[async_trait]
pub trait Store: Send + Sync {
    /// Provider credentials registered under an API key/secret pair.
    async fn find_credentials(
        &self,
        api_key: &str,
        api_secret: &str,
    ) -> Result<Option<ProviderCredentials>>;

    /// The stored prompt of an assistant, if it exists.
    async fn assistant_prompt(&self, assistant_id: i64) -> Result<Option<PromptConfig>>;

    async fn save_chat_log(&self, log: NewChatLog) -> Result<ChatSessionLog>;

    /// A user's logs with ids greater than `cursor`, oldest first.
    async fn list_chat_logs(
        &self,
        user_id: &str,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatSessionLog>>;

    async fn get_chat_log(&self, id: i64, user_id: &str) -> Result<Option<ChatSessionLog>>;
}

#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<(String, String), ProviderCredentials>>,
    assistants: RwLock<HashMap<i64, PromptConfig>>,
    logs: RwLock<Vec<ChatSessionLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_credentials(&self, api_key: &str, api_secret: &str, credentials: ProviderCredentials) {
        self.credentials
            .write()
            .insert((api_key.to_string(), api_secret.to_string()), credentials);
    }

    pub fn add_assistant(&self, assistant_id: i64, prompt: PromptConfig) {
        self.assistants.write().insert(assistant_id, prompt);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_credentials(
        &self,
        api_key: &str,
        api_secret: &str,
    ) -> Result<Option<ProviderCredentials>> {
        Ok(self
            .credentials
            .read()
            .get(&(api_key.to_string(), api_secret.to_string()))
            .cloned())
    }

    async fn assistant_prompt(&self, assistant_id: i64) -> Result<Option<PromptConfig>> {
        Ok(self.assistants.read().get(&assistant_id).cloned())
    }

    async fn save_chat_log(&self, log: NewChatLog) -> Result<ChatSessionLog> {
        let mut logs = self.logs.write();
        let saved = ChatSessionLog {
            id: logs.len() as i64 + 1,
            session_id: log.session_id,
            user_id: log.user_id,
            assistant_id: log.assistant_id,
            content: log.content,
            created_at: Utc::now(),
        };
        logs.push(saved.clone());
        Ok(saved)
    }

    async fn list_chat_logs(
        &self,
        user_id: &str,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatSessionLog>> {
        let after = cursor.unwrap_or(0);
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|log| log.user_id == user_id && log.id > after)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn get_chat_log(&self, id: i64, user_id: &str) -> Result<Option<ChatSessionLog>> {
        Ok(self
            .logs
            .read()
            .iter()
            .find(|log| log.id == id && log.user_id == user_id)
            .cloned())
    }
}

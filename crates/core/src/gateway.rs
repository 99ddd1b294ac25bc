//! Generation Gateway
//!
//! Turns caller utterances into assistant replies through an [`LLMClient`]
//! and relays every user utterance and generated reply to the web tier.
//!
//! The relay is a bounded broadcast queue: producers never wait, and a reader
//! that falls behind loses the oldest unread lines. Lines published before the
//! first reader attaches stay queued for it. The full transcript is kept
//! separately so persistence does not depend on anyone reading the relay.

use crate::{
    error::GenerationError,
    llm_client::{ChatTurn, GenerationParams, LLMClient},
    types::{PromptConfig, TranscriptEntry},
};
use parking_lot::Mutex;
use std::{str::FromStr, sync::Arc};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the relay queue per session.
pub const RELAY_CAPACITY: usize = 100;

/// How an utterance is turned into a provider request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptComposition {
    /// Send only the raw utterance as a single user message.
    #[default]
    Utterance,
    /// Prepend the system prompt and instruction, and apply the snapshot's
    /// temperature and token limit.
    Full,
}

impl FromStr for PromptComposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utterance" => Ok(Self::Utterance),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown prompt composition '{}'", other)),
        }
    }
}

/// Ordered fan-out of transcript lines plus the accumulated transcript.
pub struct TranscriptRelay {
    tx: broadcast::Sender<String>,
    /// Receiver created with the channel. It holds lines until the first
    /// reader takes it over.
    pending: Mutex<Option<broadcast::Receiver<String>>>,
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(capacity);
        Self {
            tx,
            pending: Mutex::new(Some(rx)),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends to the transcript and broadcasts the rendered line.
    ///
    /// Both happen under the same lock so readers see lines in transcript order.
    pub fn publish(&self, entry: TranscriptEntry) {
        let line = entry.to_string();
        let mut entries = self.entries.lock();
        entries.push(entry);
        // No subscribers is fine; the line is still in the transcript.
        let _ = self.tx.send(line);
    }

    /// The first reader receives every line still queued since the relay was
    /// created; later readers only see lines published after they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        match self.pending.lock().take() {
            Some(rx) => rx,
            None => self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }
}

/// Per-session client to the generation provider.
pub struct GenerationGateway {
    client: Arc<dyn LLMClient>,
    composition: PromptComposition,
    params: GenerationParams,
    relay: TranscriptRelay,
}

impl GenerationGateway {
    /// Creates a gateway. `prompt` supplies the sampling parameters used in
    /// [`PromptComposition::Full`] mode.
    pub fn new(
        client: Arc<dyn LLMClient>,
        composition: PromptComposition,
        prompt: &PromptConfig,
    ) -> Self {
        let params = match composition {
            PromptComposition::Utterance => GenerationParams::default(),
            PromptComposition::Full => GenerationParams {
                temperature: (prompt.temperature > 0.0).then_some(prompt.temperature),
                max_tokens: (prompt.max_tokens > 0).then_some(prompt.max_tokens),
            },
        };
        Self {
            client,
            composition,
            params,
            relay: TranscriptRelay::new(RELAY_CAPACITY),
        }
    }

    /// Generates the assistant's reply to one caller utterance.
    ///
    /// The utterance is relayed before the provider call and the reply after
    /// it; a failed call leaves only the utterance in the transcript.
    pub async fn generate_text(
        &self,
        system_prompt: &str,
        input: &str,
        instruction: &str,
        persona_tag: &str,
    ) -> Result<String, GenerationError> {
        self.relay.publish(TranscriptEntry::user(input));
        debug!(
            persona = persona_tag,
            composition = ?self.composition,
            "Requesting reply for caller utterance"
        );

        let turns = match self.composition {
            PromptComposition::Utterance => vec![ChatTurn::user(input)],
            PromptComposition::Full => {
                let mut turns = Vec::with_capacity(3);
                if !system_prompt.is_empty() {
                    turns.push(ChatTurn::system(system_prompt));
                }
                if !instruction.is_empty() {
                    turns.push(ChatTurn::system(instruction));
                }
                turns.push(ChatTurn::user(input));
                turns
            }
        };

        let reply = self.client.complete(turns, self.params).await?;
        self.relay.publish(TranscriptEntry::agent(reply.clone()));
        Ok(reply)
    }

    /// Pushes `content` to the provider as an assistant message and relays the
    /// reply. Used by the watchdog to prompt a silent caller.
    pub async fn send_message(&self, content: &str) -> Result<String, GenerationError> {
        let reply = self
            .client
            .complete(vec![ChatTurn::assistant(content)], self.params)
            .await?;
        self.relay.publish(TranscriptEntry::agent(reply.clone()));
        Ok(reply)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.relay.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.relay.snapshot()
    }
}

//! Directory of live calls, keyed by session id.
//!
//! Backed by a sharded map so unrelated sessions never contend on one lock.
//! Map guards are never held across an `.await`: sessions are cloned out of
//! the map before they are started or closed.
//!
//! A call closed by its watchdog keeps its entry until [`SessionRegistry::stop`]
//! removes it, so the caller can still collect the transcript. Entries are
//! only ever removed by `stop` or [`SessionRegistry::shutdown`]; a client that
//! never stops its call keeps a closed session registered until shutdown.

use crate::{
    error::{RegistryError, SessionError},
    session::CallSession,
    types::TranscriptEntry,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct RegistryEntry {
    pub assistant_id: i64,
    pub session: Arc<CallSession>,
}

/// What is left of a call after it has been stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedSession {
    pub assistant_id: i64,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, RegistryEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the call and, only if that succeeds, registers it under
    /// `session_id`. A session already registered under the same id is
    /// replaced and closed.
    #[instrument(skip(self, session))]
    pub async fn start(
        &self,
        session_id: &str,
        assistant_id: i64,
        session: Arc<CallSession>,
    ) -> Result<(), SessionError> {
        session.start_call().await?;

        let displaced = self.sessions.insert(
            session_id.to_string(),
            RegistryEntry {
                assistant_id,
                session,
            },
        );
        info!(assistant_id, "Session registered.");

        if let Some(previous) = displaced {
            warn!("Replacing an active session with the same id.");
            previous.session.close().await;
        }
        Ok(())
    }

    pub fn lookup(&self, session_id: &str) -> Option<RegistryEntry> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// Removes and closes the session, returning its transcript for
    /// persistence. Only the first of concurrent stops finds the entry.
    #[instrument(skip(self))]
    pub async fn stop(&self, session_id: &str) -> Result<StoppedSession, RegistryError> {
        let (_, entry) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))?;

        entry.session.close().await;
        info!(assistant_id = entry.assistant_id, "Session stopped.");

        Ok(StoppedSession {
            assistant_id: entry.assistant_id,
            transcript: entry.session.transcript(),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every registered session. Used on process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(count = ids.len(), "Closing all active sessions.");
        for id in ids {
            // A concurrent stop may have won; nothing to do then.
            let _ = self.stop(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ice::StaticIceServers,
        session::CallState,
        testing::{FakeLLM, FakeMedia, FakePbx, closed_port_url, test_settings},
        watchdog::WatchdogConfig,
    };
    use futures_util::future::join_all;
    use serde_json::json;
    use std::time::Duration;

    fn new_session(id: &str, url: String, llm: Arc<FakeLLM>, media: Arc<FakeMedia>) -> Arc<CallSession> {
        CallSession::new(
            id,
            test_settings(url),
            llm,
            media,
            Arc::new(StaticIceServers(Vec::new())),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_conversation() {
        let mut pbx = FakePbx::start().await;
        let llm = FakeLLM::replying("hi there");
        let registry = SessionRegistry::new();
        let session = new_session("abc", pbx.url(), llm.clone(), FakeMedia::new());

        registry.start("abc", 7, session).await.unwrap();
        assert_eq!(registry.len(), 1);
        let entry = registry.lookup("abc").unwrap();
        assert_eq!(entry.assistant_id, 7);
        assert_eq!(entry.session.state(), CallState::Active);

        let mut leg = pbx.accept().await;
        leg.recv_json().await;
        leg.send_json(json!({"event": "asrFinal", "text": "hello"}));
        assert_eq!(
            leg.recv_json().await,
            json!({"command": "tts", "text": "hi there"})
        );
        assert_eq!(llm.inputs(), vec!["hello".to_string()]);

        let stopped = registry.stop("abc").await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(stopped.assistant_id, 7);
        let lines: Vec<String> = stopped.transcript.iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["[user] hello", "hi there"]);
    }

    #[tokio::test]
    async fn test_double_stop_reports_not_found() {
        let pbx = FakePbx::start().await;
        let registry = SessionRegistry::new();
        let session = new_session("abc", pbx.url(), FakeLLM::replying("unused"), FakeMedia::new());
        registry.start("abc", 1, session).await.unwrap();

        registry.stop("abc").await.unwrap();
        let second = registry.stop("abc").await;

        assert_eq!(second, Err(RegistryError::NotFound("abc".to_string())));
    }

    #[tokio::test]
    async fn test_failed_start_registers_nothing() {
        let registry = SessionRegistry::new();
        let session = new_session(
            "abc",
            closed_port_url().await,
            FakeLLM::replying("unused"),
            FakeMedia::new(),
        );

        assert!(registry.start("abc", 1, session).await.is_err());
        assert!(registry.lookup("abc").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_start_and_stop() {
        const N: usize = 16;
        let pbx = FakePbx::start().await;
        let registry = Arc::new(SessionRegistry::new());
        let medias: Vec<Arc<FakeMedia>> = (0..N).map(|_| FakeMedia::new()).collect();

        let starts = medias.iter().enumerate().map(|(i, media)| {
            let registry = registry.clone();
            let session = new_session(
                &format!("call-{}", i),
                pbx.url(),
                FakeLLM::replying("unused"),
                media.clone(),
            );
            tokio::spawn(async move { registry.start(&format!("call-{}", i), i as i64, session).await })
        });
        for result in join_all(starts).await {
            result.unwrap().unwrap();
        }
        assert_eq!(registry.len(), N);

        let stops = (0..N).map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.stop(&format!("call-{}", i)).await })
        });
        for result in join_all(stops).await {
            result.unwrap().unwrap();
        }

        assert!(registry.is_empty());
        assert!(medias.iter().all(|media| media.stops() == 1));
    }

    #[tokio::test]
    async fn test_start_replaces_and_closes_existing_session() {
        let pbx = FakePbx::start().await;
        let registry = SessionRegistry::new();
        let first_media = FakeMedia::new();
        let first = new_session("abc", pbx.url(), FakeLLM::replying("unused"), first_media.clone());
        let second = new_session("abc", pbx.url(), FakeLLM::replying("unused"), FakeMedia::new());

        registry.start("abc", 1, first.clone()).await.unwrap();
        registry.start("abc", 2, second).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("abc").unwrap().assistant_id, 2);
        assert_eq!(first.state(), CallState::Closed);
        assert_eq!(first_media.stops(), 1);
        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_stays_registered_until_stopped() {
        let pbx = FakePbx::start().await;
        let registry = SessionRegistry::new();
        let mut settings = test_settings(pbx.url());
        settings.watchdog = WatchdogConfig {
            nudge_after: Duration::from_millis(30),
            disconnect_after: Duration::from_millis(100),
            nudge_prompt: "Hello?".to_string(),
        };
        let media = FakeMedia::new();
        let session = CallSession::new(
            "idle",
            settings,
            FakeLLM::replying("Are you there?"),
            media.clone(),
            Arc::new(StaticIceServers(Vec::new())),
        );
        registry.start("idle", 3, session.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.state() != CallState::Closed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watchdog should close the session");

        assert_eq!(registry.len(), 1);
        let stopped = registry.stop("idle").await.unwrap();
        assert_eq!(stopped.assistant_id, 3);
        assert!(stopped.transcript.contains(&TranscriptEntry::agent("Are you there?")));
        assert_eq!(media.stops(), 1);
        assert!(registry.is_empty());
    }
}

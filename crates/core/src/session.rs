//! Call session orchestration.
//!
//! A `CallSession` drives one call through
//! `Created -> Negotiating -> Active -> Closing -> Closed`. Startup fetches ICE
//! servers, produces the local offer and opens the signaling channel; once the
//! call is active a watchdog and a media-event pump run alongside the
//! signaling receive loop. All three hang off one cancellation token, and
//! [`CallSession::close`] waits for every one of them to exit.

use crate::{
    error::SessionError,
    gateway::{GenerationGateway, PromptComposition},
    ice::IceDiscovery,
    llm_client::LLMClient,
    media::{AudioCodec, IceConnectivity, MediaEvent, MediaNegotiator},
    protocol::{AsrConfig, CallOptions, SignalingMessage, TtsConfig},
    signaling::{Dispatcher, SignalingChannel},
    types::{PromptConfig, TranscriptEntry},
    watchdog::{Watchdog, WatchdogConfig, WatchdogExit},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::{
    sync::{Mutex as AsyncMutex, broadcast, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

const MEDIA_EVENT_CAPACITY: usize = 32;

/// Lifecycle of a call. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    Created,
    Negotiating,
    Active,
    Closing,
    Closed,
}

/// Everything a session needs to place its call, fixed at construction.
#[derive(Debug, Clone)]
pub struct CallSettings {
    /// Websocket endpoint of the PBX call-control API.
    pub signaling_url: String,
    pub codec: AudioCodec,
    pub composition: PromptComposition,
    pub asr: AsrConfig,
    pub tts: TtsConfig,
    pub prompt: PromptConfig,
    pub watchdog: WatchdogConfig,
}

pub struct CallSession {
    id: String,
    created_at: DateTime<Utc>,
    settings: CallSettings,
    prompt: Arc<PromptConfig>,
    state: Mutex<CallState>,
    media: Arc<dyn MediaNegotiator>,
    ice: Arc<dyn IceDiscovery>,
    gateway: Arc<GenerationGateway>,
    cancel: CancellationToken,
    signaling: AsyncMutex<Option<SignalingChannel>>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl CallSession {
    pub fn new(
        id: impl Into<String>,
        settings: CallSettings,
        llm: Arc<dyn LLMClient>,
        media: Arc<dyn MediaNegotiator>,
        ice: Arc<dyn IceDiscovery>,
    ) -> Arc<Self> {
        let gateway = Arc::new(GenerationGateway::new(
            llm,
            settings.composition,
            &settings.prompt,
        ));
        Arc::new(Self {
            id: id.into(),
            created_at: Utc::now(),
            prompt: Arc::new(settings.prompt.clone()),
            settings,
            state: Mutex::new(CallState::Created),
            media,
            ice,
            gateway,
            cancel: CancellationToken::new(),
            signaling: AsyncMutex::new(None),
            tasks: AsyncMutex::new(JoinSet::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    pub fn prompt(&self) -> &PromptConfig {
        &self.prompt
    }

    /// Read-only view of the transcript relay.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.gateway.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.gateway.transcript()
    }

    /// Token cancelled when the session starts closing.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Places the call. On any failure the partially built call is torn
    /// down and the session ends up `Closed`.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn start_call(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            match *state {
                CallState::Created => *state = CallState::Negotiating,
                CallState::Negotiating | CallState::Active => {
                    return Err(SessionError::AlreadyStarted);
                }
                CallState::Closing | CallState::Closed => return Err(SessionError::Closed),
            }
        }

        match self.negotiate().await {
            Ok(()) => {
                info!("Call is active.");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Call startup failed.");
                self.cancel.cancel();
                if let Err(stop_err) = self.media.stop().await {
                    warn!(error = %stop_err, "Failed to release media after startup failure.");
                }
                *self.state.lock() = CallState::Closed;
                Err(e)
            }
        }
    }

    async fn negotiate(self: &Arc<Self>) -> Result<(), SessionError> {
        let ice_servers = self.ice.fetch().await?;
        debug!(count = ice_servers.len(), "ICE servers fetched.");

        let (events_tx, events_rx) = mpsc::channel(MEDIA_EVENT_CAPACITY);
        let offer = self
            .media
            .setup(self.settings.codec, ice_servers, events_tx)
            .await?;

        let invite = SignalingMessage::Invite {
            option: CallOptions {
                asr: self.settings.asr.clone(),
                tts: self.settings.tts.clone(),
                offer,
            },
        };
        let dispatcher = Dispatcher {
            media: self.media.clone(),
            gateway: self.gateway.clone(),
            prompt: self.prompt.clone(),
        };
        let channel = SignalingChannel::connect(
            &self.settings.signaling_url,
            &invite,
            dispatcher,
            self.cancel.child_token(),
        )
        .await?;
        *self.signaling.lock().await = Some(channel);

        self.spawn_background(events_rx).await;

        let activated = {
            let mut state = self.state.lock();
            if *state == CallState::Negotiating {
                *state = CallState::Active;
                true
            } else {
                false
            }
        };
        if !activated {
            // close() ran while we were negotiating; release what it could not see.
            if let Some(channel) = self.signaling.lock().await.take() {
                channel.close().await;
            }
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    async fn spawn_background(self: &Arc<Self>, events: mpsc::Receiver<MediaEvent>) {
        let mut tasks = self.tasks.lock().await;

        let watchdog = Watchdog::new(self.settings.watchdog.clone(), self.gateway.clone());
        let session = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tasks.spawn(
            async move {
                if watchdog.run(cancel).await == WatchdogExit::Expired {
                    force_close(session);
                }
            }
            .in_current_span(),
        );

        tasks.spawn(pump_media_events(events, self.cancel.clone()).in_current_span());
    }

    /// Ends the call and waits for the receive loop, the watchdog and the
    /// media-event pump to exit. Later calls return immediately.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                CallState::Closing | CallState::Closed => return,
                _ => *state = CallState::Closing,
            }
        }
        info!("Closing call.");

        self.cancel.cancel();
        if let Err(e) = self.media.stop().await {
            warn!(error = %e, "Failed to stop media.");
        }
        let channel = self.signaling.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Session task ended abnormally.");
            }
        }

        *self.state.lock() = CallState::Closed;
        info!("Call closed.");
    }
}

/// The watchdog lives in the session's own task set, so closing has to
/// happen on a fresh task or `close` would wait on its caller.
fn force_close(session: Weak<CallSession>) {
    if let Some(session) = session.upgrade() {
        tokio::spawn(async move { session.close().await }.in_current_span());
    }
}

async fn pump_media_events(mut events: mpsc::Receiver<MediaEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(MediaEvent::RemoteTrack { id, stream_id }) => {
                info!(track_id = %id, %stream_id, "Remote audio track started.");
            }
            Some(MediaEvent::IceStateChanged(IceConnectivity::Failed)) => {
                warn!("ICE connectivity failed.");
            }
            Some(MediaEvent::IceStateChanged(state)) => {
                info!(?state, "ICE connectivity changed.");
            }
            None => break,
        }
    }
}

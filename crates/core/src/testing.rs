//! Fakes shared by the unit tests: a scripted LLM, a counting media
//! negotiator and an in-process PBX websocket server.

use crate::{
    error::{GenerationError, MediaError},
    gateway::PromptComposition,
    ice::IceServer,
    llm_client::{ChatRole, ChatTurn, GenerationParams, LLMClient},
    media::{AudioCodec, MediaEvent, MediaNegotiator},
    protocol::{AsrConfig, TtsConfig},
    session::CallSettings,
    types::PromptConfig,
    watchdog::WatchdogConfig,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::protocol::Message};

const WAIT: Duration = Duration::from_secs(5);

/// A chat-completion response carrying a single choice.
pub fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "glm-4",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

pub fn test_settings(signaling_url: String) -> CallSettings {
    CallSettings {
        signaling_url,
        codec: AudioCodec::G722,
        composition: PromptComposition::Utterance,
        asr: AsrConfig::default(),
        tts: TtsConfig::default(),
        prompt: PromptConfig {
            system_prompt: "You are helpful.".to_string(),
            ..Default::default()
        },
        watchdog: WatchdogConfig::default(),
    }
}

/// A websocket URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

enum Behavior {
    Reply(String),
    Fail,
    Panic,
}

pub struct FakeLLM {
    behavior: Behavior,
    calls: Mutex<Vec<(Vec<ChatTurn>, GenerationParams)>>,
}

impl FakeLLM {
    fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Self::with(Behavior::Reply(reply.to_string()))
    }

    pub fn failing() -> Arc<Self> {
        Self::with(Behavior::Fail)
    }

    pub fn panicking() -> Arc<Self> {
        Self::with(Behavior::Panic)
    }

    pub fn calls(&self) -> Vec<(Vec<ChatTurn>, GenerationParams)> {
        self.calls.lock().clone()
    }

    /// The user message of every call that had one, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|(turns, _)| {
                turns
                    .iter()
                    .rev()
                    .find(|turn| turn.role == ChatRole::User)
                    .map(|turn| turn.content.clone())
            })
            .collect()
    }
}

#[async_trait]
impl LLMClient for FakeLLM {
    async fn complete(
        &self,
        turns: Vec<ChatTurn>,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        self.calls.lock().push((turns, params));
        match &self.behavior {
            Behavior::Reply(reply) => Ok(reply.clone()),
            Behavior::Fail => Err(GenerationError::EmptyResponse),
            Behavior::Panic => panic!("provider blew up"),
        }
    }
}

pub struct FakeMedia {
    fail_setup: bool,
    setups: AtomicUsize,
    stops: AtomicUsize,
    answers: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub const OFFER: &'static str = "v=0 fake-offer";

    fn with(fail_setup: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_setup,
            setups: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            answers: Mutex::new(Vec::new()),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::with(false)
    }

    /// Setup always fails with `MediaError::NotReady`.
    pub fn failing() -> Arc<Self> {
        Self::with(true)
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }

    pub async fn wait_for_answers(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.answers.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for answers");
    }
}

#[async_trait]
impl MediaNegotiator for FakeMedia {
    async fn setup(
        &self,
        _codec: AudioCodec,
        _ice_servers: Vec<IceServer>,
        _events: mpsc::Sender<MediaEvent>,
    ) -> Result<String, MediaError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            return Err(MediaError::NotReady);
        }
        Ok(Self::OFFER.to_string())
    }

    async fn setup_answer(&self, sdp: String) -> Result<(), MediaError> {
        self.answers.lock().push(sdp);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A local websocket server standing in for the PBX. Every incoming
/// connection is upgraded straight away and queued for [`FakePbx::accept`].
pub struct FakePbx {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl FakePbx {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        let _ = tx.send(ws);
                    }
                });
            }
        });
        Self { addr, connections }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept(&mut self) -> PbxLeg {
        self.try_accept(WAIT)
            .await
            .expect("timed out waiting for a signaling connection")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<PbxLeg> {
        match tokio::time::timeout(wait, self.connections.recv()).await {
            Ok(Some(ws)) => Some(PbxLeg::new(ws)),
            _ => None,
        }
    }
}

/// The PBX side of one signaling connection.
pub struct PbxLeg {
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl PbxLeg {
    fn new(ws: WebSocketStream<TcpStream>) -> Self {
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                if let Message::Text(text) = message {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = inbound_tx.send(value);
                    }
                }
            }
        });

        Self { inbound, outbound }
    }

    pub async fn recv_json(&mut self) -> Value {
        self.try_recv_json(WAIT)
            .await
            .expect("timed out waiting for a frame from the client")
    }

    pub async fn try_recv_json(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.outbound.send(Message::Text(text.to_string().into()));
    }

    /// Sends a close frame, ending the call leg from the PBX side.
    pub fn hang_up(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

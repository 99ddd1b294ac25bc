//! PBX signaling channel.
//!
//! A `SignalingChannel` is a websocket to the PBX that already carries our
//! `invite`. Its receive loop decodes every inbound event and dispatches it:
//! answers go to the media negotiator inline, final ASR results are answered
//! by a separately spawned generation turn so the loop is never held up by the
//! provider. Turns run unsequenced, so with overlapping utterances the replies
//! (and their transcript lines) may arrive in completion order.
//!
//! Any read error or remote close ends the loop for good. A dropped leg of a
//! live call is not resumed.

use crate::{
    error::SignalingError,
    gateway::GenerationGateway,
    media::MediaNegotiator,
    protocol::{SignalingEvent, SignalingMessage},
    types::PromptConfig,
};
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Collaborators the receive loop dispatches events to.
#[derive(Clone)]
pub struct Dispatcher {
    pub media: Arc<dyn MediaNegotiator>,
    pub gateway: Arc<GenerationGateway>,
    pub prompt: Arc<PromptConfig>,
}

/// An open signaling connection with its receive loop.
pub struct SignalingChannel {
    sink: Arc<Mutex<WsSink>>,
    cancel: CancellationToken,
    receive_loop: JoinHandle<()>,
}

impl SignalingChannel {
    /// Dials `endpoint` and sends `invite`.
    ///
    /// Only returns a channel once the invite is on the wire; on any failure
    /// the socket is dropped and nothing keeps running.
    #[instrument(name = "signaling_connect", skip_all, fields(%endpoint))]
    pub async fn connect(
        endpoint: &str,
        invite: &SignalingMessage,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) -> Result<Self, SignalingError> {
        let (ws_stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| SignalingError::Dial(Box::new(e)))?;
        let (mut sink, stream) = ws_stream.split();

        send_frame(&mut sink, invite).await?;
        info!("Sent invite command to PBX.");

        let sink = Arc::new(Mutex::new(sink));
        let receive_loop = tokio::spawn(
            receive_loop(stream, sink.clone(), dispatcher, cancel.clone())
                .instrument(tracing::Span::current()),
        );

        Ok(Self {
            sink,
            cancel,
            receive_loop,
        })
    }

    /// Sends a `tts` command asking the PBX to speak `text`.
    pub async fn speak(&self, text: impl Into<String>) -> Result<(), SignalingError> {
        let message = SignalingMessage::Tts { text: text.into() };
        send_frame(&mut *self.sink.lock().await, &message).await
    }

    /// Whether the receive loop has ended (closed, failed, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.receive_loop.is_finished()
    }

    /// Stops the receive loop, closes the socket and waits for the loop to exit.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Signaling socket was already closed.");
        }
        if let Err(e) = self.receive_loop.await {
            error!(error = %e, "Signaling receive loop ended abnormally.");
        }
        info!("Signaling channel closed.");
    }
}

async fn send_frame(sink: &mut WsSink, message: &SignalingMessage) -> Result<(), SignalingError> {
    let payload = serde_json::to_string(message)?;
    sink.send(WsMessage::Text(payload.into()))
        .await
        .map_err(|e| SignalingError::Send(Box::new(e)))
}

async fn receive_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<Mutex<WsSink>>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Receive loop cancelled.");
                break;
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => match SignalingEvent::parse(&text) {
                Ok(event) => dispatch(event, &dispatcher, &sink, &cancel).await,
                Err(e) => warn!(error = %e, frame = %text, "Ignoring invalid signaling frame."),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                info!(?frame, "PBX closed the signaling connection.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "Signaling read failed; stopping receive loop.");
                break;
            }
            None => {
                info!("Signaling stream ended.");
                break;
            }
        }
    }
}

async fn dispatch(
    event: SignalingEvent,
    dispatcher: &Dispatcher,
    sink: &Arc<Mutex<WsSink>>,
    cancel: &CancellationToken,
) {
    info!(event = event.name(), "Received signaling event.");
    match event {
        SignalingEvent::Answer { sdp } => {
            if let Err(e) = dispatcher.media.setup_answer(sdp).await {
                error!(error = %e, "Failed to apply remote answer.");
            }
        }
        SignalingEvent::AsrFinal { text } => {
            spawn_turn(text, dispatcher.clone(), sink.clone(), cancel.clone());
        }
        SignalingEvent::Other { event } => {
            debug!(%event, "Unhandled signaling event.");
        }
    }
}

/// Answers one utterance on its own task. Cancellation drops the turn; a
/// panic is caught here and logged instead of reaching the receive loop.
fn spawn_turn(
    input: String,
    dispatcher: Dispatcher,
    sink: Arc<Mutex<WsSink>>,
    cancel: CancellationToken,
) {
    let turn = AssertUnwindSafe(run_turn(input, dispatcher, sink)).catch_unwind();
    tokio::spawn(
        async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Channel closed; dropping in-flight turn."),
                outcome = turn => {
                    if let Err(panic) = outcome {
                        error!(panic = panic_message(&*panic), "Generation turn panicked.");
                    }
                }
            }
        }
        .in_current_span(),
    );
}

async fn run_turn(input: String, dispatcher: Dispatcher, sink: Arc<Mutex<WsSink>>) {
    let prompt = &dispatcher.prompt;
    let reply = match dispatcher
        .gateway
        .generate_text(
            &prompt.system_prompt,
            &input,
            &prompt.instruction,
            &prompt.persona_tag,
        )
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = %e, "LLM generation failed; dropping turn.");
            return;
        }
    };

    let message = SignalingMessage::Tts { text: reply };
    if let Err(e) = send_frame(&mut *sink.lock().await, &message).await {
        error!(error = %e, "Failed to send tts command.");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

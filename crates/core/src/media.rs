//! Peer media negotiation.
//!
//! `MediaNegotiator` owns one WebRTC peer connection: it produces our SDP
//! offer, applies the PBX's answer and tears the connection down. Remote-track
//! and ICE-state notifications are not handled here; they are forwarded as
//! [`MediaEvent`]s over a channel owned by the session.

use crate::{error::MediaError, ice::IceServer};
use async_trait::async_trait;
use std::{fmt, str::FromStr, sync::Arc};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument};
use webrtc::{
    api::{
        APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_G722, MIME_TYPE_OPUS, MIME_TYPE_PCMU, MediaEngine},
    },
    ice_transport::{ice_connection_state::RTCIceConnectionState, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{
        RTCRtpTransceiver, rtp_codec::RTCRtpCodecCapability, rtp_receiver::RTCRtpReceiver,
    },
    track::{
        track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
        track_remote::TrackRemote,
    },
};

/// Audio codec of the local track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioCodec {
    #[default]
    G722,
    Pcmu,
    Opus,
}

impl AudioCodec {
    fn capability(self) -> RTCRtpCodecCapability {
        match self {
            AudioCodec::G722 => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_G722.to_owned(),
                clock_rate: 8000,
                ..Default::default()
            },
            AudioCodec::Pcmu => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8000,
                ..Default::default()
            },
            AudioCodec::Opus => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                ..Default::default()
            },
        }
    }
}

impl FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "g722" => Ok(Self::G722),
            "pcmu" => Ok(Self::Pcmu),
            "opus" => Ok(Self::Opus),
            other => Err(format!("unsupported audio codec '{}'", other)),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::G722 => f.write_str("g722"),
            AudioCodec::Pcmu => f.write_str("pcmu"),
            AudioCodec::Opus => f.write_str("opus"),
        }
    }
}

/// ICE connectivity of the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectivity {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

impl From<RTCIceConnectionState> for IceConnectivity {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::New => Self::New,
            RTCIceConnectionState::Checking => Self::Checking,
            RTCIceConnectionState::Connected => Self::Connected,
            RTCIceConnectionState::Completed => Self::Completed,
            RTCIceConnectionState::Disconnected => Self::Disconnected,
            RTCIceConnectionState::Failed => Self::Failed,
            RTCIceConnectionState::Closed => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

/// Notifications from the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// The remote side started sending a track.
    RemoteTrack { id: String, stream_id: String },
    /// ICE connectivity changed.
    IceStateChanged(IceConnectivity),
}

/// Owns the media leg of one call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaNegotiator: Send + Sync {
    /// Creates the local audio track and offer, waits for ICE gathering to
    /// finish and returns the complete local SDP.
    async fn setup(
        &self,
        codec: AudioCodec,
        ice_servers: Vec<IceServer>,
        events: mpsc::Sender<MediaEvent>,
    ) -> Result<String, MediaError>;

    /// Applies the remote SDP answer. Fails before `setup`.
    async fn setup_answer(&self, sdp: String) -> Result<(), MediaError>;

    /// Releases the peer connection. Safe to call any number of times.
    async fn stop(&self) -> Result<(), MediaError>;
}

/// `MediaNegotiator` backed by a `webrtc` peer connection.
#[derive(Default)]
pub struct WebRtcNegotiator {
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,
}

impl WebRtcNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn create_peer(ice_servers: Vec<IceServer>) -> Result<Arc<RTCPeerConnection>, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username,
                    credential: server.credential,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        Ok(Arc::new(api.new_peer_connection(config).await?))
    }

    async fn negotiate(
        peer: &Arc<RTCPeerConnection>,
        codec: AudioCodec,
        events: mpsc::Sender<MediaEvent>,
    ) -> Result<String, MediaError> {
        let track_events = events.clone();
        peer.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let _ = events.try_send(MediaEvent::RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                    });
                })
            },
        ));
        peer.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.try_send(MediaEvent::IceStateChanged(state.into()));
            })
        }));

        let track = Arc::new(TrackLocalStaticSample::new(
            codec.capability(),
            "audio".to_owned(),
            "parley".to_owned(),
        ));
        peer.add_track(track as Arc<dyn TrackLocal + Send + Sync>).await?;

        let offer = peer.create_offer(None).await?;
        let mut gathering_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(offer).await?;
        let _ = gathering_complete.recv().await;

        let local = peer
            .local_description()
            .await
            .ok_or(MediaError::MissingLocalDescription)?;
        Ok(local.sdp)
    }
}

#[async_trait]
impl MediaNegotiator for WebRtcNegotiator {
    #[instrument(skip_all, fields(%codec, ice_servers = ice_servers.len()))]
    async fn setup(
        &self,
        codec: AudioCodec,
        ice_servers: Vec<IceServer>,
        events: mpsc::Sender<MediaEvent>,
    ) -> Result<String, MediaError> {
        let mut slot = self.peer.lock().await;
        if slot.is_some() {
            return Err(MediaError::AlreadySetUp);
        }

        let peer = Self::create_peer(ice_servers).await?;
        match Self::negotiate(&peer, codec, events).await {
            Ok(sdp) => {
                info!("Local offer ready after ICE gathering.");
                *slot = Some(peer);
                Ok(sdp)
            }
            Err(e) => {
                let _ = peer.close().await;
                Err(e)
            }
        }
    }

    async fn setup_answer(&self, sdp: String) -> Result<(), MediaError> {
        let peer = self
            .peer
            .lock()
            .await
            .clone()
            .ok_or(MediaError::NotReady)?;
        let answer = RTCSessionDescription::answer(sdp)?;
        peer.set_remote_description(answer).await?;
        debug!("Remote answer applied.");
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        let peer = self.peer.lock().await.take();
        if let Some(peer) = peer {
            peer.close().await?;
            info!("Peer connection closed.");
        }
        Ok(())
    }
}

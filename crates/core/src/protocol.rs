//! Defines the JSON message protocol between this service and the PBX.

use crate::error::SignalingError;
use serde::{Deserialize, Serialize};

/// Speech recognition settings forwarded to the PBX with the invite.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AsrConfig {
    pub provider: String,
    pub app_id: String,
    pub secret_id: String,
    pub secret_key: String,
    pub language: String,
}

/// Speech synthesis settings forwarded to the PBX with the invite.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TtsConfig {
    pub provider: String,
    pub speaker: String,
    pub app_id: String,
    pub secret_id: String,
    pub secret_key: String,
    pub speed: f32,
    pub volume: i32,
}

/// Payload of the `invite` command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub asr: AsrConfig,
    pub tts: TtsConfig,
    /// Local SDP offer with all ICE candidates gathered.
    pub offer: String,
}

/// Commands sent from this service to the PBX.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Opens the call leg with ASR/TTS configuration and our SDP offer.
    Invite { option: CallOptions },
    /// Asks the PBX to speak `text` to the caller.
    Tts { text: String },
}

/// Events received from the PBX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The remote SDP answer to our offer.
    Answer { sdp: String },
    /// A final speech recognition result for one caller utterance.
    AsrFinal { text: String },
    /// Any other event; logged and ignored.
    Other { event: String },
}

// Wire shape of an inbound event. The PBX sends many more fields
// (trackId, timestamp, data, ...) which are irrelevant here.
#[derive(Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    sdp: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl SignalingEvent {
    /// Decodes one text frame from the PBX.
    pub fn parse(frame: &str) -> Result<Self, SignalingError> {
        let raw: RawEvent = serde_json::from_str(frame)
            .map_err(|e| SignalingError::Malformed(e.to_string()))?;
        match raw.event.as_str() {
            "answer" => raw
                .sdp
                .map(|sdp| SignalingEvent::Answer { sdp })
                .ok_or_else(|| SignalingError::Malformed("answer without sdp".to_string())),
            "asrFinal" => raw
                .text
                .map(|text| SignalingEvent::AsrFinal { text })
                .ok_or_else(|| SignalingError::Malformed("asrFinal without text".to_string())),
            _ => Ok(SignalingEvent::Other { event: raw.event }),
        }
    }

    /// The event tag as it appears on the wire.
    pub fn name(&self) -> &str {
        match self {
            SignalingEvent::Answer { .. } => "answer",
            SignalingEvent::AsrFinal { .. } => "asrFinal",
            SignalingEvent::Other { event } => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invite_wire_shape() {
        let invite = SignalingMessage::Invite {
            option: CallOptions {
                asr: AsrConfig {
                    provider: "tencent".to_string(),
                    app_id: "1325".to_string(),
                    language: "zh-cn".to_string(),
                    ..Default::default()
                },
                tts: TtsConfig {
                    speaker: "101016".to_string(),
                    speed: 1.0,
                    volume: 5,
                    ..Default::default()
                },
                offer: "v=0".to_string(),
            },
        };

        let value = serde_json::to_value(&invite).unwrap();
        assert_eq!(value["command"], "invite");
        assert_eq!(value["option"]["offer"], "v=0");
        assert_eq!(value["option"]["asr"]["appId"], "1325");
        assert_eq!(value["option"]["asr"]["language"], "zh-cn");
        assert_eq!(value["option"]["tts"]["speaker"], "101016");
        assert_eq!(value["option"]["tts"]["volume"], 5);
    }

    #[test]
    fn test_tts_wire_shape() {
        let tts = SignalingMessage::Tts {
            text: "hi there".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&tts).unwrap(),
            json!({"command": "tts", "text": "hi there"})
        );
    }

    #[test]
    fn test_parse_known_events() {
        let answer = SignalingEvent::parse(r#"{"event":"answer","sdp":"v=0 remote"}"#).unwrap();
        assert_eq!(
            answer,
            SignalingEvent::Answer {
                sdp: "v=0 remote".to_string()
            }
        );

        let asr = SignalingEvent::parse(
            r#"{"event":"asrFinal","trackId":"t1","timestamp":12,"text":"hello"}"#,
        )
        .unwrap();
        assert_eq!(
            asr,
            SignalingEvent::AsrFinal {
                text: "hello".to_string()
            }
        );
        assert_eq!(asr.name(), "asrFinal");
    }

    #[test]
    fn test_parse_unknown_event_is_other() {
        let event = SignalingEvent::parse(r#"{"event":"asrDelta","text":"hel"}"#).unwrap();
        assert_eq!(
            event,
            SignalingEvent::Other {
                event: "asrDelta".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_frames() {
        assert!(matches!(
            SignalingEvent::parse("not json"),
            Err(SignalingError::Malformed(_))
        ));
        assert!(matches!(
            SignalingEvent::parse(r#"{"sdp":"v=0"}"#),
            Err(SignalingError::Malformed(_))
        ));
        assert!(matches!(
            SignalingEvent::parse(r#"{"event":"answer"}"#),
            Err(SignalingError::Malformed(_))
        ));
    }
}

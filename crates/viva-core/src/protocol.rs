//! Media-stream wire protocol spoken on the `/ws` transport.
//!
//! Inbound audio arrives as JSON text frames tagged by `event`
//! (`connected`, `start`, `media`, `mark`, `stop`) carrying base64 μ-law
//! payloads, or as raw binary frames. Outbound frames carry synthesized
//! audio, the final evaluation, and error reports.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{EvaluationResult, Verdict};

/// Client -> server frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },

    Start {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        start: StartMetadata,
    },

    Media {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(rename = "sequenceNumber", default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<String>,
        media: MediaPayload,
    },

    Mark {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },

    /// The caller hung up.
    Stop {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },

    /// Explicit end-of-interview signal from a non-telephony client.
    End,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartMetadata {
    #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,
    #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMetadata {
    /// Job description passed through the stream's custom parameters.
    pub fn job_description(&self) -> Option<&str> {
        ["jobDescription", "job_description"]
            .iter()
            .find_map(|key| self.custom_parameters.get(*key))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    /// Media without a track label is treated as caller audio.
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().is_none_or(|t| t == "inbound")
    }

    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| DecodeError::Payload(e.to_string()))
    }
}

/// Server -> client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        media: OutboundMedia,
    },

    /// Drop any audio still buffered for playback.
    Clear {
        #[serde(rename = "streamSid", skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },

    Evaluation {
        verdict: Verdict,
        rationale: String,
    },

    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: Option<String>, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid,
            media: OutboundMedia {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn evaluation(result: &EvaluationResult) -> Self {
        Self::Evaluation {
            verdict: result.verdict,
            rationale: result.rationale.clone(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_frame() {
        let raw = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "streamSid": "MZ123",
                "callSid": "CA456",
                "tracks": ["inbound"],
                "customParameters": { "jobDescription": "Backend engineer, Rust" }
            }
        });
        let frame: InboundFrame = serde_json::from_value(raw).unwrap();
        match frame {
            InboundFrame::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ123"));
                assert_eq!(start.call_sid.as_deref(), Some("CA456"));
                assert_eq!(start.job_description(), Some("Backend engineer, Rust"));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_frame_and_decode() {
        let raw = json!({
            "event": "media",
            "sequenceNumber": "3",
            "streamSid": "MZ123",
            "media": { "track": "inbound", "chunk": "1", "timestamp": "5", "payload": "/38A" }
        });
        let frame: InboundFrame = serde_json::from_value(raw).unwrap();
        let InboundFrame::Media { media, .. } = frame else {
            panic!("expected media frame");
        };
        assert!(media.is_inbound());
        assert_eq!(media.decode().unwrap(), vec![0xFF, 0x7F, 0x00]);
    }

    #[test]
    fn test_outbound_track_is_not_inbound() {
        let media = MediaPayload {
            track: Some("outbound".into()),
            payload: String::new(),
        };
        assert!(!media.is_inbound());
    }

    #[test]
    fn test_bad_payload_is_decode_error() {
        let media = MediaPayload {
            track: None,
            payload: "not base64!!".into(),
        };
        assert!(matches!(media.decode(), Err(DecodeError::Payload(_))));
    }

    #[test]
    fn test_stop_and_end_frames() {
        let stop: InboundFrame =
            serde_json::from_str(r#"{"event":"stop","streamSid":"MZ1","stop":{}}"#).unwrap();
        assert!(matches!(stop, InboundFrame::Stop { .. }));
        let end: InboundFrame = serde_json::from_str(r#"{"event":"end"}"#).unwrap();
        assert!(matches!(end, InboundFrame::End));
    }

    #[test]
    fn test_outbound_frames_serialize() {
        let media = serde_json::to_value(OutboundFrame::media(Some("MZ1".into()), &[1, 2, 3])).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "AQID");

        let eval = serde_json::to_value(OutboundFrame::evaluation(&EvaluationResult::error(
            "No candidate speech was transcribed.",
        )))
        .unwrap();
        assert_eq!(eval["event"], "evaluation");
        assert_eq!(eval["verdict"], "error");
    }
}

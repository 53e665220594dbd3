use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encoding of inbound audio blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample (telephony default).
    #[default]
    Mulaw,
    /// Little-endian signed 16-bit PCM.
    Linear16,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Candidate,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn candidate(text: impl Into<String>) -> Self {
        Self::new(Role::Candidate, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// A finalized transcription result. Sequence numbers strictly increase per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub seq: u64,
    pub text: String,
}

/// Qualitative verdict on the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Strong,
    Neutral,
    Weak,
    Error,
}

impl Verdict {
    /// Parse a bare label such as `STRONG` or `weak`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "strong" => Some(Self::Strong),
            "neutral" => Some(Self::Neutral),
            "weak" => Some(Self::Weak),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Neutral => "neutral",
            Self::Weak => "weak",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub verdict: Verdict,
    pub rationale: String,
}

impl EvaluationResult {
    pub fn error(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            rationale: rationale.into(),
        }
    }
}

/// Lifecycle state of an interview session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Closing,
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Why a session left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit end-of-session control signal.
    EndSignal,
    /// Peer disconnected or the transport failed.
    TransportClosed,
    /// Hard session cap reached.
    Timeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndSignal => "end_signal",
            Self::TransportClosed => "transport_closed",
            Self::Timeout => "timeout",
        }
    }
}

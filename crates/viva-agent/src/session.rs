//! The per-connection interview aggregate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use viva_core::types::{CloseReason, ConversationTurn, Role, SessionStatus, TranscriptSegment};

/// Session state shared between the ingest loop and the turn worker.
/// Every mutation goes through this one lock.
pub type SharedSession = Arc<Mutex<InterviewSession>>;

/// One interview, from connection to teardown. Never shared across connections.
#[derive(Debug, Clone)]
pub struct InterviewSession {
    pub id: String,
    pub job_description: String,
    pub started_at: DateTime<Utc>,
    /// Dialogue context sent to the completion backend.
    history: Vec<ConversationTurn>,
    /// What was actually said on the call: every finalized transcript and
    /// every interviewer line, whether or not a turn completed.
    transcript: Vec<ConversationTurn>,
    status: SessionStatus,
    close_reason: Option<CloseReason>,
    /// Latest voice decision from the ingest side's window.
    voice_active: bool,
}

impl InterviewSession {
    pub fn new(id: impl Into<String>, job_description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_description: job_description.into(),
            started_at: Utc::now(),
            history: Vec::new(),
            transcript: Vec::new(),
            status: SessionStatus::Active,
            close_reason: None,
            voice_active: false,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Append-only; the history is never reordered or pruned. Interviewer
    /// turns are spoken, so they also land on the transcript.
    pub fn append(&mut self, turn: ConversationTurn) {
        if turn.role == Role::Assistant {
            self.transcript.push(turn.clone());
        }
        self.history.push(turn);
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Record a finalized transcript segment as candidate speech.
    pub fn record_segment(&mut self, segment: &TranscriptSegment) {
        self.transcript
            .push(ConversationTurn::candidate(segment.text.as_str()));
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.transcript
    }

    pub fn candidate_turns(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.role == Role::Candidate)
            .count()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Active -> Closing. Returns false if the session was already closing.
    pub fn begin_closing(&mut self, reason: CloseReason) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }
        self.status = SessionStatus::Closing;
        self.close_reason = Some(reason);
        true
    }

    pub fn terminate(&mut self) {
        self.status = SessionStatus::Terminated;
    }

    pub fn set_voice_active(&mut self, active: bool) {
        self.voice_active = active;
    }

    pub fn voice_active(&self) -> bool {
        self.voice_active
    }
}

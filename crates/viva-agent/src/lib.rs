//! Interview agent: dialogue turns, post-hoc evaluation, and the
//! per-connection session orchestrator that wires the media pipeline to them.
//!
//! The orchestrator consumes [`SessionInput`]s from a transport, drives
//! listen -> transcribe -> respond -> synthesize for every finalized
//! transcript, and emits [`SessionOutput`]s back. When the session closes it
//! always produces an evaluation.

pub mod dialogue;
pub mod evaluator;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod transcript;

pub use dialogue::{DialogueManager, ModelSettings, Reply};
pub use evaluator::{Evaluator, parse_evaluation};
pub use orchestrator::{
    SessionBackends, SessionInput, SessionOrchestrator, SessionOutput,
    SessionReport, SessionSettings, VadFactory,
};
pub use session::{InterviewSession, SharedSession};
pub use transcript::{format_transcript, parse_transcript};

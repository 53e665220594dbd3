//! Media pipeline: frame decoding, voice activity gating, utterance
//! assembly, streaming transcription, and speech synthesis.

pub mod codec;
pub mod stt;
pub mod transcription;
pub mod tts;
pub mod utterance;
pub mod vad;
pub mod voice_session;

pub use codec::{AudioFrame, FrameDecoder};
pub use stt::{AudioSegment, SttResult, TranscriptionBackend, TranscriptionStream, WhisperHttpBackend};
pub use transcription::{TranscriptionOptions, TranscriptionSession};
pub use tts::{ElevenLabsBackend, SpeechSynthesizer, SynthesisBackend};
pub use utterance::{Utterance, UtteranceAssembler};
pub use vad::{EnergyScorer, VadScorer, VoiceActivityGate, VoiceWindow};
pub use voice_session::VoiceSession;

//! Voice session: decodes inbound blocks, gates them, emits completed utterances.

use tracing::debug;
use viva_core::config::VadConfig;
use viva_core::error::DecodeError;

use crate::codec::FrameDecoder;
use crate::utterance::{Utterance, UtteranceAssembler};
use crate::vad::{EnergyScorer, VadScorer, VoiceActivityGate};

/// Ingest-side audio state for one connection.
///
/// Owned by the single task that reads the transport, so the voice window
/// is never shared.
pub struct VoiceSession {
    decoder: FrameDecoder,
    gate: VoiceActivityGate,
    assembler: UtteranceAssembler,
    frames_seen: u64,
}

impl VoiceSession {
    pub fn new(config: &VadConfig, scorer: Box<dyn VadScorer>) -> Self {
        Self {
            decoder: FrameDecoder::from_config(config),
            gate: VoiceActivityGate::new(config, scorer),
            assembler: UtteranceAssembler::from_config(config),
            frames_seen: 0,
        }
    }

    /// Session using the built-in energy scorer.
    pub fn with_energy_scorer(config: &VadConfig) -> Self {
        Self::new(config, Box::new(EnergyScorer::default()))
    }

    /// Process one inbound audio block, returning any utterances it closed.
    ///
    /// A malformed block is rejected as a whole; state is left as it was.
    pub fn push_block(&mut self, bytes: &[u8]) -> Result<Vec<Utterance>, DecodeError> {
        let frames = self.decoder.decode(bytes)?;
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let probabilities = self.gate.score(&frames);
        self.frames_seen += frames.len() as u64;

        let mut closed = Vec::new();
        for (frame, probability) in frames.into_iter().zip(probabilities) {
            let is_voice = self.gate.observe(&[probability]);
            if let Some(utterance) = self.assembler.push(frame, is_voice) {
                debug!(
                    frames = utterance.frame_count(),
                    duration_ms = utterance.duration().as_millis() as u64,
                    "Utterance closed"
                );
                closed.push(utterance);
            }
        }
        Ok(closed)
    }

    /// Close out the stream: drop the partial frame and finalize any in-flight utterance.
    pub fn finish(&mut self) -> Option<Utterance> {
        let discarded = self.decoder.flush();
        if discarded > 0 {
            debug!(samples = discarded, "Discarding trailing partial frame");
        }
        self.gate.reset();
        self.assembler.finish()
    }

    pub fn is_voice(&self) -> bool {
        self.gate.is_voice()
    }

    pub fn is_collecting(&self) -> bool {
        self.assembler.is_collecting()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::linear_to_mulaw;

    fn block(level: i16, frames: usize) -> Vec<u8> {
        vec![linear_to_mulaw(level); 240 * frames]
    }

    #[test]
    fn test_speech_then_silence_emits_one_utterance() {
        let mut session = VoiceSession::with_energy_scorer(&VadConfig::default());
        let mut utterances = session.push_block(&block(0, 20)).unwrap();
        assert!(utterances.is_empty());

        utterances.extend(session.push_block(&block(4000, 30)).unwrap());
        assert!(session.is_voice());
        assert!(session.is_collecting());

        utterances.extend(session.push_block(&block(0, 30)).unwrap());
        assert_eq!(utterances.len(), 1);
        assert!(!session.is_collecting());
        assert_eq!(session.frames_seen(), 80);
        assert!(utterances[0].frame_count() >= 10);
    }

    #[test]
    fn test_small_blocks_assemble_the_same_utterance() {
        let mut audio = block(0, 10);
        audio.extend(block(4000, 30));
        audio.extend(block(0, 30));

        let mut whole = VoiceSession::with_energy_scorer(&VadConfig::default());
        let expected = whole.push_block(&audio).unwrap();

        let mut split = VoiceSession::with_energy_scorer(&VadConfig::default());
        let mut got = Vec::new();
        for chunk in audio.chunks(160) {
            got.extend(split.push_block(chunk).unwrap());
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_malformed_block_is_rejected() {
        let config = VadConfig {
            max_block_bytes: 100,
            ..VadConfig::default()
        };
        let mut session = VoiceSession::with_energy_scorer(&config);
        assert!(session.push_block(&[0xFF; 200]).is_err());
        assert_eq!(session.frames_seen(), 0);
    }

    #[test]
    fn test_finish_flushes_speech_in_progress() {
        let mut session = VoiceSession::with_energy_scorer(&VadConfig::default());
        session.push_block(&block(4000, 25)).unwrap();
        session.push_block(&[0xFF; 100]).unwrap();
        let utterance = session.finish().expect("speech in progress");
        assert!(utterance.frame_count() >= 10);
        assert!(session.finish().is_none());
    }
}

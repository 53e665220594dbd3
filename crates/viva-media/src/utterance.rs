//! Utterance assembly: collects gated frames between speech start and end.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;
use viva_core::config::VadConfig;

use crate::codec::{AudioFrame, linear_to_mulaw};

/// A closed, non-empty run of contiguous frames. Never mutated after hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
}

impl Utterance {
    /// Returns `None` for an empty frame list.
    pub fn new(frames: Vec<AudioFrame>, sample_rate: u32) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frames,
            sample_rate,
        })
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sample_count() as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Concatenated linear PCM.
    pub fn to_pcm(&self) -> Vec<i16> {
        let mut pcm = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            pcm.extend_from_slice(frame.samples());
        }
        pcm
    }

    /// Re-encoded as G.711 μ-law, one byte per sample.
    pub fn to_mulaw(&self) -> Vec<u8> {
        self.frames
            .iter()
            .flat_map(|f| f.samples().iter().map(|&s| linear_to_mulaw(s)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Idle,
    Collecting,
}

/// Two-state machine turning per-frame voice decisions into utterances.
///
/// Idle -> Collecting on the first voiced decision. The gate needs several
/// voiced frames before it flips, so up to `preroll` frames heard while idle
/// open the utterance. While collecting, every frame is kept until `hangover`
/// consecutive unvoiced decisions close the utterance, or it reaches
/// `max_frames`. Utterances whose speech span is shorter than `min_frames`
/// are discarded.
pub struct UtteranceAssembler {
    state: AssemblerState,
    frames: Vec<AudioFrame>,
    recent: VecDeque<AudioFrame>,
    /// Pre-roll frames at the head of `frames`.
    lead_in: usize,
    silent_run: usize,
    hangover: usize,
    min_frames: usize,
    preroll: usize,
    max_frames: usize,
    sample_rate: u32,
}

impl UtteranceAssembler {
    pub fn new(hangover: usize, min_frames: usize, sample_rate: u32) -> Self {
        Self {
            state: AssemblerState::Idle,
            frames: Vec::new(),
            recent: VecDeque::new(),
            lead_in: 0,
            silent_run: 0,
            hangover: hangover.max(1),
            min_frames,
            preroll: 0,
            max_frames: usize::MAX,
            sample_rate,
        }
    }

    pub fn with_preroll(mut self, frames: usize) -> Self {
        self.preroll = frames;
        self
    }

    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames.max(1);
        self
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.hangover_frames(),
            config.min_utterance_frames(),
            config.sample_rate,
        )
        .with_preroll(config.preroll_frames())
        .with_max_frames(config.max_utterance_frames())
    }

    pub fn is_collecting(&self) -> bool {
        self.state == AssemblerState::Collecting
    }

    /// Frames buffered for the utterance in progress.
    pub fn buffered_frames(&self) -> usize {
        self.frames.len()
    }

    /// Feed one frame with the gate's decision for it.
    pub fn push(&mut self, frame: AudioFrame, is_voice: bool) -> Option<Utterance> {
        match self.state {
            AssemblerState::Idle => {
                if !is_voice {
                    if self.preroll > 0 {
                        if self.recent.len() == self.preroll {
                            self.recent.pop_front();
                        }
                        self.recent.push_back(frame);
                    }
                    return None;
                }
                self.state = AssemblerState::Collecting;
                self.lead_in = self.recent.len();
                self.frames.extend(self.recent.drain(..));
                self.frames.push(frame);
                self.silent_run = 0;
                self.cap()
            }
            AssemblerState::Collecting => {
                self.frames.push(frame);
                if is_voice {
                    self.silent_run = 0;
                } else {
                    self.silent_run += 1;
                }
                if self.silent_run >= self.hangover {
                    self.close()
                } else {
                    self.cap()
                }
            }
        }
    }

    /// Close any utterance in progress, e.g. when the session ends.
    pub fn finish(&mut self) -> Option<Utterance> {
        match self.state {
            AssemblerState::Idle => None,
            AssemblerState::Collecting => self.close(),
        }
    }

    /// Force-close an utterance that has grown to the length limit.
    fn cap(&mut self) -> Option<Utterance> {
        if self.frames.len() < self.max_frames {
            return None;
        }
        debug!(frames = self.frames.len(), "Utterance reached maximum length");
        self.close()
    }

    fn close(&mut self) -> Option<Utterance> {
        let frames = std::mem::take(&mut self.frames);
        let speech = frames
            .len()
            .saturating_sub(self.silent_run)
            .saturating_sub(self.lead_in);
        self.state = AssemblerState::Idle;
        self.silent_run = 0;
        self.lead_in = 0;

        if speech < self.min_frames {
            debug!(
                frames = speech,
                min = self.min_frames,
                "Discarding short utterance"
            );
            return None;
        }
        Utterance::new(frames, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(level: i16) -> AudioFrame {
        AudioFrame::new(vec![level; 240])
    }

    fn assembler() -> UtteranceAssembler {
        UtteranceAssembler::from_config(&VadConfig::default())
    }

    /// Run a sequence of decisions through the assembler, collecting emissions.
    fn run(assembler: &mut UtteranceAssembler, decisions: &[bool]) -> Vec<Utterance> {
        decisions
            .iter()
            .filter_map(|&v| assembler.push(frame(if v { 1000 } else { 0 }), v))
            .collect()
    }

    #[test]
    fn test_empty_utterance_rejected() {
        assert!(Utterance::new(Vec::new(), 8000).is_none());
    }

    #[test]
    fn test_utterance_metrics() {
        let u = Utterance::new(vec![frame(0); 10], 8000).unwrap();
        assert_eq!(u.sample_count(), 2400);
        assert_eq!(u.duration(), Duration::from_millis(300));
        assert_eq!(u.to_pcm().len(), 2400);
        assert_eq!(u.to_mulaw(), vec![0xFF; 2400]);
    }

    #[test]
    fn test_idle_ignores_silence() {
        let mut a = assembler();
        assert!(run(&mut a, &[false; 50]).is_empty());
        assert!(!a.is_collecting());
        assert_eq!(a.buffered_frames(), 0);
    }

    #[test]
    fn test_utterance_closes_after_hangover() {
        let mut a = assembler();
        let mut decisions = vec![true; 15];
        decisions.extend([false; 9]);
        assert!(run(&mut a, &decisions).is_empty());
        assert!(a.is_collecting());

        let emitted = run(&mut a, &[false]);
        assert_eq!(emitted.len(), 1);
        // Speech plus the full hangover tail
        assert_eq!(emitted[0].frame_count(), 25);
        assert!(!a.is_collecting());
        assert_eq!(a.buffered_frames(), 0);
    }

    #[test]
    fn test_pause_shorter_than_hangover_keeps_collecting() {
        let mut a = assembler();
        let mut decisions = vec![true; 12];
        decisions.extend([false; 5]);
        decisions.extend([true; 12]);
        decisions.extend([false; 10]);
        let emitted = run(&mut a, &decisions);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].frame_count(), 39);
    }

    #[test]
    fn test_short_fragment_discarded() {
        let mut a = assembler();
        let mut decisions = vec![true; 4];
        decisions.extend([false; 10]);
        assert!(run(&mut a, &decisions).is_empty());
        assert!(!a.is_collecting());
    }

    #[test]
    fn test_two_utterances_in_sequence() {
        let mut a = assembler();
        let mut decisions = Vec::new();
        for _ in 0..2 {
            decisions.extend([true; 10]);
            decisions.extend([false; 10]);
        }
        let emitted = run(&mut a, &decisions);
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|u| u.frame_count() == 20));
    }

    #[test]
    fn test_finish_closes_in_flight_utterance() {
        let mut a = assembler();
        run(&mut a, &[true; 12]);
        let u = a.finish().expect("in-flight utterance");
        assert_eq!(u.frame_count(), 12);
        assert!(a.finish().is_none());
    }

    #[test]
    fn test_preroll_keeps_audio_before_the_gate_opens() {
        let mut a = assembler();
        for level in 1..=15 {
            assert!(a.push(frame(level), false).is_none());
        }
        let mut decisions = vec![true; 12];
        decisions.extend([false; 10]);
        let emitted = run(&mut a, &decisions);

        assert_eq!(emitted.len(), 1);
        // Only the last window of idle audio is kept
        assert_eq!(emitted[0].frame_count(), 10 + 12 + 10);
        assert_eq!(emitted[0].frames()[0].samples()[0], 6);
    }

    #[test]
    fn test_preroll_does_not_count_as_speech() {
        let mut a = assembler();
        for _ in 0..10 {
            a.push(frame(0), false);
        }
        let mut decisions = vec![true; 4];
        decisions.extend([false; 10]);
        assert!(run(&mut a, &decisions).is_empty());
    }

    #[test]
    fn test_long_speech_split_at_maximum_length() {
        let mut a = UtteranceAssembler::new(10, 10, 8000).with_max_frames(20);
        let emitted = run(&mut a, &[true; 45]);
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|u| u.frame_count() == 20));
        assert!(a.is_collecting());
        assert_eq!(a.buffered_frames(), 5);
    }

    #[test]
    fn test_finish_applies_minimum_length() {
        let mut a = assembler();
        run(&mut a, &[true, true, true, false, false]);
        assert!(a.finish().is_none());
    }
}

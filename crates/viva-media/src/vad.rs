//! Windowed voice activity gating over per-frame voice probabilities.

use std::collections::VecDeque;

use tracing::warn;
use viva_core::config::VadConfig;

use crate::codec::AudioFrame;

/// Tolerance for ratio comparisons so that e.g. 7/10 meets a 0.7 target.
const RATIO_EPSILON: f64 = 1e-9;

/// Maps a fixed-size PCM frame to a voice probability in `[0, 1]`.
pub trait VadScorer: Send {
    fn score(&mut self, frame: &AudioFrame) -> f32;

    /// Score several frames in one call. Models that batch natively override this.
    fn score_batch(&mut self, frames: &[AudioFrame]) -> Vec<f32> {
        frames.iter().map(|f| self.score(f)).collect()
    }
}

/// Energy-based scorer: a logistic curve over the frame's RMS.
pub struct EnergyScorer {
    /// RMS at which the probability crosses 0.5.
    midpoint: f64,
    /// RMS distance over which the curve rises from ~0.27 to ~0.73.
    softness: f64,
}

impl EnergyScorer {
    pub fn new(midpoint: f64, softness: f64) -> Self {
        Self {
            midpoint,
            softness: softness.max(f64::EPSILON),
        }
    }

    /// Compute RMS energy of a PCM frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }
}

impl Default for EnergyScorer {
    /// Tuned for 8 kHz telephony speech decoded from μ-law.
    fn default() -> Self {
        Self::new(500.0, 100.0)
    }
}

impl VadScorer for EnergyScorer {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        let energy = Self::rms(frame.samples());
        (1.0 / (1.0 + (-(energy - self.midpoint) / self.softness).exp())) as f32
    }
}

/// Ring buffer of the most recent frame probabilities. Oldest entries drop first.
#[derive(Debug, Clone)]
pub struct VoiceWindow {
    probabilities: VecDeque<f32>,
    capacity: usize,
}

impl VoiceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            probabilities: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, probability: f32) {
        if self.probabilities.len() == self.capacity {
            self.probabilities.pop_front();
        }
        self.probabilities.push_back(probability);
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries strictly above `threshold`.
    pub fn count_above(&self, threshold: f32) -> usize {
        self.probabilities.iter().filter(|&&p| p > threshold).count()
    }

    pub fn clear(&mut self) {
        self.probabilities.clear();
    }
}

/// Decides voice / no-voice from a sliding window of probabilities.
///
/// Voice is reported when at least `activation_ratio` of the window exceeds
/// `voice_threshold`. Until the window is `min_fill_ratio` full the gate
/// reports no voice.
pub struct VoiceActivityGate {
    scorer: Box<dyn VadScorer>,
    window: VoiceWindow,
    voice_threshold: f32,
    activation_ratio: f64,
    min_fill_ratio: f64,
    batch_size: usize,
    is_voice: bool,
}

impl VoiceActivityGate {
    pub fn new(config: &VadConfig, scorer: Box<dyn VadScorer>) -> Self {
        Self {
            scorer,
            window: VoiceWindow::new(config.window_frames()),
            voice_threshold: config.voice_threshold,
            activation_ratio: config.activation_ratio,
            min_fill_ratio: config.min_fill_ratio,
            batch_size: config.batch_size.max(1),
            is_voice: false,
        }
    }

    /// Score frames through the model, at most `batch_size` per call.
    pub fn score(&mut self, frames: &[AudioFrame]) -> Vec<f32> {
        let mut probabilities = Vec::with_capacity(frames.len());
        for batch in frames.chunks(self.batch_size) {
            let mut scores = self.scorer.score_batch(batch);
            if scores.len() != batch.len() {
                warn!(
                    expected = batch.len(),
                    got = scores.len(),
                    "VAD scorer returned wrong batch size"
                );
                scores.resize(batch.len(), 0.0);
            }
            probabilities.extend(scores.into_iter().map(sanitize));
        }
        probabilities
    }

    /// Append probabilities to the window and return the current decision.
    pub fn observe(&mut self, probabilities: &[f32]) -> bool {
        for &p in probabilities {
            self.window.push(sanitize(p));
        }
        self.is_voice = self.decide();
        self.is_voice
    }

    /// The most recent decision.
    pub fn is_voice(&self) -> bool {
        self.is_voice
    }

    pub fn window(&self) -> &VoiceWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.is_voice = false;
    }

    fn decide(&self) -> bool {
        let len = self.window.len();
        let required = self.window.capacity() as f64 * self.min_fill_ratio;
        if len == 0 || (len as f64) + RATIO_EPSILON < required {
            return false;
        }
        let ratio = self.window.count_above(self.voice_threshold) as f64 / len as f64;
        ratio + RATIO_EPSILON >= self.activation_ratio
    }
}

fn sanitize(p: f32) -> f32 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer(f32);

    impl VadScorer for FixedScorer {
        fn score(&mut self, _frame: &AudioFrame) -> f32 {
            self.0
        }
    }

    /// Records the size of every batch it is asked to score.
    struct BatchRecorder(std::sync::Arc<std::sync::Mutex<Vec<usize>>>);

    impl VadScorer for BatchRecorder {
        fn score(&mut self, _frame: &AudioFrame) -> f32 {
            0.0
        }

        fn score_batch(&mut self, frames: &[AudioFrame]) -> Vec<f32> {
            self.0.lock().unwrap().push(frames.len());
            vec![0.0; frames.len()]
        }
    }

    fn gate() -> VoiceActivityGate {
        VoiceActivityGate::new(&VadConfig::default(), Box::new(FixedScorer(0.0)))
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = VoiceWindow::new(3);
        for p in [0.9, 0.9, 0.1, 0.1] {
            window.push(p);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.count_above(0.5), 1);
    }

    #[test]
    fn test_voice_after_seventy_percent_fill() {
        let mut gate = gate();
        assert_eq!(gate.window().capacity(), 10);
        for frame in 1..=10 {
            let voice = gate.observe(&[0.9]);
            assert_eq!(voice, frame >= 7, "frame {frame}");
        }
    }

    #[test]
    fn test_cold_start_reports_no_voice() {
        let mut gate = gate();
        assert!(!gate.observe(&[1.0; 6]));
        assert!(!gate.is_voice());
        assert!(gate.observe(&[1.0]));
    }

    #[test]
    fn test_ratio_boundary() {
        // Exactly 7 of 10 above threshold
        let mut gate = gate();
        let probs = [0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.1, 0.1, 0.1];
        assert!(gate.observe(&probs));

        // Only 6 of 10: spikes alone do not open the gate
        let mut gate = self::gate();
        let probs = [0.9, 0.1, 0.9, 0.1, 0.9, 0.9, 0.1, 0.9, 0.9, 0.1];
        assert!(!gate.observe(&probs));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut gate = gate();
        assert!(!gate.observe(&[0.5; 10]));
    }

    #[test]
    fn test_brief_pause_does_not_flicker() {
        let mut gate = gate();
        gate.observe(&[0.9; 10]);
        // Two quiet frames inside a sentence keep 8/10 voiced
        assert!(gate.observe(&[0.05]));
        assert!(gate.observe(&[0.05]));
        assert!(gate.observe(&[0.9]));
    }

    #[test]
    fn test_voice_ends_when_window_goes_quiet() {
        let mut gate = gate();
        gate.observe(&[0.9; 10]);
        let mut decisions = Vec::new();
        for _ in 0..5 {
            decisions.push(gate.observe(&[0.0]));
        }
        // 3 quiet frames leave 7/10 voiced; the fourth drops below
        assert_eq!(decisions, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_out_of_range_probabilities_sanitized() {
        let mut gate = gate();
        assert!(!gate.observe(&[f32::NAN; 10]));
        gate.reset();
        assert!(gate.observe(&[7.0; 10]));
    }

    #[test]
    fn test_scoring_batches_of_sixteen() {
        let sizes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut gate = VoiceActivityGate::new(
            &VadConfig::default(),
            Box::new(BatchRecorder(sizes.clone())),
        );
        let frames = vec![AudioFrame::new(vec![0; 240]); 40];
        let probs = gate.score(&frames);
        assert_eq!(probs.len(), 40);
        assert_eq!(*sizes.lock().unwrap(), vec![16, 16, 8]);
    }

    #[test]
    fn test_energy_scorer_separates_speech_from_silence() {
        let mut scorer = EnergyScorer::default();
        let silence = scorer.score(&AudioFrame::new(vec![0; 240]));
        let speech = scorer.score(&AudioFrame::new(vec![3000; 240]));
        assert!(silence < 0.05, "silence scored {silence}");
        assert!(speech > 0.95, "speech scored {speech}");
    }

    #[test]
    fn test_rms_calculation() {
        assert_eq!(EnergyScorer::rms(&[0i16; 320]), 0.0);
        assert!((EnergyScorer::rms(&[100i16; 320]) - 100.0).abs() < 0.01);
        assert_eq!(EnergyScorer::rms(&[]), 0.0);
    }
}

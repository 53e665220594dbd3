//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::AudioEncoding;

/// Top-level Viva configuration, read from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// How long to wait for the stream `start` frame before falling back to
    /// the default job description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    8765
}

/// Per-interview lifetime and queueing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard cap on a single interview (default: 30 minutes).
    pub max_duration_secs: u64,

    /// Grace period for queued turns after a graceful end, never past the hard cap.
    pub drain_timeout_secs: u64,

    /// Opening line spoken before the candidate says anything.
    pub greeting: Option<String>,

    /// Used when the stream does not carry a job description.
    pub default_job_description: String,

    pub utterance_queue: usize,
    pub transcript_queue: usize,
    pub outbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 30 * 60,
            drain_timeout_secs: 10,
            greeting: Some(
                "Thank you for your time today. Let's begin with your experience.".into(),
            ),
            default_job_description: "General software engineering role.".into(),
            utterance_queue: 8,
            transcript_queue: 8,
            outbound_queue: 64,
        }
    }
}

/// Voice activity gating parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    /// Wall-clock span of the smoothing window.
    pub window_ms: u32,
    /// A frame counts as voiced when its probability exceeds this.
    pub voice_threshold: f32,
    /// Fraction of voiced frames in the window needed to report voice.
    pub activation_ratio: f64,
    /// Fraction of the window that must be filled before any decision is trusted.
    pub min_fill_ratio: f64,
    /// Maximum frames per scorer call.
    pub batch_size: usize,
    /// Consecutive no-voice time that closes an utterance (default: one window).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hangover_ms: Option<u32>,
    /// Shorter utterances are discarded (default: one window).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_utterance_ms: Option<u32>,
    /// Audio kept from before the gate opens, so the first word is not
    /// clipped (default: one window).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preroll_ms: Option<u32>,
    /// Longer utterances are closed early and transcribed in pieces.
    pub max_utterance_ms: u32,
    pub encoding: AudioEncoding,
    pub max_block_bytes: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_ms: 30,
            window_ms: 300,
            voice_threshold: 0.5,
            activation_ratio: 0.7,
            min_fill_ratio: 0.7,
            batch_size: 16,
            hangover_ms: None,
            min_utterance_ms: None,
            preroll_ms: None,
            max_utterance_ms: 30_000,
            encoding: AudioEncoding::Mulaw,
            max_block_bytes: 64 * 1024,
        }
    }
}

impl VadConfig {
    /// Samples per frame (240 at 8 kHz / 30 ms).
    pub fn frame_size(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Window capacity in frames (10 for 300 ms of 30 ms frames).
    pub fn window_frames(&self) -> usize {
        self.ms_to_frames(self.window_ms).max(1)
    }

    pub fn hangover_frames(&self) -> usize {
        self.hangover_ms
            .map(|ms| self.ms_to_frames(ms).max(1))
            .unwrap_or_else(|| self.window_frames())
    }

    pub fn min_utterance_frames(&self) -> usize {
        self.min_utterance_ms
            .map(|ms| self.ms_to_frames(ms))
            .unwrap_or_else(|| self.window_frames())
    }

    pub fn preroll_frames(&self) -> usize {
        self.preroll_ms
            .map(|ms| self.ms_to_frames(ms))
            .unwrap_or_else(|| self.window_frames())
    }

    pub fn max_utterance_frames(&self) -> usize {
        self.ms_to_frames(self.max_utterance_ms).max(1)
    }

    fn ms_to_frames(&self, ms: u32) -> usize {
        if self.frame_ms == 0 {
            return 0;
        }
        (ms / self.frame_ms) as usize
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Completion providers in failover order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

/// Configuration for a single completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "openai", "groq", "openrouter", or "ollama".
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech-to-text backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "groq" or "openai" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// ISO-639-1 language hint (default: "en").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_backoff_ms: Option<u64>,

    /// Per-upload timeout; a stalled request counts as a dropped connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
            language: None,
            base_url: None,
            max_reconnect_attempts: None,
            reconnect_backoff_ms: None,
            request_timeout_secs: None,
        }
    }
}

fn default_transcription_provider() -> String {
    "groq".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts.unwrap_or(5)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.unwrap_or(500))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }
}

/// Text-to-speech (TTS) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider (default: "elevenlabs").
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Voice ID as used in the `/v1/text-to-speech/{voice_id}` path
    /// (default: Bella, `EXAVITQu4vr4xnSDxMaL`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    /// Default model ID (e.g. "eleven_monolingual_v1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Output format (default: "ulaw_8000", playable on the call as-is).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// A synthesis call running longer than this plays nothing (default: 15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: None,
            default_voice: None,
            default_model: None,
            output_format: None,
            base_url: None,
            request_timeout_secs: None,
        }
    }
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(15))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "viva_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VivaError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VivaError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.viva/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8765)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .as_ref()
                .and_then(|g| g.start_timeout_secs)
                .unwrap_or(5),
        )
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn vad(&self) -> VadConfig {
        self.vad.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_secs(self.session().max_duration_secs)
    }

    /// Model used for both interview turns and evaluation.
    pub fn default_model(&self) -> String {
        let models = self.models.as_ref();
        models
            .and_then(|m| m.model.clone())
            .or_else(|| {
                models
                    .and_then(|m| m.providers.as_ref())
                    .and_then(|p| p.first())
                    .and_then(|p| p.default_model.clone())
            })
            .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string())
    }

    pub fn temperature(&self) -> f64 {
        self.models
            .as_ref()
            .and_then(|m| m.temperature)
            .unwrap_or(0.5)
    }

    pub fn max_tokens(&self) -> u32 {
        self.models
            .as_ref()
            .and_then(|m| m.max_tokens)
            .unwrap_or(500)
    }

    pub fn evaluation_temperature(&self) -> f64 {
        self.models
            .as_ref()
            .and_then(|m| m.evaluation_temperature)
            .unwrap_or(0.2)
    }

    pub fn evaluation_max_tokens(&self) -> u32 {
        self.models
            .as_ref()
            .and_then(|m| m.evaluation_max_tokens)
            .unwrap_or(300)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.models
                .as_ref()
                .and_then(|m| m.request_timeout_secs)
                .unwrap_or(30),
        )
    }

    /// Configured completion providers in failover order.
    pub fn providers(&self) -> &[ProviderConfig] {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_deref())
            .unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.providers().is_empty() {
            warnings.push("No completion providers configured".to_string());
        }
        for p in self.providers() {
            if p.id != "ollama" && p.resolve_api_key().is_none() {
                warnings.push(format!("Provider '{}' has no API key configured", p.id));
            }
        }
        if self.transcription().resolve_api_key().is_none() {
            warnings.push("Transcription has no API key configured".to_string());
        }
        if self.tts().resolve_api_key().is_none() {
            warnings.push("TTS has no API key configured".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        let session = self.session();
        if session.max_duration_secs == 0 {
            errors.push("session.max_duration_secs must be positive".to_string());
        }
        if session.utterance_queue == 0
            || session.transcript_queue == 0
            || session.outbound_queue == 0
        {
            errors.push("session queue depths must be positive".to_string());
        }

        let vad = self.vad();
        if vad.sample_rate == 0 || vad.frame_ms == 0 || vad.frame_size() == 0 {
            errors.push("vad.sample_rate and vad.frame_ms must be positive".to_string());
        }
        if vad.window_ms < vad.frame_ms {
            errors.push("vad.window_ms must span at least one frame".to_string());
        }
        if !(0.0..=1.0).contains(&vad.voice_threshold) {
            errors.push("vad.voice_threshold must be within [0, 1]".to_string());
        }
        for (name, ratio) in [
            ("activation_ratio", vad.activation_ratio),
            ("min_fill_ratio", vad.min_fill_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                errors.push(format!("vad.{name} must be within (0, 1]"));
            }
        }
        if vad.batch_size == 0 {
            errors.push("vad.batch_size must be positive".to_string());
        }
        if vad.max_utterance_frames() < vad.min_utterance_frames().max(1) {
            errors.push("vad.max_utterance_ms is shorter than the minimum utterance".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for Viva data: `~/.viva/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".viva")
}

//! Speech synthesis: text in, playable audio bytes out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use viva_core::config::TtsConfig;
use viva_core::error::{Backend, VivaError};

/// ElevenLabs voice ID for "Bella".
pub const DEFAULT_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";

/// Used when no timeout is configured.
const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Build the ElevenLabs streaming TTS request URL for a given voice.
pub fn build_tts_url(base_url: &str, voice: &str) -> String {
    format!(
        "{}/v1/text-to-speech/{voice}/stream",
        base_url.trim_end_matches('/')
    )
}

/// ElevenLabs text-to-speech over HTTP.
pub struct ElevenLabsBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    voice: String,
    model: String,
    output_format: String,
}

impl ElevenLabsBackend {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.elevenlabs.io".into()),
            api_key: config.resolve_api_key(),
            voice: config
                .default_voice
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_ID.into()),
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| "eleven_monolingual_v1".into()),
            output_format: config
                .output_format
                .clone()
                .unwrap_or_else(|| "ulaw_8000".into()),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ElevenLabsBackend {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No TTS API key configured"))?;

        let url = build_tts_url(&self.base_url, &self.voice);
        debug!(voice = %self.voice, model = %self.model, text_len = text.len(), "Starting TTS request");

        let resp = self
            .client
            .post(&url)
            .query(&[("output_format", self.output_format.as_str())])
            .header("xi-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error {status}: {body}");
        }

        let audio = resp.bytes().await?.to_vec();
        Ok(audio)
    }
}

/// Adapter that never fails its caller: a backend error or a call that
/// outlives its timeout means "nothing to play".
#[derive(Clone)]
pub struct SpeechSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    timeout: Duration,
}

impl SpeechSynthesizer {
    pub fn new(backend: Arc<dyn SynthesisBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_SYNTHESIS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Synthesize `text`, returning empty audio on failure, timeout, or empty input.
    pub async fn synthesize(&self, text: &str) -> Vec<u8> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let result = match tokio::time::timeout(self.timeout, self.backend.synthesize(text)).await
        {
            Ok(result) => result.map_err(|e| VivaError::backend(Backend::Synthesis, e)),
            Err(_) => Err(VivaError::backend(Backend::Synthesis, "request timed out")),
        };
        match result {
            Ok(audio) => {
                debug!(backend = self.backend.id(), bytes = audio.len(), "Synthesized reply");
                audio
            }
            Err(e) => {
                warn!(backend = self.backend.id(), %e, "Synthesis failed, nothing to play");
                Vec::new()
            }
        }
    }
}

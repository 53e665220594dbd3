//! Speech-to-text backends.
//!
//! A backend connection is modeled as a pair of channels: segments are pushed
//! in, `{text, is_final}` results come back out in order.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use viva_core::config::TranscriptionConfig;

/// A block of linear PCM pushed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
}

/// One backend hypothesis. Only finals leave the transcription session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SttResult {
    pub text: String,
    pub is_final: bool,
}

impl SttResult {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// A live connection to a transcription backend.
///
/// Every segment sent on `audio_tx` yields zero or more interim results
/// followed by exactly one final result. An `Err` or a closed `results`
/// channel means the connection dropped.
pub struct TranscriptionStream {
    pub audio_tx: mpsc::UnboundedSender<AudioSegment>,
    pub results: mpsc::UnboundedReceiver<Result<SttResult>>,
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Open a new connection. Each call yields an independent stream.
    async fn connect(&self) -> Result<TranscriptionStream>;
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2; // 2 bytes per i16 sample
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Get the transcription API URL for the configured provider.
pub fn provider_url(config: &TranscriptionConfig) -> String {
    if let Some(base) = &config.base_url {
        return format!("{}/audio/transcriptions", base.trim_end_matches('/'));
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions".into(),
        _ => "https://api.groq.com/openai/v1/audio/transcriptions".into(),
    }
}

/// Whisper-compatible HTTP transcription (Groq, OpenAI).
///
/// The endpoint is request/response, so a "connection" is a worker task that
/// uploads each pushed segment as a WAV file and reports one final result.
#[derive(Clone)]
pub struct WhisperHttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    language: String,
    timeout: Duration,
}

impl WhisperHttpBackend {
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: config.request_timeout(),
            url: provider_url(config),
            api_key: config.resolve_api_key(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "whisper-large-v3-turbo".into()),
            language: config.language.clone().unwrap_or_else(|| "en".into()),
        }
    }

    /// Per-upload timeout. A stalled upload fails the connection.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn transcribe(&self, segment: &AudioSegment) -> Result<String> {
        transcribe_segment(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &self.model,
            &self.language,
            self.timeout,
            segment,
        )
        .await
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperHttpBackend {
    fn id(&self) -> &str {
        "whisper-http"
    }

    async fn connect(&self) -> Result<TranscriptionStream> {
        if self.api_key.is_none() {
            anyhow::bail!("No transcription API key configured");
        }

        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<AudioSegment>();
        let (results_tx, results) = mpsc::unbounded_channel();
        let worker = self.clone();

        tokio::spawn(async move {
            while let Some(segment) = audio_rx.recv().await {
                match worker.transcribe(&segment).await {
                    Ok(text) => {
                        if results_tx.send(Ok(SttResult::final_text(text))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%e, "Transcription request failed");
                        let _ = results_tx.send(Err(e));
                        break;
                    }
                }
            }
            debug!("Transcription connection closed");
        });

        Ok(TranscriptionStream { audio_tx, results })
    }
}

async fn transcribe_segment(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    model: &str,
    language: &str,
    timeout: Duration,
    segment: &AudioSegment,
) -> Result<String> {
    let api_key = api_key.ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;

    let wav_data = pcm_to_wav(&segment.pcm, segment.sample_rate, 1, 16);
    debug!(url, model, wav_bytes = wav_data.len(), "Sending audio for transcription");

    let part = reqwest::multipart::Part::bytes(wav_data)
        .file_name("utterance.wav")
        .mime_str("audio/wav")?;

    let form = reqwest::multipart::Form::new()
        .text("model", model.to_string())
        .text("language", language.to_string())
        .text("response_format", "text")
        .part("file", part);

    let resp = client
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .timeout(timeout)
        .multipart(form)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Transcription API error {status}: {body}");
    }

    let text = resp.text().await?;
    Ok(text.trim().to_string())
}

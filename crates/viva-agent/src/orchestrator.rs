//! Per-connection session orchestration.
//!
//! One [`SessionOrchestrator::run`] call owns one interview. The calling task
//! reads the transport and runs ingest (decode, gate, assemble, feed). A
//! spawned turn task consumes finalized transcripts one at a time and runs
//! dialogue and synthesis, so a slow completion call never stalls ingest.
//! The two sides meet only at the transcription queue and the shared
//! [`InterviewSession`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use viva_core::config::{Config, SessionConfig, VadConfig};
use viva_core::types::{CloseReason, ConversationTurn, EvaluationResult, TranscriptSegment};
use viva_media::{
    ElevenLabsBackend, EnergyScorer, SpeechSynthesizer, SynthesisBackend, TranscriptionBackend,
    TranscriptionOptions, TranscriptionSession, VadScorer, VoiceSession, WhisperHttpBackend,
};
use viva_providers::{Credentials, FailoverProvider, LlmProvider};

use crate::dialogue::{DialogueManager, ModelSettings};
use crate::evaluator::Evaluator;
use crate::session::{InterviewSession, SharedSession};

/// Builds a fresh scorer per session; scorers carry per-stream state.
pub type VadFactory = Arc<dyn Fn() -> Box<dyn VadScorer> + Send + Sync>;

/// What the transport hands the session. A closed channel means the peer is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Audio(Vec<u8>),
    End,
}

/// What the session hands back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    Audio(Vec<u8>),
    Evaluation(EvaluationResult),
    Error { code: String, message: String },
}

/// External services used by a session. Cheap to clone; shared across sessions.
#[derive(Clone)]
pub struct SessionBackends {
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub completion: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub synthesis: Arc<dyn SynthesisBackend>,
    pub vad: VadFactory,
}

impl SessionBackends {
    /// Production backends: HTTP transcription, the configured completion
    /// failover chain, ElevenLabs synthesis, and the energy scorer.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let completion = FailoverProvider::from_config(config)?;
        info!(providers = completion.len(), "Completion failover chain ready");
        Ok(Self {
            transcription: Arc::new(WhisperHttpBackend::from_config(&config.transcription())),
            completion: Arc::new(completion),
            // The failover chain carries per-provider credentials.
            credentials: Credentials::None,
            synthesis: Arc::new(ElevenLabsBackend::from_config(&config.tts())),
            vad: Arc::new(|| Box::new(EnergyScorer::default()) as Box<dyn VadScorer>),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub vad: VadConfig,
    pub session: SessionConfig,
    pub transcription: TranscriptionOptions,
    pub dialogue: ModelSettings,
    pub evaluation: ModelSettings,
    /// Longest a reply may take to synthesize before it is skipped.
    pub synthesis_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let vad = config.vad();
        let session = config.session();
        let transcription = TranscriptionOptions::from_config(
            &config.transcription(),
            &vad,
            session.utterance_queue,
            session.transcript_queue,
        );
        Self {
            vad,
            session,
            transcription,
            dialogue: ModelSettings::dialogue_from_config(config),
            evaluation: ModelSettings::evaluation_from_config(config),
            synthesis_timeout: config.tts().request_timeout(),
        }
    }

    fn max_duration(&self) -> Duration {
        Duration::from_secs(self.session.max_duration_secs)
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.session.drain_timeout_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            session: SessionConfig::default(),
            transcription: TranscriptionOptions::default(),
            dialogue: ModelSettings::default(),
            evaluation: ModelSettings {
                temperature: 0.2,
                max_tokens: 300,
                ..ModelSettings::default()
            },
            synthesis_timeout: Duration::from_secs(15),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: String,
    pub reason: CloseReason,
    pub duration: Duration,
    /// Utterances handed to transcription.
    pub utterances: u64,
    /// Completed dialogue turns, degraded ones included.
    pub turns: u64,
    pub degraded_turns: u64,
    pub decode_errors: u64,
    pub evaluation: EvaluationResult,
    /// Everything said on the call, in order.
    pub transcript: Vec<ConversationTurn>,
}

pub struct SessionOrchestrator {
    settings: SessionSettings,
    backends: SessionBackends,
}

impl SessionOrchestrator {
    pub fn new(settings: SessionSettings, backends: SessionBackends) -> Self {
        Self { settings, backends }
    }

    /// Drive one interview to completion.
    ///
    /// Returns once the session is terminated. An evaluation is always
    /// written to `outbound` before returning, unless the transport has
    /// already gone away.
    pub async fn run(
        &self,
        job_description: Option<String>,
        mut inbound: mpsc::Receiver<SessionInput>,
        outbound: mpsc::Sender<SessionOutput>,
    ) -> SessionReport {
        let started = Instant::now();
        let deadline = started + self.settings.max_duration();
        let id = uuid::Uuid::new_v4().to_string();
        let job_description = job_description
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| self.settings.session.default_job_description.clone());
        let session = InterviewSession::new(&id, job_description.clone()).shared();
        let cancel = CancellationToken::new();

        info!(session_id = %id, "Interview session started");

        let mut transcription = TranscriptionSession::open(
            self.backends.transcription.clone(),
            self.settings.transcription.clone(),
            cancel.child_token(),
        );
        let worker = TurnWorker {
            session_id: id.clone(),
            session: session.clone(),
            dialogue: DialogueManager::new(
                session.clone(),
                self.backends.completion.clone(),
                self.backends.credentials.clone(),
                self.settings.dialogue.clone(),
            ),
            synthesizer: SpeechSynthesizer::new(self.backends.synthesis.clone())
                .with_timeout(self.settings.synthesis_timeout),
            outbound: outbound.clone(),
            greeting: self
                .settings
                .session
                .greeting
                .clone()
                .filter(|g| !g.trim().is_empty()),
            cancel: cancel.clone(),
        };
        let mut turns = tokio::spawn(worker.run(transcription.results()));

        let mut voice = VoiceSession::new(&self.settings.vad, (self.backends.vad)());
        let mut voice_active = false;
        let mut utterances = 0u64;
        let mut decode_errors = 0u64;

        let reason = 'ingest: loop {
            let input = tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break 'ingest CloseReason::Timeout,
                input = inbound.recv() => input,
            };

            let block = match input {
                Some(SessionInput::Audio(block)) => block,
                Some(SessionInput::End) => break CloseReason::EndSignal,
                None => break CloseReason::TransportClosed,
            };

            let closed = match voice.push_block(&block) {
                Ok(closed) => closed,
                Err(e) => {
                    decode_errors += 1;
                    warn!(session_id = %id, %e, "Dropping malformed audio block");
                    continue;
                }
            };

            if voice.is_voice() != voice_active {
                voice_active = voice.is_voice();
                session.lock().await.set_voice_active(voice_active);
            }

            for utterance in closed {
                utterances += 1;
                match tokio::time::timeout_at(deadline, transcription.feed(utterance)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(session_id = %id, %e, "Utterance dropped"),
                    Err(_) => break 'ingest CloseReason::Timeout,
                }
            }
        };

        session.lock().await.begin_closing(reason);
        info!(session_id = %id, reason = reason.as_str(), "Interview session closing");

        let turn_stats = if reason == CloseReason::Timeout {
            cancel.cancel();
            drop(transcription);
            let _ = outbound
                .send(SessionOutput::Error {
                    code: "session_timeout".into(),
                    message: format!(
                        "Session reached the {} minute limit",
                        self.settings.session.max_duration_secs / 60
                    ),
                })
                .await;
            join_turns(turns).await
        } else {
            if let Some(utterance) = voice.finish() {
                utterances += 1;
                match tokio::time::timeout_at(deadline, transcription.feed(utterance)).await {
                    Ok(Ok(())) => debug!(session_id = %id, "Final utterance queued"),
                    Ok(Err(e)) => warn!(session_id = %id, %e, "Final utterance dropped"),
                    Err(_) => cancel.cancel(),
                }
            }
            // Closes the utterance queue; the turn task ends once every
            // queued transcript has been answered.
            drop(transcription);

            let drain_deadline = (Instant::now() + self.settings.drain_timeout()).min(deadline);
            match tokio::time::timeout_at(drain_deadline, &mut turns).await {
                Ok(joined) => joined.unwrap_or_else(|e| {
                    warn!(session_id = %id, %e, "Turn task failed");
                    TurnStats::default()
                }),
                Err(_) => {
                    warn!(session_id = %id, "Drain window elapsed, abandoning queued turns");
                    cancel.cancel();
                    join_turns(turns).await
                }
            }
        };
        cancel.cancel();

        let transcript = session.lock().await.transcript().to_vec();
        let evaluator = Evaluator::new(
            self.backends.completion.clone(),
            self.backends.credentials.clone(),
            self.settings.evaluation.clone(),
        );
        let evaluation = evaluator.evaluate(&job_description, &transcript).await;
        if outbound
            .send(SessionOutput::Evaluation(evaluation.clone()))
            .await
            .is_err()
        {
            debug!(session_id = %id, "Transport gone before the evaluation was delivered");
        }

        session.lock().await.terminate();
        let duration = started.elapsed();
        info!(
            session_id = %id,
            reason = reason.as_str(),
            duration_secs = duration.as_secs(),
            utterances,
            turns = turn_stats.turns,
            verdict = evaluation.verdict.as_str(),
            "Interview session terminated"
        );

        SessionReport {
            id,
            reason,
            duration,
            utterances,
            turns: turn_stats.turns,
            degraded_turns: turn_stats.degraded,
            decode_errors,
            evaluation,
            transcript,
        }
    }
}

async fn join_turns(turns: tokio::task::JoinHandle<TurnStats>) -> TurnStats {
    turns.await.unwrap_or_else(|e| {
        warn!(%e, "Turn task failed");
        TurnStats::default()
    })
}

#[derive(Debug, Default)]
struct TurnStats {
    turns: u64,
    degraded: u64,
}

/// Serialized dialogue: one transcript segment at a time, in arrival order.
struct TurnWorker {
    session_id: String,
    session: SharedSession,
    dialogue: DialogueManager,
    synthesizer: SpeechSynthesizer,
    outbound: mpsc::Sender<SessionOutput>,
    greeting: Option<String>,
    cancel: CancellationToken,
}

impl TurnWorker {
    async fn run(self, transcripts: Option<ReceiverStream<TranscriptSegment>>) -> TurnStats {
        let mut stats = TurnStats::default();

        let greeted = match &self.greeting {
            Some(greeting) => {
                self.dialogue.greet(greeting).await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => false,
                    _ = self.speak(greeting) => true,
                }
            }
            None => true,
        };

        let Some(mut transcripts) = transcripts else {
            return stats;
        };
        if greeted {
            self.answer(&mut transcripts, &mut stats).await;
        }
        self.record_unanswered(transcripts).await;
        stats
    }

    async fn answer(
        &self,
        transcripts: &mut ReceiverStream<TranscriptSegment>,
        stats: &mut TurnStats,
    ) {
        loop {
            let segment = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                segment = transcripts.next() => segment,
            };
            let Some(segment) = segment else {
                break;
            };

            self.session.lock().await.record_segment(&segment);
            debug!(session_id = %self.session_id, seq = segment.seq, "Turn started");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                degraded = self.take_turn(&segment) => {
                    stats.turns += 1;
                    if degraded {
                        stats.degraded += 1;
                    }
                }
            }
        }
    }

    /// Segments still queued when the session closed get no reply, but
    /// they are part of what the candidate said.
    async fn record_unanswered(&self, transcripts: ReceiverStream<TranscriptSegment>) {
        let mut transcripts = transcripts.into_inner();
        let mut session = self.session.lock().await;
        while let Ok(segment) = transcripts.try_recv() {
            debug!(session_id = %self.session_id, seq = segment.seq, "Transcript left unanswered");
            session.record_segment(&segment);
        }
    }

    /// Respond to one segment and play the reply. Returns whether the turn degraded.
    async fn take_turn(&self, segment: &TranscriptSegment) -> bool {
        let reply = self.dialogue.respond(&segment.text).await;
        self.speak(&reply.text).await;
        reply.degraded
    }

    async fn speak(&self, text: &str) {
        let audio = self.synthesizer.synthesize(text).await;
        if audio.is_empty() {
            return;
        }
        if self.outbound.send(SessionOutput::Audio(audio)).await.is_err() {
            debug!(session_id = %self.session_id, "Transport gone, reply not delivered");
        }
    }
}

//! Transcription session: one backend connection per interview, ordered finals out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use viva_core::config::{TranscriptionConfig, VadConfig};
use viva_core::error::{Backend, VivaError};
use viva_core::types::TranscriptSegment;

use crate::stt::{AudioSegment, SttResult, TranscriptionBackend, TranscriptionStream};
use crate::utterance::Utterance;

#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    pub sample_rate: u32,
    /// Consecutive failed connections before pending utterances are dropped.
    pub max_reconnect_attempts: u32,
    /// Base delay; the n-th retry waits `n * reconnect_backoff`.
    pub reconnect_backoff: Duration,
    /// Utterances waiting to be sent to the backend.
    pub queue_depth: usize,
    /// Finalized transcripts waiting for the consumer.
    pub results_depth: usize,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(500),
            queue_depth: 8,
            results_depth: 8,
        }
    }
}

impl TranscriptionOptions {
    pub fn from_config(
        transcription: &TranscriptionConfig,
        vad: &VadConfig,
        queue_depth: usize,
        results_depth: usize,
    ) -> Self {
        Self {
            sample_rate: vad.sample_rate,
            max_reconnect_attempts: transcription.max_reconnect_attempts(),
            reconnect_backoff: transcription.reconnect_backoff(),
            queue_depth: queue_depth.max(1),
            results_depth: results_depth.max(1),
        }
    }
}

/// Owns the transcription backend connection for one interview.
///
/// Utterances go in through [`feed`](Self::feed); finalized, non-empty
/// transcripts come out of [`results`](Self::results) in feed order with
/// strictly increasing sequence numbers. If the connection drops, every
/// utterance without a final result is re-sent from its start on a fresh
/// connection. Dropping the session closes the input; the worker finishes
/// pending utterances and then ends the result stream.
pub struct TranscriptionSession {
    utterance_tx: mpsc::Sender<Utterance>,
    results: Option<ReceiverStream<TranscriptSegment>>,
    worker: JoinHandle<()>,
}

impl TranscriptionSession {
    pub fn open(
        backend: Arc<dyn TranscriptionBackend>,
        options: TranscriptionOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (utterance_tx, utterance_rx) = mpsc::channel(options.queue_depth.max(1));
        let (results_tx, results_rx) = mpsc::channel(options.results_depth.max(1));

        let worker = Worker {
            backend,
            options,
            cancel,
            results_tx,
            conn: None,
            inflight: VecDeque::new(),
            failures: 0,
            next_seq: 1,
        };
        let worker = tokio::spawn(worker.run(utterance_rx));

        Self {
            utterance_tx,
            results: Some(ReceiverStream::new(results_rx)),
            worker,
        }
    }

    /// Queue a closed utterance for transcription.
    pub async fn feed(&self, utterance: Utterance) -> viva_core::error::Result<()> {
        self.utterance_tx
            .send(utterance)
            .await
            .map_err(|_| VivaError::backend(Backend::Transcription, "transcription session closed"))
    }

    /// The ordered transcript stream. Can be taken once.
    pub fn results(&mut self) -> Option<ReceiverStream<TranscriptSegment>> {
        self.results.take()
    }

    /// Close the input and return the worker handle so callers can await the drain.
    pub fn close(self) -> JoinHandle<()> {
        self.worker
    }
}

enum Event {
    Cancelled,
    Utterance(Option<Utterance>),
    Result(Option<anyhow::Result<SttResult>>),
}

struct Worker {
    backend: Arc<dyn TranscriptionBackend>,
    options: TranscriptionOptions,
    cancel: CancellationToken,
    results_tx: mpsc::Sender<TranscriptSegment>,
    conn: Option<TranscriptionStream>,
    /// Utterances sent to the backend without a final result yet, oldest first.
    inflight: VecDeque<Utterance>,
    /// Connection losses since the last final result.
    failures: u32,
    next_seq: u64,
}

impl Worker {
    async fn run(mut self, mut utterance_rx: mpsc::Receiver<Utterance>) {
        info!(backend = self.backend.id(), "Transcription session started");
        self.conn = self.try_connect().await;

        let mut input_open = true;
        loop {
            if !self.ensure_connected().await {
                break;
            }
            if !input_open && self.inflight.is_empty() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Event::Cancelled,
                result = next_result(&mut self.conn) => Event::Result(result),
                utterance = utterance_rx.recv(), if input_open => Event::Utterance(utterance),
            };

            match event {
                Event::Cancelled => break,
                Event::Utterance(Some(utterance)) => self.send(utterance),
                Event::Utterance(None) => input_open = false,
                Event::Result(Some(Ok(result))) => {
                    if !self.handle_result(result).await {
                        break;
                    }
                }
                Event::Result(Some(Err(e))) => {
                    warn!(%e, pending = self.inflight.len(), "Transcription backend error");
                    self.drop_connection();
                }
                Event::Result(None) => {
                    warn!(pending = self.inflight.len(), "Transcription connection closed");
                    self.drop_connection();
                }
            }
        }
        info!(next_seq = self.next_seq, "Transcription session ended");
    }

    fn send(&mut self, utterance: Utterance) {
        let segment = segment_for(&utterance, self.options.sample_rate);
        self.inflight.push_back(utterance);
        if let Some(conn) = &self.conn {
            if conn.audio_tx.send(segment).is_err() {
                self.drop_connection();
            }
        }
    }

    /// Returns false once nobody is listening for results.
    async fn handle_result(&mut self, result: SttResult) -> bool {
        if !result.is_final {
            trace!(text = %result.text, "Interim transcript");
            return true;
        }
        self.failures = 0;

        if self.inflight.pop_front().is_none() {
            warn!("Final transcript without a pending utterance");
        }

        let text = result.text.trim();
        if text.is_empty() {
            debug!("Empty final transcript, nothing to surface");
            return true;
        }

        let segment = TranscriptSegment {
            seq: self.next_seq,
            text: text.to_string(),
        };
        self.next_seq += 1;
        debug!(seq = segment.seq, chars = segment.text.len(), "Transcript finalized");
        self.results_tx.send(segment).await.is_ok()
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        self.failures += 1;
    }

    /// Reconnect while utterances are pending. Returns false if cancelled.
    async fn ensure_connected(&mut self) -> bool {
        while self.conn.is_none() && !self.inflight.is_empty() {
            if !self.reconnect().await {
                return false;
            }
        }
        true
    }

    /// Open a fresh connection and re-send every pending utterance from its start.
    /// Returns false if cancelled.
    async fn reconnect(&mut self) -> bool {
        if self.failures > self.options.max_reconnect_attempts {
            warn!(
                attempts = self.options.max_reconnect_attempts,
                discarded = self.inflight.len(),
                "Transcription backend unavailable, discarding pending utterances"
            );
            self.inflight.clear();
            self.failures = 0;
            return true;
        }

        let delay = self.options.reconnect_backoff * self.failures;
        if !delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.try_connect().await {
            Some(conn) => {
                info!(
                    attempt = self.failures,
                    refeed = self.inflight.len(),
                    "Transcription backend reconnected"
                );
                for utterance in &self.inflight {
                    if conn.audio_tx.send(segment_for(utterance, self.options.sample_rate)).is_err() {
                        self.failures += 1;
                        return true;
                    }
                }
                self.conn = Some(conn);
            }
            None => self.failures += 1,
        }
        !self.cancel.is_cancelled()
    }

    async fn try_connect(&self) -> Option<TranscriptionStream> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            conn = self.backend.connect() => match conn {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!(%e, backend = self.backend.id(), "Transcription connect failed");
                    None
                }
            },
        }
    }
}

fn segment_for(utterance: &Utterance, sample_rate: u32) -> AudioSegment {
    AudioSegment {
        pcm: utterance.to_pcm(),
        sample_rate,
    }
}

async fn next_result(conn: &mut Option<TranscriptionStream>) -> Option<anyhow::Result<SttResult>> {
    match conn {
        Some(conn) => conn.results.recv().await,
        None => std::future::pending().await,
    }
}

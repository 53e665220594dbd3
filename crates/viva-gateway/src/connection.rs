//! Media-stream connection lifecycle: start handshake, read/write loops.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use viva_agent::{SessionInput, SessionOutput};
use viva_core::protocol::{InboundFrame, OutboundFrame};

use crate::state::GatewayState;

/// Inbound audio blocks buffered between the socket and the session.
const INBOUND_QUEUE: usize = 256;

/// One text frame, reduced to what the session cares about.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Start {
        stream_sid: Option<String>,
        job_description: Option<String>,
    },
    Audio(Vec<u8>),
    /// `stop` or `end`: the interview is over.
    End,
    Ignore,
}

fn classify(text: &str) -> Inbound {
    let frame = match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%e, "Invalid frame received");
            return Inbound::Ignore;
        }
    };

    match frame {
        InboundFrame::Start { stream_sid, start } => Inbound::Start {
            job_description: start.job_description().map(str::to_string),
            stream_sid: stream_sid.or(start.stream_sid),
        },
        InboundFrame::Media { media, .. } => {
            if !media.is_inbound() {
                trace!(track = ?media.track, "Skipping non-caller track");
                return Inbound::Ignore;
            }
            match media.decode() {
                Ok(audio) => Inbound::Audio(audio),
                Err(e) => {
                    warn!(%e, "Dropping undecodable media payload");
                    Inbound::Ignore
                }
            }
        }
        InboundFrame::Stop { .. } | InboundFrame::End => Inbound::End,
        InboundFrame::Connected { .. } | InboundFrame::Mark { .. } => Inbound::Ignore,
    }
}

fn classify_message(message: Message) -> Option<Inbound> {
    match message {
        Message::Text(text) => Some(classify(text.as_str())),
        Message::Binary(bytes) => Some(Inbound::Audio(bytes.to_vec())),
        Message::Close(_) => None,
        // Axum answers pings itself
        _ => Some(Inbound::Ignore),
    }
}

/// Handshake result: what to start the session with.
struct Opening {
    stream_sid: Option<String>,
    job_description: Option<String>,
    /// Audio that arrived before any `start` frame.
    first_block: Option<Vec<u8>>,
    /// An end signal arrived before the interview began.
    ended: Option<SessionInput>,
}

/// Read until the stream announces itself, sends audio, or goes away.
async fn wait_for_start(ws_rx: &mut SplitStream<WebSocket>) -> Opening {
    let mut opening = Opening {
        stream_sid: None,
        job_description: None,
        first_block: None,
        ended: None,
    };

    while let Some(message) = ws_rx.next().await {
        let inbound = match message {
            Ok(message) => classify_message(message),
            Err(e) => {
                warn!(%e, "WebSocket error during start");
                None
            }
        };
        match inbound {
            Some(Inbound::Start {
                stream_sid,
                job_description,
            }) => {
                opening.stream_sid = stream_sid;
                opening.job_description = job_description;
                return opening;
            }
            Some(Inbound::Audio(audio)) => {
                debug!("Audio before start frame, using default job description");
                opening.first_block = Some(audio);
                return opening;
            }
            Some(Inbound::End) => {
                opening.ended = Some(SessionInput::End);
                return opening;
            }
            Some(Inbound::Ignore) => continue,
            // The reader sees the same closed stream and reports it.
            None => break,
        }
    }
    opening
}

/// Handle one media-stream connection for its whole lifetime.
pub async fn handle_media_stream(state: Arc<GatewayState>, ws: WebSocket) {
    let _session = state.track_session();
    #[cfg(feature = "metrics")]
    crate::metrics::record_session_start();

    let (ws_tx, mut ws_rx) = ws.split();

    let start_timeout = state.config.start_timeout();
    let opening = match tokio::time::timeout(start_timeout, wait_for_start(&mut ws_rx)).await {
        Ok(opening) => opening,
        Err(_) => {
            debug!(timeout = ?start_timeout, "No start frame, using default job description");
            Opening {
                stream_sid: None,
                job_description: None,
                first_block: None,
                ended: None,
            }
        }
    };
    info!(
        stream_sid = opening.stream_sid.as_deref().unwrap_or("-"),
        has_job_description = opening.job_description.is_some(),
        "Media stream started"
    );

    let (in_tx, in_rx) = mpsc::channel(INBOUND_QUEUE);
    let (out_tx, out_rx) = mpsc::channel(state.settings.session.outbound_queue.max(1));

    if let Some(block) = opening.first_block {
        let _ = in_tx.send(SessionInput::Audio(block)).await;
    }
    let reader = match opening.ended {
        Some(input) => {
            let _ = in_tx.send(input).await;
            None
        }
        None => Some(tokio::spawn(read_stream(ws_rx, in_tx))),
    };
    let writer = tokio::spawn(write_stream(ws_tx, out_rx, opening.stream_sid.clone()));

    let report = state
        .orchestrator()
        .run(opening.job_description, in_rx, out_tx)
        .await;

    if let Some(reader) = reader {
        reader.abort();
    }
    if let Err(e) = writer.await {
        warn!(%e, "Writer task failed");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_session_end(&report);
    info!(
        session_id = %report.id,
        stream_sid = opening.stream_sid.as_deref().unwrap_or("-"),
        reason = report.reason.as_str(),
        turns = report.turns,
        verdict = report.evaluation.verdict.as_str(),
        "Media stream closed"
    );
}

/// Forward socket frames to the session. Dropping `in_tx` tells the
/// session the transport is gone.
async fn read_stream(mut ws_rx: SplitStream<WebSocket>, in_tx: mpsc::Sender<SessionInput>) {
    while let Some(message) = ws_rx.next().await {
        let inbound = match message {
            Ok(message) => classify_message(message),
            Err(e) => {
                warn!(%e, "WebSocket error");
                None
            }
        };
        let input = match inbound {
            Some(Inbound::Audio(audio)) => SessionInput::Audio(audio),
            Some(Inbound::End) => SessionInput::End,
            Some(Inbound::Start { .. }) => {
                debug!("Repeated start frame ignored");
                continue;
            }
            Some(Inbound::Ignore) => continue,
            None => break,
        };
        if in_tx.send(input).await.is_err() {
            break;
        }
    }
    debug!("Media stream reader finished");
}

fn encode_output(output: SessionOutput, stream_sid: &Option<String>) -> OutboundFrame {
    match output {
        SessionOutput::Audio(audio) => OutboundFrame::media(stream_sid.clone(), &audio),
        SessionOutput::Evaluation(result) => OutboundFrame::evaluation(&result),
        SessionOutput::Error { code, message } => OutboundFrame::error(code, message),
    }
}

/// Write session output to the socket, then close it once the session is done.
async fn write_stream(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<SessionOutput>,
    stream_sid: Option<String>,
) {
    while let Some(output) = out_rx.recv().await {
        let frame = encode_output(output, &stream_sid);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(%e, "Failed to encode outbound frame");
                continue;
            }
        };
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            debug!("Client gone, dropping remaining output");
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

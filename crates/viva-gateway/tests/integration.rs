//! Gateway integration tests: start a real gateway with scripted backends
//! and drive it over WebSocket + HTTP.
//!
//! Run with: `cargo test -p viva-gateway --test integration`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use viva_agent::SessionBackends;
use viva_core::config::Config;
use viva_media::codec::linear_to_mulaw;
use viva_media::{
    AudioSegment, EnergyScorer, SttResult, SynthesisBackend, TranscriptionBackend,
    TranscriptionStream, VadScorer,
};
use viva_providers::{CompletionRequest, Credentials, LlmProvider};

/// Transcribes every segment as "answer N".
struct EchoTranscriber {
    segments: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscriptionBackend for EchoTranscriber {
    fn id(&self) -> &str {
        "echo"
    }

    async fn connect(&self) -> anyhow::Result<TranscriptionStream> {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<AudioSegment>();
        let (results_tx, results) = mpsc::unbounded_channel();
        let segments = self.segments.clone();
        tokio::spawn(async move {
            while audio_rx.recv().await.is_some() {
                let n = segments.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = results_tx.send(Ok(SttResult::final_text(format!("answer {n}"))));
            }
        });
        Ok(TranscriptionStream { audio_tx, results })
    }
}

/// Asks numbered questions; grades every interview as strong.
struct QuestionBot {
    questions: AtomicUsize,
}

#[async_trait]
impl LlmProvider for QuestionBot {
    fn id(&self) -> &str {
        "question-bot"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<String> {
        if request.messages[0].content.starts_with("You evaluate") {
            return Ok("[STRONG] Clear, specific answers.".into());
        }
        let n = self.questions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("Question {n}"))
    }
}

struct TextSynth;

#[async_trait]
impl SynthesisBackend for TextSynth {
    fn id(&self) -> &str {
        "text"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

fn test_backends() -> SessionBackends {
    SessionBackends {
        transcription: Arc::new(EchoTranscriber {
            segments: Arc::new(AtomicUsize::new(0)),
        }),
        completion: Arc::new(QuestionBot {
            questions: AtomicUsize::new(0),
        }),
        credentials: Credentials::None,
        synthesis: Arc::new(TextSynth),
        vad: Arc::new(|| Box::new(EnergyScorer::default()) as Box<dyn VadScorer>),
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a gateway in the background and return its state + port.
async fn start_test_gateway() -> (Arc<viva_gateway::GatewayState>, u16) {
    let port = find_free_port();
    let state = Arc::new(viva_gateway::GatewayState::new(
        Arc::new(Config::default()),
        test_backends(),
    ));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = viva_gateway::start_gateway(state_clone, "127.0.0.1", port).await;
    });

    // Wait for gateway to be ready
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

/// Media frame carrying `frames` 30 ms μ-law frames at a constant level.
fn media_frame(level: i16, frames: usize) -> Message {
    let audio = vec![linear_to_mulaw(level); 240 * frames];
    let frame = json!({
        "event": "media",
        "streamSid": "MZ-test",
        "media": { "track": "inbound", "payload": STANDARD.encode(audio) }
    });
    Message::Text(frame.to_string().into())
}

fn start_frame(job: &str) -> Message {
    let frame = json!({
        "event": "start",
        "streamSid": "MZ-test",
        "start": { "streamSid": "MZ-test", "customParameters": { "jobDescription": job } }
    });
    Message::Text(frame.to_string().into())
}

/// Collect JSON frames until the server closes the socket.
async fn read_until_close<S>(ws: &mut S) -> Vec<serde_json::Value>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut frames = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
        match message {
            Message::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    frames
}

fn spoken(frame: &serde_json::Value) -> String {
    let payload = frame["media"]["payload"].as_str().unwrap();
    String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, port) = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["sessions"]["active"], 0);
}

#[tokio::test]
async fn test_interview_over_media_stream() {
    let (state, port) = start_test_gateway().await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("WS connect failed");

    ws.send(Message::Text(json!({"event": "connected", "protocol": "Call"}).to_string().into()))
        .await
        .unwrap();
    ws.send(start_frame("Backend engineer, Rust")).await.unwrap();
    ws.send(media_frame(4000, 30)).await.unwrap();
    ws.send(media_frame(0, 30)).await.unwrap();
    ws.send(Message::Text(json!({"event": "end"}).to_string().into()))
        .await
        .unwrap();

    let frames = read_until_close(&mut ws).await;
    assert_eq!(frames.len(), 3, "unexpected frames: {frames:?}");

    assert_eq!(frames[0]["event"], "media");
    assert_eq!(frames[0]["streamSid"], "MZ-test");
    assert!(spoken(&frames[0]).starts_with("Thank you for your time today."));

    assert_eq!(frames[1]["event"], "media");
    assert_eq!(spoken(&frames[1]), "Question 1");

    assert_eq!(frames[2]["event"], "evaluation");
    assert_eq!(frames[2]["verdict"], "strong");
    assert_eq!(frames[2]["rationale"], "Clear, specific answers.");

    // The session is released once the socket closes
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.active_sessions(), 0);
    assert_eq!(state.completed_sessions(), 1);
}

#[tokio::test]
async fn test_stop_frame_ends_session() {
    let (_state, port) = start_test_gateway().await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("WS connect failed");

    ws.send(start_frame("Site reliability engineer")).await.unwrap();
    ws.send(Message::Text(json!({"event": "stop", "streamSid": "MZ-test"}).to_string().into()))
        .await
        .unwrap();

    let frames = read_until_close(&mut ws).await;
    let evaluation = frames.last().expect("no frames received");
    assert_eq!(evaluation["event"], "evaluation");
    assert_eq!(evaluation["verdict"], "error");
}

#[tokio::test]
async fn test_binary_audio_without_start_frame() {
    let (_state, port) = start_test_gateway().await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("WS connect failed");

    let mut audio = vec![linear_to_mulaw(4000); 240 * 30];
    audio.extend(vec![linear_to_mulaw(0); 240 * 30]);
    ws.send(Message::Binary(audio.into())).await.unwrap();
    ws.send(Message::Text("this is not json".into())).await.unwrap();
    ws.send(Message::Text(json!({"event": "end"}).to_string().into()))
        .await
        .unwrap();

    let frames = read_until_close(&mut ws).await;
    let events: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
    assert_eq!(events, vec!["media", "media", "evaluation"]);
    assert_eq!(frames[2]["verdict"], "strong");
}

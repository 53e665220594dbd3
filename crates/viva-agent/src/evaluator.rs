//! Post-interview evaluation: one completion call over the full transcript.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use viva_core::types::{ConversationTurn, EvaluationResult, Role, Verdict};
use viva_providers::{ChatMessage, CompletionRequest, Credentials, LlmProvider};

use crate::dialogue::ModelSettings;
use crate::prompt::{build_evaluation_prompt, build_evaluation_system_prompt};
use crate::transcript::format_transcript;

/// Leading verdict label, tolerating markdown decoration: `[STRONG]`,
/// `**Weak** -`, `(neutral):`.
static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[\[\*\(#]*\s*(STRONG|NEUTRAL|WEAK)\b\s*[\]\*\)]*\s*[:\-–—]?\s*")
        .expect("verdict pattern is valid")
});

/// Split a model answer into verdict and rationale.
///
/// Text that does not open with a recognizable label yields
/// [`Verdict::Error`] with the full text as the rationale.
pub fn parse_evaluation(text: &str) -> EvaluationResult {
    let text = text.trim();
    let Some(caps) = VERDICT_RE.captures(text) else {
        return EvaluationResult::error(text);
    };

    let verdict = caps
        .get(1)
        .and_then(|m| Verdict::from_label(m.as_str()))
        .unwrap_or(Verdict::Error);
    let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
    let rationale = text[consumed..].trim();

    EvaluationResult {
        verdict,
        rationale: if rationale.is_empty() {
            "No rationale given.".to_string()
        } else {
            rationale.to_string()
        },
    }
}

pub struct Evaluator {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    settings: ModelSettings,
}

impl Evaluator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        settings: ModelSettings,
    ) -> Self {
        Self {
            provider,
            credentials,
            settings,
        }
    }

    /// Judge the candidate over everything said on the call. Always returns
    /// a result; failures become [`Verdict::Error`] with a short explanation.
    pub async fn evaluate(
        &self,
        job_description: &str,
        transcript: &[ConversationTurn],
    ) -> EvaluationResult {
        if !transcript.iter().any(|t| t.role == Role::Candidate) {
            info!("No candidate turns, skipping evaluation call");
            return EvaluationResult::error("No candidate speech was transcribed.");
        }

        let transcript = format_transcript(transcript);
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(build_evaluation_system_prompt()),
                ChatMessage::user(build_evaluation_prompt(job_description, &transcript)),
            ],
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        let call = self.provider.complete(&request, &self.credentials);
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(text)) => {
                let result = parse_evaluation(&text);
                info!(verdict = result.verdict.as_str(), "Evaluation complete");
                result
            }
            Ok(Err(e)) => {
                warn!(%e, "Evaluation request failed");
                EvaluationResult::error(format!("Evaluation unavailable: {e}"))
            }
            Err(_) => {
                warn!(timeout = ?self.settings.timeout, "Evaluation request timed out");
                EvaluationResult::error("Evaluation unavailable: request timed out.")
            }
        }
    }
}

//! Dialogue manager: one completion call per finalized candidate utterance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use viva_core::config::Config;
use viva_core::error::{Backend, VivaError};
use viva_core::types::ConversationTurn;
use viva_providers::{ChatMessage, CompletionRequest, Credentials, LlmProvider};

use crate::prompt::{FALLBACK_REPLY, build_system_prompt};
use crate::session::SharedSession;
use crate::transcript::history_to_messages;

/// The assistant's answer to one candidate turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// The backend failed and `text` is the fixed fallback.
    pub degraded: bool,
}

/// Model and sampling parameters for one kind of completion call.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Upper bound on a single backend call.
    pub timeout: Duration,
}

impl ModelSettings {
    /// Interview turns: conversational sampling.
    pub fn dialogue_from_config(config: &Config) -> Self {
        Self {
            model: config.default_model(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
            timeout: config.request_timeout(),
        }
    }

    /// Evaluation: low temperature, short answer.
    pub fn evaluation_from_config(config: &Config) -> Self {
        Self {
            model: config.default_model(),
            temperature: config.evaluation_temperature(),
            max_tokens: config.evaluation_max_tokens(),
            timeout: config.request_timeout(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".into(),
            temperature: 0.5,
            max_tokens: 500,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct DialogueManager {
    session: SharedSession,
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    settings: ModelSettings,
}

impl DialogueManager {
    pub fn new(
        session: SharedSession,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        settings: ModelSettings,
    ) -> Self {
        Self {
            session,
            provider,
            credentials,
            settings,
        }
    }

    /// Record the opening line as the first assistant turn.
    pub async fn greet(&self, greeting: &str) {
        self.session
            .lock()
            .await
            .append(ConversationTurn::assistant(greeting));
    }

    /// Produce the next assistant utterance for `candidate_text`.
    ///
    /// On success the candidate and assistant turns are both appended. On
    /// backend failure only the fallback assistant turn is appended and the
    /// reply is marked degraded; the error never reaches the caller.
    pub async fn respond(&self, candidate_text: &str) -> Reply {
        let candidate = ConversationTurn::candidate(candidate_text);

        // Snapshot under the lock; the backend call runs without it.
        let messages = {
            let session = self.session.lock().await;
            let system = build_system_prompt(&session.job_description);
            let mut messages = history_to_messages(&system, session.history());
            messages.push(ChatMessage::user(candidate_text));
            messages
        };

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        match self.complete(&request).await {
            Ok(text) => {
                debug!(chars = text.len(), "Assistant reply generated");
                let mut session = self.session.lock().await;
                session.append(candidate);
                session.append(ConversationTurn::assistant(&text));
                Reply {
                    text,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(%e, "Completion failed, using fallback reply");
                self.session
                    .lock()
                    .await
                    .append(ConversationTurn::assistant(FALLBACK_REPLY));
                Reply {
                    text: FALLBACK_REPLY.to_string(),
                    degraded: true,
                }
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> viva_core::error::Result<String> {
        tokio::time::timeout(
            self.settings.timeout,
            self.provider.complete(request, &self.credentials),
        )
        .await
        .map_err(|_| VivaError::backend(Backend::Completion, "request timed out"))?
        .map_err(|e| VivaError::backend(Backend::Completion, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InterviewSession;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use viva_core::types::Role;
    use viva_providers::ChatRole;

    /// Replies "Question N" and records the message count of every request.
    struct ScriptedProvider {
        fail_calls: Vec<usize>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(fail_calls: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                fail_calls,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<String> {
            let call = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(request.messages.len());
                seen.len()
            };
            assert_eq!(request.messages[0].role, ChatRole::System);
            assert_eq!(request.messages.last().unwrap().role, ChatRole::User);
            if self.fail_calls.contains(&call) {
                anyhow::bail!("rate limited");
            }
            Ok(format!("Question {call}"))
        }
    }

    fn manager(provider: Arc<ScriptedProvider>) -> (DialogueManager, SharedSession) {
        let session = InterviewSession::new("s1", "Rust engineer").shared();
        let manager = DialogueManager::new(
            session.clone(),
            provider,
            Credentials::None,
            ModelSettings::default(),
        );
        (manager, session)
    }

    #[tokio::test]
    async fn test_successful_turn_appends_two() {
        let provider = ScriptedProvider::new(vec![]);
        let (manager, session) = manager(provider.clone());
        manager.greet("Let's begin with your experience.").await;

        let reply = manager.respond("I work on databases.").await;
        assert_eq!(reply.text, "Question 1");
        assert!(!reply.degraded);
        assert_eq!(session.lock().await.history().len(), 3);

        manager.respond("Mostly storage engines.").await;
        assert_eq!(session.lock().await.history().len(), 5);

        // Every call sees strictly more context than the last
        let seen = provider.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![3, 5]);
    }

    #[tokio::test]
    async fn test_failed_turn_appends_fallback_only() {
        let provider = ScriptedProvider::new(vec![1]);
        let (manager, session) = manager(provider);

        let reply = manager.respond("I work on databases.").await;
        assert!(reply.degraded);
        assert_eq!(reply.text, FALLBACK_REPLY);

        let session = session.lock().await;
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::Assistant);
        assert_eq!(session.history()[0].text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_recovers_after_degraded_turn() {
        let provider = ScriptedProvider::new(vec![1]);
        let (manager, session) = manager(provider);
        manager.respond("first").await;
        let reply = manager.respond("second").await;
        assert_eq!(reply.text, "Question 2");
        assert_eq!(session.lock().await.history().len(), 3);
    }

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn id(&self) -> &str {
            "slow"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_turn() {
        let session = InterviewSession::new("s1", "Rust engineer").shared();
        let settings = ModelSettings {
            timeout: Duration::from_secs(5),
            ..ModelSettings::default()
        };
        let manager =
            DialogueManager::new(session.clone(), Arc::new(SlowProvider), Credentials::None, settings);
        let reply = manager.respond("hello").await;
        assert!(reply.degraded);
    }
}

//! Failover provider: wraps multiple providers in priority order.
//!
//! On error (rate limit, auth failure, timeout), falls back to the next
//! provider in the list.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use viva_core::config::Config;

use crate::openai::OpenAiProvider;
use crate::{CompletionRequest, Credentials, LlmProvider};

/// A failover provider that tries multiple underlying providers in order.
///
/// Each entry carries its own credentials; the credentials passed to
/// [`LlmProvider::complete`] are ignored.
pub struct FailoverProvider {
    providers: Vec<(Arc<dyn LlmProvider>, Credentials)>,
    label: String,
}

impl FailoverProvider {
    /// Create a failover provider with the given provider/credential pairs.
    /// The first provider is primary; others are fallbacks.
    pub fn new(label: String, providers: Vec<(Arc<dyn LlmProvider>, Credentials)>) -> Self {
        Self { providers, label }
    }

    /// Build the chain from `models.providers`, in configured order.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.request_timeout();
        let providers = config
            .providers()
            .iter()
            .map(|p| {
                let provider = OpenAiProvider::by_id(&p.id, p.base_url.as_deref())?
                    .with_timeout(timeout);
                let provider: Arc<dyn LlmProvider> = Arc::new(provider);
                Ok((provider, Credentials::from_key(p.resolve_api_key())))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if providers.is_empty() {
            anyhow::bail!("No completion providers configured");
        }
        Ok(Self::new("failover".into(), providers))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl LlmProvider for FailoverProvider {
    fn id(&self) -> &str {
        &self.label
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<String> {
        // Try each provider in order using its own credentials.
        let mut last_error = None;

        for (i, (provider, creds)) in self.providers.iter().enumerate() {
            match provider.complete(request, creds).await {
                Ok(text) => {
                    if i > 0 {
                        info!(
                            provider = provider.id(),
                            attempt = i + 1,
                            "Failover succeeded"
                        );
                    }
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        provider = provider.id(),
                        attempt = i + 1,
                        %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No providers configured in failover")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use viva_core::config::{ModelsConfig, ProviderConfig};

    struct StubProvider {
        id: &'static str,
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(id: &'static str, reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                id,
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("{} is down", self.id))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hello")],
            max_tokens: 10,
            temperature: None,
        }
    }

    #[test]
    fn test_failover_provider_creation() {
        let provider = FailoverProvider::new("test-failover".into(), vec![]);
        assert_eq!(provider.id(), "test-failover");
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let primary = StubProvider::new("primary", None);
        let backup = StubProvider::new("backup", Some("from backup"));
        let chain = FailoverProvider::new(
            "chain".into(),
            vec![
                (primary.clone(), Credentials::None),
                (backup.clone(), Credentials::None),
            ],
        );

        let text = chain.complete(&request(), &Credentials::None).await.unwrap();
        assert_eq!(text, "from backup");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallbacks() {
        let primary = StubProvider::new("primary", Some("ok"));
        let backup = StubProvider::new("backup", Some("unused"));
        let chain = FailoverProvider::new(
            "chain".into(),
            vec![
                (primary.clone(), Credentials::None),
                (backup.clone(), Credentials::None),
            ],
        );
        assert_eq!(chain.complete(&request(), &Credentials::None).await.unwrap(), "ok");
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let chain = FailoverProvider::new(
            "chain".into(),
            vec![
                (StubProvider::new("a", None), Credentials::None),
                (StubProvider::new("b", None), Credentials::None),
            ],
        );
        let err = chain.complete(&request(), &Credentials::None).await.unwrap_err();
        assert!(err.to_string().contains("b is down"));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            models: Some(ModelsConfig {
                providers: Some(vec![
                    ProviderConfig {
                        id: "groq".into(),
                        api_key: Some("gsk".into()),
                        api_key_env: None,
                        base_url: None,
                        default_model: None,
                    },
                    ProviderConfig {
                        id: "ollama".into(),
                        api_key: None,
                        api_key_env: None,
                        base_url: None,
                        default_model: None,
                    },
                ]),
                ..ModelsConfig::default()
            }),
            ..Config::default()
        };
        let chain = FailoverProvider::from_config(&config).unwrap();
        assert_eq!(chain.len(), 2);

        assert!(FailoverProvider::from_config(&Config::default()).is_err());
    }
}

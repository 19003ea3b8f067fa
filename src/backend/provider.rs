//! Backend over any `edgequake_llm` provider (OpenAI, Anthropic, Gemini, Ollama, …).

use crate::config::ConversionConfig;
use crate::error::{InferenceError, Vision2MdError};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::llm::{ConversionRequest, VisionBackend};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Adapts an [`LLMProvider`] to [`VisionBackend`].
///
/// The provider is bound to its model when it is created, so
/// `ConversionRequest::model` is informational here.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
    model: String,
    options: CompletionOptions,
}

impl ProviderBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        model: impl Into<String>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            model: model.into(),
            options: build_options(config),
        }
    }

    /// Instantiate a named provider with `model` via [`ProviderFactory`].
    ///
    /// The factory reads the provider's API key (`OPENAI_API_KEY`, …) from the
    /// environment.
    pub fn create(provider_name: &str, model: &str, config: &ConversionConfig) -> Result<Self, Vision2MdError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            Vision2MdError::ProviderNotConfigured {
                provider: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, provider_name, model, config))
    }

    /// Let the factory pick the first provider whose API key is set.
    pub fn from_env(config: &ConversionConfig) -> Result<Self, Vision2MdError> {
        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| Vision2MdError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                    Set OPENROUTER_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                    Error: {}",
                    e
                ),
            })?;
        let model = config.model.clone().unwrap_or_else(|| "default".to_string());
        Ok(Self::new(provider, "auto", model, config))
    }

    async fn chat(&self, request: &ConversionRequest) -> Result<String, InferenceError> {
        let messages = vec![
            ChatMessage::system(request.prompt.as_str()),
            ChatMessage::user_with_images("", request.images.iter().map(to_image_data).collect()),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_llm_error(&e.to_string()))?;

        debug!(
            "Pages {:?}: {} input tokens, {} output tokens",
            request.pages(),
            response.prompt_tokens,
            response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(InferenceError::non_retryable("Model returned empty content"));
        }
        Ok(response.content)
    }
}

impl VisionBackend for ProviderBackend {
    fn describe<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<String, InferenceError>> {
        Box::pin(self.chat(request))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Classify a provider error from its rendered message.
///
/// `edgequake_llm` flattens transport and API failures into one error type,
/// so rate limits, timeouts, overload and 5xx are recognised by text.
pub fn classify_llm_error(message: &str) -> InferenceError {
    let lower = message.to_ascii_lowercase();
    const TRANSIENT: &[&str] = &[
        "429",
        "rate limit",
        "ratelimit",
        "too many requests",
        "timeout",
        "timed out",
        "overloaded",
        "temporarily unavailable",
        "connection",
        "500",
        "502",
        "503",
        "504",
        "529",
    ];
    let message = format!("Provider error: {}", message);
    if TRANSIENT.iter().any(|needle| lower.contains(needle)) {
        InferenceError::retryable(message)
    } else {
        InferenceError::non_retryable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_follow_config() {
        let config = ConversionConfig::builder()
            .max_tokens(2048)
            .temperature(0.3)
            .build()
            .unwrap();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[test]
    fn rate_limits_and_outages_are_retryable() {
        for msg in [
            "API error: 429 Too Many Requests",
            "Rate limit exceeded, retry later",
            "request timed out",
            "Anthropic: Overloaded",
            "HTTP 503 Service Unavailable",
            "error sending request: connection reset",
        ] {
            assert!(classify_llm_error(msg).is_retryable(), "{msg}");
        }
    }

    #[test]
    fn auth_and_validation_errors_are_final() {
        for msg in [
            "401 Unauthorized: invalid api key",
            "Invalid request: image too large",
            "model not found",
        ] {
            assert!(!classify_llm_error(msg).is_retryable(), "{msg}");
        }
    }
}

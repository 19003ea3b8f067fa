//! OpenRouter chat-completions backend.
//!
//! One POST to `{base}/chat/completions` per request. The user message
//! carries the instruction text followed by every page image as a base64
//! `image_url` part, in page order. HTTP status decides retryability:
//! 429, 408 and 5xx are transient; every other non-success is final.

use crate::config::ConversionConfig;
use crate::error::{InferenceError, Vision2MdError};
use crate::pipeline::encode::to_data_url;
use crate::pipeline::llm::{ConversionRequest, VisionBackend};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
/// Free, vision-capable default.
pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemma-3-27b-it:free";

const REFERER: &str = "https://github.com/raphaelmansuy/edgequake-vision2md";
const TITLE: &str = "edgequake-vision2md";

/// Talks to OpenRouter directly over `reqwest`.
#[derive(Debug, Clone)]
pub struct OpenRouterBackend {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: usize,
    temperature: f32,
    model: String,
}

impl OpenRouterBackend {
    /// Build a backend with the timeout, token limit and temperature from `config`.
    pub fn new(api_key: impl Into<String>, config: &ConversionConfig) -> Result<Self, Vision2MdError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(missing_key());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Vision2MdError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
        })
    }

    /// Read the key from `OPENROUTER_API_KEY`.
    pub fn from_env(config: &ConversionConfig) -> Result<Self, Vision2MdError> {
        match std::env::var(OPENROUTER_API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Self::new(key, config),
            _ => Err(missing_key()),
        }
    }

    /// Model sent when the run does not name one. Aliases are accepted.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a different OpenAI-compatible endpoint (proxies, local gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Model identifiers currently offered by the endpoint.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| InferenceError::non_retryable(format!("Malformed model list: {}", e)))?;
        Ok(list.data)
    }

    fn build_body(&self, request: &ConversionRequest) -> ChatRequest {
        let mut content = Vec::with_capacity(request.images.len() + 1);
        content.push(ContentPart::Text {
            text: request.prompt.clone(),
        });
        content.extend(request.images.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: to_data_url(img),
            },
        }));

        ChatRequest {
            model: map_model_alias(&request.model),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    async fn post(&self, request: &ConversionRequest) -> Result<String, InferenceError> {
        let body = self.build_body(request);
        debug!(
            "POST {}/chat/completions model={} images={}",
            self.base_url,
            body.model,
            request.images.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        parse_response(&text)
    }
}

impl VisionBackend for OpenRouterBackend {
    fn describe<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<String, InferenceError>> {
        Box::pin(self.post(request))
    }

    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Translate short local model names to OpenRouter identifiers.
///
/// Anything already namespaced (`vendor/model`) passes through unchanged;
/// unknown short names fall back to [`DEFAULT_OPENROUTER_MODEL`].
pub fn map_model_alias(model: &str) -> String {
    if model.contains('/') {
        return model.to_string();
    }
    let mapped = match model {
        m if m.starts_with("gemma") => DEFAULT_OPENROUTER_MODEL,
        "llama3" => "meta-llama/llama-3-8b-instruct",
        "llama3:70b" => "meta-llama/llama-3-70b-instruct",
        "vision" => "meta-llama/llama-3.2-11b-vision-instruct:free",
        "claude-vision" => "anthropic/claude-3-haiku:beta",
        "gpt4-vision" => "openai/gpt-4o-mini",
        _ => DEFAULT_OPENROUTER_MODEL,
    };
    mapped.to_string()
}

/// Map a non-success HTTP status (and its body) to a classified error.
pub fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let detail = error_message(body).unwrap_or_else(|| truncate(body, 300));
    let message = format!("OpenRouter returned {}: {}", status, detail);
    let err = if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        InferenceError::retryable(message)
    } else {
        InferenceError::non_retryable(message)
    };
    err.with_status(status.as_u16())
}

/// Extract the generated Markdown from a 200 response body.
///
/// OpenRouter sometimes answers 200 with an `error` object (upstream provider
/// failures); its `code` is classified like an HTTP status. A body with no
/// message content is final.
pub fn parse_response(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::non_retryable(format!("Malformed response: {}", e)))?;

    if let Some(err) = parsed.error {
        let status = err
            .code
            .and_then(|c| u16::try_from(c).ok())
            .and_then(|c| StatusCode::from_u16(c).ok());
        return Err(match status {
            Some(status) => classify_status(status, body),
            None => InferenceError::non_retryable(format!("OpenRouter error: {}", err.message)),
        });
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| InferenceError::non_retryable("Response contained no message content"))
}

fn transport_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        InferenceError::retryable(format!("Transport error: {}", err))
    } else {
        InferenceError::non_retryable(format!("Transport error: {}", err))
    }
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ChatResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn missing_key() -> Vision2MdError {
    Vision2MdError::ProviderNotConfigured {
        provider: "openrouter".to_string(),
        hint: format!("Set {} to your OpenRouter API key", OPENROUTER_API_KEY_ENV),
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

/// One entry from `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context_length: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceErrorKind;
    use crate::pipeline::source::PageImage;

    fn backend() -> OpenRouterBackend {
        OpenRouterBackend::new("sk-test", &ConversionConfig::default()).unwrap()
    }

    #[test]
    fn aliases_map_to_openrouter_ids() {
        assert_eq!(map_model_alias("gemma3:12b"), "google/gemma-3-27b-it:free");
        assert_eq!(map_model_alias("gemma3:4b"), "google/gemma-3-27b-it:free");
        assert_eq!(map_model_alias("gemma-anything"), "google/gemma-3-27b-it:free");
        assert_eq!(map_model_alias("llama3:70b"), "meta-llama/llama-3-70b-instruct");
        assert_eq!(map_model_alias("gpt4-vision"), "openai/gpt-4o-mini");
        assert_eq!(map_model_alias("mystery"), DEFAULT_OPENROUTER_MODEL);
        assert_eq!(map_model_alias("qwen/qwen2.5-vl-72b-instruct"), "qwen/qwen2.5-vl-72b-instruct");
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        for code in [429u16, 408, 500, 502, 503] {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), "");
            assert!(err.is_retryable(), "{code} should be retryable");
            assert_eq!(err.status, Some(code));
        }
    }

    #[test]
    fn client_errors_are_final() {
        for code in [400u16, 401, 402, 403, 404] {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), "");
            assert_eq!(err.kind, InferenceErrorKind::NonRetryable, "{code}");
        }
    }

    #[test]
    fn status_message_uses_api_error_text() {
        let body = r#"{"error":{"message":"Rate limit exceeded: free-models-per-min","code":429}}"#;
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(err.message.contains("free-models-per-min"));
    }

    #[test]
    fn parse_response_extracts_content() {
        let body = r##"{"choices":[{"message":{"role":"assistant","content":"# Title"}}]}"##;
        assert_eq!(parse_response(body).unwrap(), "# Title");
    }

    #[test]
    fn parse_response_error_object_is_classified_by_code() {
        let body = r#"{"error":{"message":"Provider returned error","code":400}}"#;
        let err = parse_response(body).unwrap_err();
        assert_eq!(err.kind, InferenceErrorKind::NonRetryable);
        assert_eq!(err.status, Some(400));
        assert!(err.message.contains("Provider returned error"));

        let body = r#"{"error":{"message":"Upstream overloaded","code":502}}"#;
        assert!(parse_response(body).unwrap_err().is_retryable());

        let body = r#"{"error":{"message":"no code here"}}"#;
        assert!(!parse_response(body).unwrap_err().is_retryable());
    }

    #[test]
    fn parse_response_without_content_is_final() {
        let err = parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(!err.is_retryable());
        let err = parse_response("not json").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn body_keeps_page_order_after_prompt() {
        let request = ConversionRequest {
            images: vec![PageImage::png(1, vec![1]), PageImage::png(2, vec![2])],
            model: "gemma3:12b".into(),
            prompt: "Convert".into(),
        };
        let json = serde_json::to_value(backend().build_body(&request)).unwrap();
        let content = json["messages"][0]["content"].as_array().unwrap();

        assert_eq!(json["model"], "google/gemma-3-27b-it:free");
        assert_eq!(json["max_tokens"], 4000);
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Convert");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AQ==");
        assert_eq!(content[2]["image_url"]["url"], "data:image/png;base64,Ag==");
    }

    #[test]
    fn empty_key_is_not_configured() {
        let err = OpenRouterBackend::new("  ", &ConversionConfig::default()).unwrap_err();
        assert!(matches!(err, Vision2MdError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let b = backend().with_base_url("http://localhost:8080/v1/");
        assert_eq!(b.base_url, "http://localhost:8080/v1");
    }
}

//! Configuration types for resumable page-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The model name and prompt live here
//! rather than in module-level state, and are handed to the inference client
//! at construction.

use crate::checkpoint::{CheckpointScanner, HeaderScanner};
use crate::error::Vision2MdError;
use crate::pipeline::llm::{VisionBackend, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_DELAY};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a conversion run.
///
/// # Example
/// ```rust
/// use edgequake_vision2md::ConversionConfig;
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .provider_name("openrouter")
///     .request_delay(Duration::from_secs(3))
///     .max_retries(5)
///     .start_page(40)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Model identifier, e.g. "google/gemma-3-27b-it:free", "gpt-4.1-nano".
    /// If None, uses the backend's default.
    pub model: Option<String>,

    /// Backend name ("openrouter", "openai", "anthropic", "ollama", …).
    /// If None along with `backend`, the backend is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Custom instruction prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Minimum time between the end of one request and the start of the next. Default: 1 s.
    ///
    /// Also the base of the exponential backoff. Raise it to 3–10 s for
    /// free-tier endpoints that return 429 at one request per second.
    pub request_delay: Duration,

    /// Retries after the first attempt on a retryable failure. Default: 3.
    pub max_retries: u32,

    /// Upper bound on a single backoff wait. Default: 60 s.
    pub max_backoff: Duration,

    /// Maximum tokens the model may generate per request. Default: 4000.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// First page (1-based) eligible for processing. Default: 1.
    ///
    /// Pages before it are never sent; pages already present in the
    /// artifact are skipped regardless.
    pub start_page: usize,

    /// Progressive, batch, or chosen by page count. Default: [`ConversionMode::Auto`].
    pub mode: ConversionMode,

    /// Longest rendered edge in pixels for PDF pages. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Strategy used to recover completed pages from an existing artifact.
    pub checkpoint: Arc<dyn CheckpointScanner>,

    /// Receiver for skip / write / retry / error notices.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            backend: None,
            system_prompt: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_tokens: 4000,
            temperature: 0.1,
            api_timeout_secs: 120,
            start_page: 1,
            mode: ConversionMode::default(),
            max_rendered_pixels: 2000,
            password: None,
            checkpoint: Arc::new(HeaderScanner),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("request_delay", &self.request_delay)
            .field("max_retries", &self.max_retries)
            .field("max_backoff", &self.max_backoff)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("start_page", &self.start_page)
            .field("mode", &self.mode)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// `start_page` with 0 treated as 1.
    pub fn effective_start_page(&self) -> usize {
        self.start_page.max(1)
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn max_backoff(mut self, cap: Duration) -> Self {
        self.config.max_backoff = cap;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn start_page(mut self, page: usize) -> Self {
        self.config.start_page = page;
        self
    }

    pub fn mode(mut self, mode: ConversionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn checkpoint(mut self, scanner: Arc<dyn CheckpointScanner>) -> Self {
        self.config.checkpoint = scanner;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Vision2MdError> {
        let c = &self.config;
        if c.max_backoff < c.request_delay {
            return Err(Vision2MdError::InvalidConfig(format!(
                "max backoff ({:?}) must be ≥ request delay ({:?})",
                c.max_backoff, c.request_delay
            )));
        }
        if c.max_rendered_pixels < 100 {
            return Err(Vision2MdError::InvalidConfig(format!(
                "max rendered pixels must be ≥ 100, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.max_tokens == 0 {
            return Err(Vision2MdError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which driver converts the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Batch for single-page documents, progressive otherwise. (default)
    #[default]
    Auto,
    /// One request per page, appended and flushed as it completes; resumable.
    Progressive,
    /// One request for the whole document, one atomic write; not resumable.
    Batch,
}

impl ConversionMode {
    /// The concrete driver to use for a document of `total_pages` pages.
    pub fn resolve(self, total_pages: usize) -> ConversionMode {
        match self {
            ConversionMode::Auto if total_pages == 1 => ConversionMode::Batch,
            ConversionMode::Auto => ConversionMode::Progressive,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConversionConfig::default();
        assert_eq!(c.request_delay, Duration::from_secs(1));
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.max_backoff, Duration::from_secs(60));
        assert_eq!(c.start_page, 1);
        assert_eq!(c.mode, ConversionMode::Auto);
    }

    #[test]
    fn backoff_below_delay_is_rejected() {
        let err = ConversionConfig::builder()
            .request_delay(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(matches!(err, Vision2MdError::InvalidConfig(_)));
    }

    #[test]
    fn zero_start_page_is_treated_as_one() {
        let c = ConversionConfig::builder().start_page(0).build().unwrap();
        assert_eq!(c.effective_start_page(), 1);
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ConversionConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn auto_mode_resolves_by_page_count() {
        assert_eq!(ConversionMode::Auto.resolve(1), ConversionMode::Batch);
        assert_eq!(ConversionMode::Auto.resolve(2), ConversionMode::Progressive);
        assert_eq!(ConversionMode::Progressive.resolve(1), ConversionMode::Progressive);
        assert_eq!(ConversionMode::Batch.resolve(40), ConversionMode::Batch);
    }
}

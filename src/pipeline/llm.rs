//! VLM interaction: the inference client and the backend seam it drives.
//!
//! [`InferenceClient`] owns everything that is about *talking politely* to a
//! provider (the pacing floor between requests and the retry loop), while
//! a [`VisionBackend`] only knows how to turn one [`ConversionRequest`] into
//! Markdown or a classified [`InferenceError`].
//!
//! ## Retry Strategy
//!
//! Free-tier vision endpoints answer bursts with HTTP 429. Before every
//! attempt the client waits until at least `request_delay` has passed since
//! the previous request finished. A retryable failure additionally sleeps
//! `request_delay * 2^(n-1)` (capped at `max_backoff`) before retry `n`, so
//! with the 1 s default the waits are 1 s → 2 s → 4 s. Non-retryable errors
//! are returned immediately.

use crate::config::ConversionConfig;
use crate::error::InferenceError;
use crate::pipeline::source::PageImage;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

/// Default pacing floor between consecutive requests.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);
/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default ceiling for a single backoff wait.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A single unit of work for a vision backend.
///
/// Stateless: the client re-sends the identical request on every retry.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// One page (progressive mode) or the whole document in page order (batch mode).
    pub images: Vec<PageImage>,
    pub model: String,
    pub prompt: String,
}

impl ConversionRequest {
    /// Page numbers carried by this request, in submission order.
    pub fn pages(&self) -> Vec<usize> {
        self.images.iter().map(|img| img.page).collect()
    }

    /// First page in the request; used to label log lines and retry notices.
    pub fn first_page(&self) -> usize {
        self.images.first().map(|img| img.page).unwrap_or(0)
    }
}

/// "Describe these page images as Markdown."
///
/// Implementations must preserve the order of `request.images` and classify
/// every failure as retryable or not; pacing and retries are the client's job.
pub trait VisionBackend: Send + Sync {
    fn describe<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<String, InferenceError>>;

    /// Short provider name for logs, e.g. `"openrouter"`.
    fn name(&self) -> &str;

    /// Model used when the configuration does not name one.
    fn default_model(&self) -> &str;
}

/// Paced, retrying front-end over a [`VisionBackend`].
///
/// Holds the timestamp of the last request, so one client must be driven
/// sequentially (`&mut self`); it is not meant to be shared between runs.
pub struct InferenceClient {
    backend: Arc<dyn VisionBackend>,
    model: String,
    prompt: String,
    request_delay: Duration,
    max_retries: u32,
    max_backoff: Duration,
    last_request: Option<Instant>,
    progress: Option<ProgressCallback>,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn VisionBackend>, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            prompt: prompt.into(),
            request_delay: DEFAULT_REQUEST_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff: DEFAULT_MAX_BACKOFF,
            last_request: None,
            progress: None,
        }
    }

    /// Build a client from the model, prompt, pacing and retry knobs in `config`.
    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &ConversionConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| backend.default_model().to_string());
        let prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut client = Self::new(backend, model, prompt)
            .with_request_delay(config.request_delay)
            .with_max_retries(config.max_retries)
            .with_max_backoff(config.max_backoff);
        client.progress = config.progress_callback.clone();
        client
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_max_backoff(mut self, cap: Duration) -> Self {
        self.max_backoff = cap;
        self
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Wrap `images` into a request carrying this client's model and prompt.
    pub fn request(&self, images: Vec<PageImage>) -> ConversionRequest {
        ConversionRequest {
            images,
            model: self.model.clone(),
            prompt: self.prompt.clone(),
        }
    }

    /// Convert one page (or a whole ordered document) to Markdown.
    pub async fn convert(&mut self, images: Vec<PageImage>) -> Result<String, InferenceError> {
        let request = self.request(images);
        self.send(&request).await
    }

    /// Send `request`, pacing every attempt and retrying retryable failures.
    pub async fn send(&mut self, request: &ConversionRequest) -> Result<String, InferenceError> {
        if request.images.is_empty() {
            return Err(InferenceError::non_retryable("request contains no page images"));
        }

        let page = request.first_page();
        let mut retry = 0u32;

        loop {
            self.pace().await;

            debug!(
                "Page {}: sending {} image(s) to {} ({})",
                page,
                request.images.len(),
                self.backend.name(),
                request.model
            );
            let result = self.backend.describe(request).await;
            self.last_request = Some(Instant::now());

            let err = match result {
                Ok(markdown) => return Ok(markdown),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!("Page {}: {} rejected the request: {}", page, self.backend.name(), err.message);
                return Err(err);
            }
            if retry >= self.max_retries {
                warn!("Page {}: giving up after {} attempts: {}", page, retry + 1, err.message);
                return Err(InferenceError::exhausted(retry + 1, err));
            }

            retry += 1;
            let delay = backoff_delay(self.request_delay, retry, self.max_backoff);
            warn!(
                "Page {}: retry {}/{} after {:?}: {}",
                page, retry, self.max_retries, delay, err.message
            );
            if let Some(ref cb) = self.progress {
                cb.on_retry(page, retry, self.max_retries, delay, &err.message);
            }
            sleep(delay).await;
        }
    }

    /// Wait until `request_delay` has elapsed since the previous request.
    async fn pace(&self) {
        let Some(last) = self.last_request else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.request_delay {
            let wait = self.request_delay - elapsed;
            debug!("Rate limiting: waiting {:?} before next request", wait);
            sleep(wait).await;
        }
    }
}

/// Backoff before retry `retry` (1-based): `floor * 2^(retry-1)`, capped at `cap`.
pub fn backoff_delay(floor: Duration, retry: u32, cap: Duration) -> Duration {
    let exp = retry.saturating_sub(1).min(31);
    floor.saturating_mul(1u32 << exp).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceErrorKind;
    use crate::progress::ConversionProgressCallback;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned results and records when each call started.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, InferenceError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl VisionBackend for ScriptedBackend {
        fn describe<'a>(
            &'a self,
            _request: &'a ConversionRequest,
        ) -> BoxFuture<'a, Result<String, InferenceError>> {
            self.calls.lock().unwrap().push(Instant::now());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()));
            Box::pin(async move { next })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn page(n: usize) -> Vec<PageImage> {
        vec![PageImage::png(n, vec![n as u8])]
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let floor = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(floor, 1, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(floor, 2, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(floor, 3, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(floor, 7, cap), Duration::from_secs(60));
        assert_eq!(backoff_delay(floor, 200, cap), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_is_not_delayed() {
        let backend = ScriptedBackend::new(vec![Ok("# one".into())]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p");

        let start = Instant::now();
        let md = client.convert(page(1)).await.unwrap();
        assert_eq!(md, "# one");
        assert_eq!(backend.call_times()[0] - start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_requests_respect_pacing_floor() {
        let delay = Duration::from_millis(1500);
        let backend = ScriptedBackend::new(vec![]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p").with_request_delay(delay);

        for n in 1..=4 {
            client.convert(page(n)).await.unwrap();
        }

        let times = backend.call_times();
        assert_eq!(times.len(), 4);
        for gap in gaps(&times) {
            assert!(gap >= delay, "gap {gap:?} below floor {delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_back_off_exponentially() {
        let floor = Duration::from_secs(1);
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::retryable("429").with_status(429)),
            Err(InferenceError::retryable("503").with_status(503)),
            Ok("page two".into()),
        ]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p").with_request_delay(floor);

        let md = client.convert(page(2)).await.unwrap();
        assert_eq!(md, "page two");

        let g = gaps(&backend.call_times());
        assert_eq!(g.len(), 2);
        assert!(g[0] >= floor, "first retry waited {:?}", g[0]);
        assert!(g[1] >= floor * 2, "second retry waited {:?}", g[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_after_max_attempts() {
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::retryable("429")),
            Err(InferenceError::retryable("429")),
            Err(InferenceError::retryable("429")),
            Ok("never reached".into()),
        ]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p").with_max_retries(2);

        let err = client.convert(page(1)).await.unwrap_err();
        assert_eq!(err.kind, InferenceErrorKind::RetriesExhausted);
        assert_eq!(backend.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_is_returned_without_retry() {
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::non_retryable("401 Unauthorized").with_status(401)),
            Ok("never reached".into()),
        ]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p");

        let err = client.convert(page(1)).await.unwrap_err();
        assert_eq!(err.kind, InferenceErrorKind::NonRetryable);
        assert_eq!(err.status, Some(401));
        assert_eq!(backend.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_applies_after_a_retried_request() {
        let floor = Duration::from_secs(2);
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::retryable("429")),
            Ok("a".into()),
            Ok("b".into()),
        ]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p").with_request_delay(floor);

        client.convert(page(1)).await.unwrap();
        client.convert(page(2)).await.unwrap();

        for gap in gaps(&backend.call_times()) {
            assert!(gap >= floor);
        }
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let backend = ScriptedBackend::new(vec![]);
        let mut client = InferenceClient::new(backend.clone(), "m", "p");
        let err = client.convert(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, InferenceErrorKind::NonRetryable);
        assert!(backend.call_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_notices_reach_the_progress_callback() {
        struct Retries(Mutex<Vec<(usize, u32, Duration)>>);
        impl ConversionProgressCallback for Retries {
            fn on_retry(&self, page: usize, attempt: u32, _max: u32, delay: Duration, _error: &str) {
                self.0.lock().unwrap().push((page, attempt, delay));
            }
        }

        let seen = Arc::new(Retries(Mutex::new(Vec::new())));
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::retryable("429")),
            Err(InferenceError::retryable("429")),
            Ok("ok".into()),
        ]);
        let mut client = InferenceClient::new(backend, "m", "p")
            .with_request_delay(Duration::from_millis(500))
            .with_progress(seen.clone());

        client.convert(page(5)).await.unwrap();

        let events = seen.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (5, 1, Duration::from_millis(500)),
                (5, 2, Duration::from_millis(1000)),
            ]
        );
    }

    #[test]
    fn from_config_uses_backend_default_model_and_builtin_prompt() {
        let backend = ScriptedBackend::new(vec![]);
        let config = ConversionConfig::default();
        let client = InferenceClient::from_config(backend, &config);
        assert_eq!(client.model(), "scripted-model");
        let req = client.request(page(1));
        assert_eq!(req.prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(req.pages(), vec![1]);
    }
}

//! Concrete [`VisionBackend`]s and the logic that picks one.

pub mod openrouter;
pub mod provider;

pub use openrouter::OpenRouterBackend;
pub use provider::ProviderBackend;

use crate::config::ConversionConfig;
use crate::error::Vision2MdError;
use crate::pipeline::llm::VisionBackend;
use std::sync::Arc;
use tracing::debug;

/// Model used with named edgequake providers when none is configured.
const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-nano";

/// Resolve the backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`), used as-is. This is how tests
///    and embedders inject their own implementation.
/// 2. **Named provider** (`config.provider_name`). `"openrouter"` uses the
///    built-in HTTP backend; any other name goes through
///    `edgequake_llm::ProviderFactory`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`), both set.
/// 4. **`OPENROUTER_API_KEY`** present.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_backend(config: &ConversionConfig) -> Result<Arc<dyn VisionBackend>, Vision2MdError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    if let Some(ref name) = config.provider_name {
        debug!("Using configured provider '{}'", name);
        return named_backend(name, config.model.as_deref(), config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            debug!("Using provider '{}' from EDGEQUAKE_LLM_PROVIDER", prov);
            let model = config.model.as_deref().unwrap_or(&model);
            return named_backend(&prov, Some(model), config);
        }
    }

    if std::env::var(openrouter::OPENROUTER_API_KEY_ENV).is_ok_and(|k| !k.trim().is_empty()) {
        debug!("Using OpenRouter (OPENROUTER_API_KEY is set)");
        return Ok(Arc::new(OpenRouterBackend::from_env(config)?));
    }

    Ok(Arc::new(ProviderBackend::from_env(config)?))
}

fn named_backend(
    name: &str,
    model: Option<&str>,
    config: &ConversionConfig,
) -> Result<Arc<dyn VisionBackend>, Vision2MdError> {
    let openrouter_key = std::env::var(openrouter::OPENROUTER_API_KEY_ENV).unwrap_or_default();
    named_backend_with_key(name, model, config, &openrouter_key)
}

fn named_backend_with_key(
    name: &str,
    model: Option<&str>,
    config: &ConversionConfig,
    openrouter_key: &str,
) -> Result<Arc<dyn VisionBackend>, Vision2MdError> {
    if name.eq_ignore_ascii_case("openrouter") {
        let mut backend = OpenRouterBackend::new(openrouter_key, config)?;
        if let Some(model) = model {
            backend = backend.with_model(model);
        }
        return Ok(Arc::new(backend));
    }
    let model = model.unwrap_or(DEFAULT_PROVIDER_MODEL);
    Ok(Arc::new(ProviderBackend::create(name, model, config)?))
}

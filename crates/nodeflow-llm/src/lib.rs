pub mod pricing;
pub mod providers;
pub mod retry;

use nodeflow_core::config::{AppConfig, ModelConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ProviderAdapter;

pub use pricing::PricingTable;
pub use providers::openai::OpenAiAdapter;
pub use retry::RetryingAdapter;

/// Create a provider adapter based on the provider name.
///
/// Every supported provider speaks the OpenAI-compatible chat-completions
/// shape; vendor-native bindings are supplied by the embedding application.
pub fn create_adapter(config: &ModelConfig) -> Result<Box<dyn ProviderAdapter>> {
    match config.provider.as_str() {
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" | "workers-ai" => {
            Ok(Box::new(OpenAiAdapter::new()))
        }
        // Compatible gateways need an explicit endpoint
        _ if config.base_url.is_some() => Ok(Box::new(OpenAiAdapter::new())),
        other => Err(NodeflowError::UnsupportedProvider(other.to_string())),
    }
}

/// Primary adapter wrapped with retries and the configured fallback models.
pub fn create_retrying_adapter(config: &AppConfig) -> Result<Box<dyn ProviderAdapter>> {
    let primary = create_adapter(&config.model)?;
    let mut fallbacks = Vec::with_capacity(config.fallback_models.len());
    for fb in &config.fallback_models {
        fallbacks.push((fb.clone(), create_adapter(fb)?));
    }
    let retry = config.model.retry.clone().unwrap_or_default();
    Ok(Box::new(RetryingAdapter::new(primary, fallbacks, retry)))
}

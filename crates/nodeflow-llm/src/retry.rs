use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use nodeflow_core::config::{ModelConfig, RetryConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ProviderAdapter;
use nodeflow_core::types::*;

/// A provider adapter that retries failed requests and falls back to alternative models.
pub struct RetryingAdapter {
    primary: Box<dyn ProviderAdapter>,
    fallbacks: Vec<(ModelConfig, Box<dyn ProviderAdapter>)>,
    retry_config: RetryConfig,
}

impl RetryingAdapter {
    pub fn new(
        primary: Box<dyn ProviderAdapter>,
        fallbacks: Vec<(ModelConfig, Box<dyn ProviderAdapter>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &NodeflowError) -> bool {
    match e {
        NodeflowError::ProviderRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ProviderAdapter for RetryingAdapter {
    fn converse(
        &self,
        model: &ModelConfig,
        transcript: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        let model = model.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self
                    .primary
                    .converse(&model, transcript.clone(), &tools)
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying provider request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary provider exhausted, trying fallback models");
            }
            for (fb_model, fb_adapter) in &self.fallbacks {
                match fb_adapter
                    .converse(fb_model, transcript.clone(), &tools)
                    .await
                {
                    Ok(response) => {
                        info!(
                            model = %fb_model.model_id,
                            provider = %fb_model.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(response);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_model.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                        continue;
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| NodeflowError::ProviderRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails `failures` times with `error`, then answers.
    struct Flaky {
        calls: Arc<AtomicUsize>,
        failures: usize,
        error: fn() -> NodeflowError,
    }

    impl ProviderAdapter for Flaky {
        fn converse(
            &self,
            _model: &ModelConfig,
            _transcript: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<ProviderResponse>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.failures;
            let error = self.error;
            Box::pin(async move {
                if fail {
                    Err(error())
                } else {
                    Ok(ProviderResponse::final_answer("ok"))
                }
            })
        }
    }

    fn flaky(failures: usize, error: fn() -> NodeflowError) -> (Box<Flaky>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Flaky {
                calls: calls.clone(),
                failures,
                error,
            }),
            calls,
        )
    }

    fn model() -> ModelConfig {
        ModelConfig::new("openai", "gpt-4o-mini")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors() {
        let (primary, calls) = flaky(2, || NodeflowError::ProviderRequest("HTTP 503".into()));
        let adapter = RetryingAdapter::new(primary, vec![], RetryConfig::default());
        let resp = adapter.converse(&model(), vec![], &[]).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_parse_errors() {
        let (primary, calls) = flaky(5, || NodeflowError::ProviderParse("bad json".into()));
        let adapter = RetryingAdapter::new(primary, vec![], RetryConfig::default());
        let err = adapter.converse(&model(), vec![], &[]).await.unwrap_err();
        assert!(matches!(err, NodeflowError::ProviderParse(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_after_exhaustion() {
        let (primary, primary_calls) =
            flaky(usize::MAX, || NodeflowError::ProviderRequest("HTTP 500".into()));
        let (fallback, fallback_calls) =
            flaky(0, || NodeflowError::ProviderRequest("unused".into()));
        let config = RetryConfig {
            max_retries: 1,
            ..Default::default()
        };
        let adapter = RetryingAdapter::new(
            primary,
            vec![(ModelConfig::new("anthropic", "claude"), fallback as Box<dyn ProviderAdapter>)],
            config,
        );
        let resp = adapter.converse(&model(), vec![], &[]).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }
}

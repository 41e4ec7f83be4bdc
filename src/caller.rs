use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{ModelRegistry, RuntimeConfig};
use crate::error::{MoaError, MoaResult};
use crate::message::{Message, preview};
use crate::provider::{ChatCompletionRequest, ChatTransport, CompletionOutcome, HttpTransport};
use crate::telemetry::TelemetrySink;

/// Temperatures at or below this are sent as exactly zero.
pub const MIN_TEMPERATURE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl GenerationOptions {
    pub fn effective_temperature(&self) -> f64 {
        if self.temperature > MIN_TEMPERATURE {
            self.temperature
        } else {
            0.0
        }
    }
}

/// Bounded rate-limit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait used when the server sends no usable `retry-after`.
    pub default_retry_after: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_retry_after: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or(self.default_retry_after)
            .min(self.max_backoff)
    }
}

/// Anything that can turn a message list into one completion.
///
/// `Ok(None)` is a soft failure: the model answered but produced nothing usable.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> MoaResult<Option<String>>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct ModelCaller {
    registry: Arc<ModelRegistry>,
    transport: Arc<dyn ChatTransport>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    telemetry: TelemetrySink,
}

impl ModelCaller {
    pub fn new(
        registry: Arc<ModelRegistry>,
        transport: Arc<dyn ChatTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            transport,
            sleeper: Arc::new(TokioSleeper),
            retry,
            telemetry: TelemetrySink::disabled(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }
}

#[async_trait]
impl Generate for ModelCaller {
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> MoaResult<Option<String>> {
        let endpoint = self.registry.resolve(model)?;
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
            temperature: options.effective_temperature(),
        };
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            tracing::info!(
                model,
                attempt,
                endpoint = %endpoint.chat_completions_url(),
                messages = request.messages.len(),
                max_tokens = request.max_tokens,
                temperature = request.temperature,
                "sending chat completion request"
            );
            self.telemetry.emit(
                "model.requested",
                json!({"model": model, "attempt": attempt}),
            );

            let outcome = match self.transport.send(&endpoint, &request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(model, attempt, error = %err, "chat completion request failed");
                    self.telemetry.emit(
                        "model.failed",
                        json!({"model": model, "attempt": attempt, "error": err.to_string()}),
                    );
                    return Err(err);
                }
            };

            match outcome {
                CompletionOutcome::Success(text) => {
                    tracing::info!(model, attempt, output = %preview(&text, 20), "model call succeeded");
                    self.telemetry.emit(
                        "model.succeeded",
                        json!({"model": model, "attempt": attempt, "output_chars": text.chars().count()}),
                    );
                    return Ok(Some(text));
                }
                CompletionOutcome::Error(message) => {
                    tracing::warn!(model, attempt, error = %message, "model returned no usable completion");
                    self.telemetry.emit(
                        "model.soft_failed",
                        json!({"model": model, "attempt": attempt, "error": message}),
                    );
                    return Ok(None);
                }
                CompletionOutcome::RateLimited(retry_after) => {
                    self.telemetry.emit(
                        "model.rate_limited",
                        json!({
                            "model": model,
                            "attempt": attempt,
                            "retry_after_ms": retry_after.map(|d| d.as_millis() as u64),
                        }),
                    );
                    if attempt == max_attempts {
                        break;
                    }
                    let wait = self.retry.backoff_for(retry_after);
                    tracing::warn!(
                        model,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit exceeded; retrying after backoff"
                    );
                    self.sleeper.sleep(wait).await;
                }
            }
        }

        tracing::error!(model, max_attempts, "rate limit did not clear; giving up");
        Err(MoaError::RateLimitExhausted {
            model: model.to_string(),
            attempts: max_attempts,
        })
    }
}

pub fn build_model_caller(cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> MoaResult<ModelCaller> {
    let transport = HttpTransport::new(Duration::from_secs(cfg.request_timeout_secs))?;
    Ok(
        ModelCaller::new(Arc::new(cfg.registry.clone()), Arc::new(transport), cfg.retry)
            .with_telemetry(telemetry.clone()),
    )
}

//! OpenAI-compatible chat completions transport.
//!
//! One `send` is one HTTP request. Classification of the reply into a
//! [`CompletionOutcome`] happens here so the caller never inspects raw JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MoaError, MoaResult};
use crate::message::Message;

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Resolved endpoint for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub api_base: String,
    pub api_key: Option<String>,
}

impl ModelEndpoint {
    pub fn chat_completions_url(&self) -> String {
        chat_completions_url(&self.api_base)
    }
}

pub fn chat_completions_url(api_base: &str) -> String {
    format!("{}/chat/completions", api_base.trim_end_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Result of a single completion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Success(String),
    /// Server asked us to back off; `None` when it gave no usable hint.
    RateLimited(Option<Duration>),
    /// Soft failure: the reply arrived but carried no usable completion.
    Error(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &ModelEndpoint,
        request: &ChatCompletionRequest,
    ) -> MoaResult<CompletionOutcome>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> MoaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| MoaError::Transport {
                endpoint: "<client builder>".to_string(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(
        &self,
        endpoint: &ModelEndpoint,
        request: &ChatCompletionRequest,
    ) -> MoaResult<CompletionOutcome> {
        let url = endpoint.chat_completions_url();
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = endpoint.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|source| MoaError::Transport {
            endpoint: url.clone(),
            source,
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|source| MoaError::Transport {
            endpoint: url.clone(),
            source,
        })?;

        tracing::debug!(status, endpoint = %url, body_len = body.len(), "chat completion response received");

        classify_response(status, retry_after.as_deref(), &body).map_err(|body| MoaError::Http {
            endpoint: url,
            status,
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default, rename = "retry-after", alias = "retry_after")]
    retry_after: Option<Value>,
}

impl ApiError {
    fn is_rate_limit(&self) -> bool {
        match &self.code {
            Some(Value::Number(n)) => n.as_u64() == Some(429),
            Some(Value::String(s)) => {
                let code = s.to_ascii_lowercase();
                code == "429" || code.contains("rate_limit")
            }
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self.retry_after.as_ref()? {
            Value::Number(n) => n.as_f64().and_then(seconds_to_duration),
            Value::String(s) => parse_retry_after(s),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match (&self.message, &self.code) {
            (Some(message), Some(code)) => format!("{message} (code {code})"),
            (Some(message), None) => message.clone(),
            (None, Some(code)) => format!("provider error code {code}"),
            (None, None) => "provider returned an error object".to_string(),
        }
    }
}

/// Classify a raw HTTP reply.
///
/// `Err(body)` marks a hard HTTP failure that must propagate; everything else
/// is a [`CompletionOutcome`].
pub fn classify_response(
    status: u16,
    retry_after_header: Option<&str>,
    body: &str,
) -> Result<CompletionOutcome, String> {
    let success = (200..300).contains(&status);
    let parsed = serde_json::from_str::<ChatCompletionResponse>(body);

    if status == 429 {
        let retry_after = retry_after_header.and_then(parse_retry_after).or_else(|| {
            parsed
                .as_ref()
                .ok()
                .and_then(|reply| reply.error.as_ref())
                .and_then(ApiError::retry_after)
        });
        return Ok(CompletionOutcome::RateLimited(retry_after));
    }

    let reply = match parsed {
        Ok(reply) => reply,
        Err(err) if success => {
            return Ok(CompletionOutcome::Error(format!(
                "malformed completion body: {err}"
            )));
        }
        Err(_) => return Err(truncate_body(body)),
    };

    if let Some(error) = reply.error.as_ref() {
        if error.is_rate_limit() {
            let retry_after = retry_after_header
                .and_then(parse_retry_after)
                .or_else(|| error.retry_after());
            return Ok(CompletionOutcome::RateLimited(retry_after));
        }
        if !success {
            return Err(truncate_body(body));
        }
        return Ok(CompletionOutcome::Error(error.describe()));
    }

    if !success {
        return Err(truncate_body(body));
    }

    let content = reply
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content);

    match content.map(|text| text.trim().to_string()) {
        Some(text) if !text.is_empty() => Ok(CompletionOutcome::Success(text)),
        Some(_) => Ok(CompletionOutcome::Error(
            "completion content was empty".to_string(),
        )),
        None => Ok(CompletionOutcome::Error(
            "response contained no choices with message content".to_string(),
        )),
    }
}

/// Parse a `retry-after` value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(seconds_to_duration)
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn truncate_body(body: &str) -> String {
    crate::message::preview(body.trim(), ERROR_BODY_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completions_url_trims_trailing_slash() {
        assert_eq!(
            chat_completions_url("https://api.groq.com/openai/v1/"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:8000/v1"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn success_body_yields_trimmed_first_choice() {
        let body = r#"{"choices":[{"message":{"content":"  Paris.\n"}},{"message":{"content":"ignored"}}]}"#;
        assert_eq!(
            classify_response(200, None, body),
            Ok(CompletionOutcome::Success("Paris.".to_string()))
        );
    }

    #[test]
    fn status_429_uses_header_then_body_then_none() {
        assert_eq!(
            classify_response(429, Some("7"), "{}"),
            Ok(CompletionOutcome::RateLimited(Some(Duration::from_secs(7))))
        );

        let body = r#"{"error":{"code":429,"retry-after":"2.5"}}"#;
        assert_eq!(
            classify_response(429, None, body),
            Ok(CompletionOutcome::RateLimited(Some(Duration::from_millis(
                2500
            ))))
        );

        assert_eq!(
            classify_response(429, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "too many"),
            Ok(CompletionOutcome::RateLimited(None))
        );
    }

    #[test]
    fn rate_limit_error_body_on_200_is_rate_limited() {
        let body = r#"{"error":{"code":"rate_limit_exceeded","message":"slow down","retry_after":3}}"#;
        assert_eq!(
            classify_response(200, None, body),
            Ok(CompletionOutcome::RateLimited(Some(Duration::from_secs(3))))
        );
    }

    #[test]
    fn error_object_or_missing_choices_is_soft_failure() {
        let body = r#"{"error":{"message":"model overloaded","code":"overloaded"}}"#;
        match classify_response(200, None, body) {
            Ok(CompletionOutcome::Error(message)) => assert!(message.contains("model overloaded")),
            other => panic!("expected soft error, got {other:?}"),
        }

        assert!(matches!(
            classify_response(200, None, r#"{"id":"x"}"#),
            Ok(CompletionOutcome::Error(_))
        ));
        assert!(matches!(
            classify_response(200, None, "<html>gateway</html>"),
            Ok(CompletionOutcome::Error(_))
        ));
        assert!(matches!(
            classify_response(200, None, r#"{"choices":[{"message":{"content":null}}]}"#),
            Ok(CompletionOutcome::Error(_))
        ));
    }

    #[test]
    fn non_success_status_is_hard_failure() {
        let result = classify_response(500, None, "internal error");
        assert_eq!(result, Err("internal error".to_string()));

        let body = r#"{"error":{"message":"invalid api key","code":"invalid_api_key"}}"#;
        assert!(classify_response(401, None, body).is_err());
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }
}

/// Errors raised by the MoA library layer.
///
/// Soft model failures (malformed or error bodies) are not errors: the caller
/// surfaces them as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum MoaError {
    #[error("unknown model '{model}': no api_base configured for it")]
    UnknownModel { model: String },
    #[error("api key for model '{model}' is not available: environment variable {env} is unset")]
    MissingApiKey { model: String, env: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("rate limit for model '{model}' did not clear after {attempts} attempts")]
    RateLimitExhausted { model: String, attempts: u32 },
    #[error("request to '{endpoint}' failed with HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("request to '{endpoint}' failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("layer {layer} produced no output from {agents} agents")]
    EmptyLayer { layer: u32, agents: u32 },
    #[error("round {round} produced no references from {models} reference models")]
    EmptyRound { round: u32, models: usize },
    #[error("aggregate model '{model}' returned no output")]
    NoAggregateOutput { model: String },
}

pub type MoaResult<T> = std::result::Result<T, MoaError>;

impl MoaError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MoaError::UnknownModel { .. }
                | MoaError::MissingApiKey { .. }
                | MoaError::InvalidConfig(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Provider,
    RateLimit,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Declare every model under [models.\"<id>\"] in .moa/config.toml (or pass --api-base) and export its api_key_env."
            }
            ErrorCategory::Provider => {
                "Check the model endpoint and credentials, then retry with RUST_LOG=info to see request logs."
            }
            ErrorCategory::RateLimit => {
                "The provider kept rate limiting. Raise --max-attempts/--max-backoff-secs or use fewer reference models."
            }
            ErrorCategory::Input => "Run moa-cli --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(moa) = err.chain().find_map(|cause| cause.downcast_ref::<MoaError>()) {
        if moa.is_config() {
            return ErrorCategory::Config;
        }
        return match moa {
            MoaError::RateLimitExhausted { .. } => ErrorCategory::RateLimit,
            _ => ErrorCategory::Provider,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("profile") || msg.contains("config") || msg.contains("api_key") {
        return ErrorCategory::Config;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("429") || msg.contains("rate limit") {
        return ErrorCategory::RateLimit;
    }

    if msg.contains("http") || msg.contains("model") {
        return ErrorCategory::Provider;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let text = format!("{err:#}");
    if show_sensitive_config {
        text
    } else {
        redact_sensitive_text(&text)
    }
}

pub fn redact_sensitive_text(text: &str) -> String {
    redact_api_keys(text)
}

const KEY_PREFIXES: &[&str] = &["Bearer ", "sk-", "gsk_", "xai-"];

/// Replaces bearer tokens and well-known API key shapes with a marker.
pub fn redact_api_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some((offset, prefix)) = KEY_PREFIXES
        .iter()
        .filter_map(|prefix| text[cursor..].find(prefix).map(|offset| (offset, *prefix)))
        .min_by_key(|(offset, _)| *offset)
    {
        let start = cursor + offset;
        out.push_str(&text[cursor..start]);

        let secret_start = start + prefix.len();
        let inside_word = text[..start]
            .chars()
            .next_back()
            .is_some_and(|ch| ch.is_ascii_alphanumeric());
        if inside_word {
            out.push_str(prefix);
            cursor = secret_start;
            continue;
        }

        let remainder = &text[secret_start..];
        let end = remainder
            .find(|ch: char| {
                ch.is_whitespace() || matches!(ch, '"' | '\'' | ',' | ';' | ')' | ']' | '}')
            })
            .unwrap_or(remainder.len());

        if end == 0 {
            out.push_str(prefix);
        } else {
            out.push_str(&redact_api_key_value(prefix));
        }
        cursor = secret_start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

pub fn redact_api_key_value(prefix: &str) -> String {
    format!("{prefix}[REDACTED]")
}

/// Short masked form for display, e.g. `gsk_…9f2c`.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().collect::<Vec<char>>();
    if chars.len() <= 8 {
        return "[REDACTED]".to_string();
    }
    let head = chars[..4].iter().collect::<String>();
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens_and_key_prefixes() {
        let text = "auth failed: Authorization: Bearer abc123 using key sk-live-999, retry";
        let redacted = redact_api_keys(text);
        assert_eq!(
            redacted,
            "auth failed: Authorization: Bearer [REDACTED] using key sk-[REDACTED], retry"
        );
    }

    #[test]
    fn leaves_text_without_secrets_untouched() {
        let text = "request to 'https://api.example.com/v1/chat/completions' failed for task-runner";
        assert_eq!(redact_api_keys(text), text);
    }

    #[test]
    fn typed_errors_map_to_categories() {
        let unknown = anyhow::Error::new(MoaError::UnknownModel {
            model: "ghost".to_string(),
        });
        assert_eq!(categorize_error(&unknown), ErrorCategory::Config);

        let exhausted = anyhow::Error::new(MoaError::RateLimitExhausted {
            model: "m".to_string(),
            attempts: 3,
        })
        .context("aggregate call failed");
        assert_eq!(categorize_error(&exhausted), ErrorCategory::RateLimit);

        let layer = anyhow::Error::new(MoaError::EmptyLayer {
            layer: 2,
            agents: 3,
        });
        assert_eq!(categorize_error(&layer), ErrorCategory::Provider);
    }

    #[test]
    fn untyped_errors_fall_back_to_message_heuristics() {
        let err = anyhow::anyhow!("profile 'fast' not found in '.moa/config.toml'");
        assert_eq!(categorize_error(&err), ErrorCategory::Config);

        let err = anyhow::anyhow!("failed to read input from stdin");
        assert_eq!(categorize_error(&err), ErrorCategory::Input);

        let err = anyhow::anyhow!("something odd");
        assert_eq!(categorize_error(&err), ErrorCategory::Internal);
    }

    #[test]
    fn format_cli_error_includes_code_and_hint() {
        let err = anyhow::Error::new(MoaError::MissingApiKey {
            model: "llama".to_string(),
            env: "GROQ_API_KEY".to_string(),
        });
        let rendered = format_cli_error(&err, false);
        assert!(rendered.starts_with("[CONFIG] "));
        assert!(rendered.contains("GROQ_API_KEY"));
        assert!(rendered.contains("Hint: "));
    }

    #[test]
    fn mask_secret_keeps_only_edges() {
        assert_eq!(mask_secret("short"), "[REDACTED]");
        assert_eq!(mask_secret("gsk_1234567890abcd"), "gsk_…abcd");
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::caller::{GenerationOptions, RetryPolicy};
use crate::cli::*;
use crate::error::{MoaError, MoaResult};
use crate::moa::LayerShape;
use crate::provider::ModelEndpoint;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f64 = 0.9;
pub const DEFAULT_ROUNDS: u32 = 1;
pub const DEFAULT_LAYERS: u32 = 2;
pub const DEFAULT_AGENTS_PER_LAYER: u32 = 2;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub aggregate_model: Option<String>,
    pub reference_models: Vec<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub rounds: u32,
    pub layers: u32,
    pub agents_per_layer: u32,
    pub multi_turn: bool,
    pub strategy: ReferenceStrategy,
    pub retry: RetryPolicy,
    pub request_timeout_secs: u64,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
    pub show_sensitive_config: bool,
    pub registry: ModelRegistry,
}

impl RuntimeConfig {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn require_aggregate_model(&self) -> MoaResult<&str> {
        self.aggregate_model.as_deref().ok_or_else(|| {
            MoaError::InvalidConfig(format!(
                "no aggregate model configured for profile '{}'. Set --aggregate-model or aggregate_model in '{}'.",
                self.profile, self.config_path
            ))
        })
    }

    /// Aggregate model first, then reference models, without duplicates.
    pub fn profile_models(&self) -> Vec<String> {
        let mut models = Vec::new();
        if let Some(aggregate) = self.aggregate_model.as_ref() {
            models.push(aggregate.clone());
        }
        merge_unique_names(&models, &self.reference_models)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelFileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub aggregate_model: Option<String>,
    #[serde(default)]
    pub reference_models: Vec<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub rounds: Option<u32>,
    pub layers: Option<u32>,
    pub agents_per_layer: Option<u32>,
    pub multi_turn: Option<bool>,
    pub strategy: Option<ReferenceStrategy>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub max_attempts: Option<u32>,
    pub max_backoff_secs: Option<u64>,
    pub default_retry_after_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

/// Endpoint declaration for one model id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFileConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
}

impl ModelFileConfig {
    pub fn key_source_label(&self) -> String {
        if self.api_key.as_deref().is_some_and(|key| !key.is_empty()) {
            "inline".to_string()
        } else if let Some(env) = self.api_key_env.as_deref() {
            format!("env:{env}")
        } else {
            "none".to_string()
        }
    }
}

/// Static model id → endpoint table, built once at startup.
///
/// Ids without a declaration of their own resolve to the fallback endpoint
/// (`--api-base` or the profile's `api_base`) when one is configured.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelFileConfig>,
    fallback: Option<ModelFileConfig>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, config: ModelFileConfig) {
        self.entries.insert(model.into(), config);
    }

    pub fn set_fallback(&mut self, fallback: Option<ModelFileConfig>) {
        self.fallback = fallback;
    }

    pub fn fallback(&self) -> Option<&ModelFileConfig> {
        self.fallback.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.fallback.is_none()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ModelFileConfig)> {
        self.entries.iter()
    }

    /// Look up a model's endpoint and credentials. Performs no I/O beyond
    /// reading the process environment.
    pub fn resolve(&self, model: &str) -> MoaResult<ModelEndpoint> {
        let entry = self
            .entries
            .get(model)
            .or(self.fallback.as_ref())
            .ok_or_else(|| MoaError::UnknownModel {
                model: model.to_string(),
            })?;

        let api_base = entry.api_base.trim();
        if api_base.is_empty() {
            return Err(MoaError::InvalidConfig(format!(
                "model '{model}' has an empty api_base"
            )));
        }

        let api_key = match (entry.api_key.as_deref(), entry.api_key_env.as_deref()) {
            (Some(key), _) if !key.trim().is_empty() => Some(key.trim().to_string()),
            (_, Some(env)) => Some(
                std::env::var(env)
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| MoaError::MissingApiKey {
                        model: model.to_string(),
                        env: env.to_string(),
                    })?,
            ),
            _ => None,
        };

        Ok(ModelEndpoint {
            api_base: api_base.to_string(),
            api_key,
        })
    }
}

#[cfg(test)]
impl ModelRegistry {
    pub fn with_model(mut self, model: &str, api_base: &str, api_key: Option<&str>) -> Self {
        self.insert(
            model,
            ModelFileConfig {
                api_base: api_base.to_string(),
                api_key: api_key.map(ToString::to_string),
                api_key_env: None,
            },
        );
        self
    }
}

pub fn load_config_file(config_path: &str) -> Result<ConfigFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at '{}'", path.display()))?;
    parse_config_file(&content).with_context(|| {
        format!(
            "invalid configuration in '{}'. Check profile/model field names and values.",
            path.display()
        )
    })
}

pub fn parse_config_file(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str::<ConfigFile>(content)?)
}

fn merge_unique_names(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::<String>::new();
    let mut merged = Vec::<String>::new();

    for name in first.iter().chain(second.iter()) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            merged.push(trimmed.to_string());
        }
    }

    merged
}

fn clean_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Temperatures must be finite and non-negative.
pub fn validate_temperature(temperature: f64) -> MoaResult<f64> {
    if !temperature.is_finite() || temperature < 0.0 {
        return Err(MoaError::InvalidConfig(format!(
            "temperature must be a non-negative number, got {temperature}"
        )));
    }
    Ok(temperature)
}

pub fn resolve_runtime_config(cli: &Cli, file: &ConfigFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !file.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        file.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = file.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let temperature = cli
        .temperature
        .or(profile.temperature)
        .unwrap_or(DEFAULT_TEMPERATURE);
    let temperature = validate_temperature(temperature)?;

    let aggregate_model = cli
        .aggregate_model
        .clone()
        .or(profile.aggregate_model.clone())
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty());
    let reference_models = if cli.reference_models.is_empty() {
        clean_names(&profile.reference_models)
    } else {
        clean_names(&cli.reference_models)
    };

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: cli
            .max_attempts
            .or(profile.max_attempts)
            .unwrap_or(defaults.max_attempts)
            .max(1),
        default_retry_after: cli
            .default_retry_after_secs
            .or(profile.default_retry_after_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_retry_after),
        max_backoff: cli
            .max_backoff_secs
            .or(profile.max_backoff_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_backoff),
    };

    let fallback_endpoint = cli
        .api_base
        .clone()
        .or(profile.api_base.clone())
        .map(|api_base| ModelFileConfig {
            api_base,
            api_key: profile.api_key.clone(),
            api_key_env: cli.api_key_env.clone().or(profile.api_key_env.clone()),
        });

    let mut cfg = RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        aggregate_model,
        reference_models,
        temperature,
        max_tokens: cli
            .max_tokens
            .or(profile.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .max(1),
        rounds: cli
            .rounds
            .or(profile.rounds)
            .unwrap_or(DEFAULT_ROUNDS)
            .max(1),
        layers: cli
            .layers
            .or(profile.layers)
            .unwrap_or(DEFAULT_LAYERS),
        agents_per_layer: cli
            .agents_per_layer
            .or(profile.agents_per_layer)
            .unwrap_or(DEFAULT_AGENTS_PER_LAYER),
        multi_turn: cli.multi_turn.or(profile.multi_turn).unwrap_or(false),
        strategy: cli
            .strategy
            .or(profile.strategy)
            .unwrap_or(ReferenceStrategy::Direct),
        retry,
        request_timeout_secs: cli
            .request_timeout_secs
            .or(profile.request_timeout_secs)
            .unwrap_or(120)
            .max(1),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".moa/telemetry/events.jsonl".to_string()),
        show_sensitive_config: cli.show_sensitive_config,
        registry: ModelRegistry::new(),
    };

    LayerShape {
        layers: cfg.layers,
        agents_per_layer: cfg.agents_per_layer,
    }
    .validate()?;

    cfg.registry = build_model_registry(file, fallback_endpoint);
    Ok(cfg)
}

/// Declared models, with the fallback endpoint used for every other id.
pub fn build_model_registry(file: &ConfigFile, fallback: Option<ModelFileConfig>) -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    for (model, config) in &file.models {
        registry.insert(model.clone(), config.clone());
    }
    registry.set_fallback(fallback);
    registry
}

pub fn display_api_key_source(cfg: &RuntimeConfig, entry: &ModelFileConfig) -> String {
    match entry.api_key.as_deref() {
        Some(key) if !key.is_empty() && cfg.show_sensitive_config => key.to_string(),
        Some(key) if !key.is_empty() => format!(
            "inline {} (set --show-sensitive-config to reveal)",
            crate::error::mask_secret(key)
        ),
        _ => entry.key_source_label(),
    }
}

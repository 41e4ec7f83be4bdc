use anyhow::Result;

use crate::config::RuntimeConfig;
use crate::error::MoaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCheck {
    Ready,
    Unknown,
    MissingKey(String),
    Invalid(String),
}

impl ModelCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelCheck::Ready)
    }

    pub fn describe(&self) -> String {
        match self {
            ModelCheck::Ready => "ok".to_string(),
            ModelCheck::Unknown => "unknown model (no [models] entry and no --api-base)".to_string(),
            ModelCheck::MissingKey(env) => format!("missing api key ({env} is unset)"),
            ModelCheck::Invalid(reason) => format!("invalid: {reason}"),
        }
    }
}

pub fn check_model(cfg: &RuntimeConfig, model: &str) -> ModelCheck {
    match cfg.registry.resolve(model) {
        Ok(_) => ModelCheck::Ready,
        Err(MoaError::UnknownModel { .. }) => ModelCheck::Unknown,
        Err(MoaError::MissingApiKey { env, .. }) => ModelCheck::MissingKey(env),
        Err(other) => ModelCheck::Invalid(other.to_string()),
    }
}

/// Checks every model the active profile will call. Never touches the network.
pub fn collect_model_checks(cfg: &RuntimeConfig) -> Vec<(String, ModelCheck)> {
    cfg.profile_models()
        .into_iter()
        .map(|model| {
            let check = check_model(cfg, &model);
            (model, check)
        })
        .collect()
}

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    match cfg.aggregate_model.as_deref() {
        Some(model) => println!("Aggregate model: {model}"),
        None => {
            println!("Aggregate model: <not configured>");
            println!("Tip: set aggregate_model in the profile or pass --aggregate-model");
        }
    }
    println!("Reference models: {}", cfg.reference_models.len());
    println!(
        "Shape: rounds={} strategy={} layers={} agents_per_layer={}",
        cfg.rounds,
        cfg.strategy.label(),
        cfg.layers,
        cfg.agents_per_layer
    );
    println!(
        "Retry: max_attempts={} max_backoff_secs={} timeout_secs={}",
        cfg.retry.max_attempts,
        cfg.retry.max_backoff.as_secs(),
        cfg.request_timeout_secs
    );

    println!("Model endpoint check:");
    let checks = collect_model_checks(cfg);
    if checks.is_empty() {
        println!("- no models selected by this profile");
    }
    for (model, check) in &checks {
        println!("- {model}: {}", check.describe());
    }

    let failing = checks.iter().filter(|(_, check)| !check.is_ready()).count();
    if failing > 0 {
        return Err(anyhow::Error::new(MoaError::InvalidConfig(format!(
            "{failing} model(s) are not ready for profile '{}'",
            cfg.profile
        ))));
    }

    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );
    Ok(())
}

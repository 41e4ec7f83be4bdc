use anyhow::Result;

use crate::config::{ConfigFile, RuntimeConfig, display_api_key_source};

pub fn run_profiles_list(file: &ConfigFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = file.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if file.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!(
        "Aggregate model: {}",
        cfg.aggregate_model.as_deref().unwrap_or("<not configured>")
    );
    println!(
        "Reference models: {}",
        if cfg.reference_models.is_empty() {
            "<none>".to_string()
        } else {
            cfg.reference_models.join(", ")
        }
    );
    println!("Temperature: {}", cfg.temperature);
    println!("Max tokens: {}", cfg.max_tokens);
    println!("Rounds: {}", cfg.rounds);
    println!("Reference strategy: {}", cfg.strategy.label());
    println!(
        "Layers: {} x {} agents per layer",
        cfg.layers, cfg.agents_per_layer
    );
    println!("Multi-turn: {}", cfg.multi_turn);
    println!(
        "Retry: max_attempts={} default_retry_after_secs={} max_backoff_secs={}",
        cfg.retry.max_attempts,
        cfg.retry.default_retry_after.as_secs(),
        cfg.retry.max_backoff.as_secs()
    );
    println!("Request timeout (secs): {}", cfg.request_timeout_secs);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    println!("Declared models: {}", cfg.registry.len());
    println!(
        "Fallback endpoint: {}",
        cfg.registry
            .fallback()
            .map(|fallback| fallback.api_base.as_str())
            .unwrap_or("<none>")
    );
    Ok(())
}

pub fn run_models_list(cfg: &RuntimeConfig) -> Result<()> {
    if cfg.registry.is_empty() {
        println!(
            "No models configured. Add [models.\"<id>\"] entries to '{}' or pass --api-base.",
            cfg.config_path
        );
        return Ok(());
    }

    let profile_models = cfg.profile_models();
    println!("Configured models:");
    for (model, entry) in cfg.registry.entries() {
        let marker = if profile_models.contains(model) { "*" } else { " " };
        println!(
            "{marker} {model} -> {} (key: {})",
            entry.api_base,
            display_api_key_source(cfg, entry)
        );
    }
    if let Some(fallback) = cfg.registry.fallback() {
        println!(
            "  <any other id> -> {} (key: {})",
            fallback.api_base,
            display_api_key_source(cfg, fallback)
        );
    }
    Ok(())
}

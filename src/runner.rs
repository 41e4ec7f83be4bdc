use anyhow::{Context, Result};

use crate::caller::Generate;
use crate::config::RuntimeConfig;
use crate::message::Message;
use crate::moa::{LayerShape, MoaOutcome, MoaPlan, generate_layered, run_moa};

/// One-shot MoA turn for `ask`.
pub async fn run_ask(
    cfg: &RuntimeConfig,
    generator: &dyn Generate,
    prompt: &str,
) -> Result<MoaOutcome> {
    let plan = MoaPlan::from_config(cfg)?;
    tracing::info!(
        aggregate_model = %plan.aggregate_model,
        references = plan.reference_models.len(),
        rounds = plan.rounds,
        strategy = plan.strategy.label(),
        "running mixture-of-agents turn"
    );
    let messages = vec![Message::user(prompt)];
    run_moa(generator, &plan, &messages)
        .await
        .with_context(|| format!("mixture-of-agents turn failed for profile '{}'", cfg.profile))
}

/// Layered aggregator on the aggregate model, without reference rounds.
pub async fn run_layered_prompt(
    cfg: &RuntimeConfig,
    generator: &dyn Generate,
    prompt: &str,
) -> Result<String> {
    let model = cfg.require_aggregate_model()?;
    let shape = LayerShape {
        layers: cfg.layers,
        agents_per_layer: cfg.agents_per_layer,
    };
    tracing::info!(
        model,
        layers = shape.layers,
        agents_per_layer = shape.agents_per_layer,
        calls = shape.total_calls(),
        "running layered generation"
    );
    let messages = vec![Message::user(prompt)];
    generate_layered(
        generator,
        model,
        &messages,
        &cfg.generation_options(),
        shape,
    )
    .await
    .with_context(|| format!("layered generation failed for model '{model}'"))
}

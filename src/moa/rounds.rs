use crate::caller::{GenerationOptions, Generate};
use crate::cli::ReferenceStrategy;
use crate::config::RuntimeConfig;
use crate::error::{MoaError, MoaResult};
use crate::message::{Message, preview};
use crate::moa::layered::{LayerShape, generate_layered};
use crate::moa::references::{generate_with_references, inject_references};

/// Everything one MoA turn needs, detached from CLI/profile plumbing.
#[derive(Debug, Clone, PartialEq)]
pub struct MoaPlan {
    pub aggregate_model: String,
    pub reference_models: Vec<String>,
    pub options: GenerationOptions,
    pub rounds: u32,
    pub strategy: ReferenceStrategy,
    pub shape: LayerShape,
}

impl MoaPlan {
    pub fn from_config(cfg: &RuntimeConfig) -> MoaResult<Self> {
        let plan = Self {
            aggregate_model: cfg.require_aggregate_model()?.to_string(),
            reference_models: cfg.reference_models.clone(),
            options: cfg.generation_options(),
            rounds: cfg.rounds,
            strategy: cfg.strategy,
            shape: LayerShape {
                layers: cfg.layers,
                agents_per_layer: cfg.agents_per_layer,
            },
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> MoaResult<()> {
        if self.rounds == 0 {
            return Err(MoaError::InvalidConfig(
                "rounds must be at least 1".to_string(),
            ));
        }
        if self.strategy == ReferenceStrategy::Layered {
            self.shape.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoaOutcome {
    pub answer: String,
    /// References injected into the aggregate call (last round's outputs).
    pub references: Vec<String>,
}

/// One MoA turn: `rounds` passes over the reference models, then a single
/// aggregate call with the final references injected.
///
/// Calls are strictly sequential. Round `n` sees the references produced by
/// round `n - 1`.
pub async fn run_moa(
    generator: &dyn Generate,
    plan: &MoaPlan,
    messages: &[Message],
) -> MoaResult<MoaOutcome> {
    plan.validate()?;

    let mut references = Vec::<String>::new();
    if plan.reference_models.is_empty() {
        tracing::info!("no reference models configured; calling aggregate model directly");
    } else {
        for round in 1..=plan.rounds {
            tracing::info!(round, rounds = plan.rounds, strategy = plan.strategy.label(), "starting reference round");
            references = run_reference_round(generator, plan, messages, &references, round).await?;
        }
    }

    tracing::info!(
        model = %plan.aggregate_model,
        references = references.len(),
        "aggregating results and querying the aggregate model"
    );
    let answer = generate_with_references(
        generator,
        &plan.aggregate_model,
        messages,
        &references,
        &plan.options,
    )
    .await?
    .ok_or_else(|| MoaError::NoAggregateOutput {
        model: plan.aggregate_model.clone(),
    })?;

    Ok(MoaOutcome { answer, references })
}

async fn run_reference_round(
    generator: &dyn Generate,
    plan: &MoaPlan,
    messages: &[Message],
    previous: &[String],
    round: u32,
) -> MoaResult<Vec<String>> {
    let mut produced = Vec::with_capacity(plan.reference_models.len());

    for model in &plan.reference_models {
        let output = match plan.strategy {
            ReferenceStrategy::Direct => {
                generate_with_references(generator, model, messages, previous, &plan.options)
                    .await?
            }
            ReferenceStrategy::Layered => {
                let injected = inject_references(messages, previous);
                match generate_layered(generator, model, &injected, &plan.options, plan.shape).await {
                    Ok(text) => Some(text),
                    Err(MoaError::EmptyLayer { layer, agents }) => {
                        tracing::warn!(model = %model, round, layer, agents, "layered reference stopped early");
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        match output {
            Some(text) => {
                tracing::info!(model = %model, round, output = %preview(&text, 20), "finished querying reference model");
                produced.push(text);
            }
            None => tracing::warn!(model = %model, round, "reference model returned no output"),
        }
    }

    if produced.is_empty() {
        return Err(MoaError::EmptyRound {
            round,
            models: plan.reference_models.len(),
        });
    }
    Ok(produced)
}

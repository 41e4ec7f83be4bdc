use crate::caller::{GenerationOptions, Generate};
use crate::error::{MoaError, MoaResult};
use crate::message::{Message, preview};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShape {
    pub layers: u32,
    pub agents_per_layer: u32,
}

impl LayerShape {
    pub fn validate(&self) -> MoaResult<()> {
        if self.layers == 0 || self.agents_per_layer == 0 {
            return Err(MoaError::InvalidConfig(format!(
                "layered generation needs at least one layer and one agent per layer (got {} x {})",
                self.layers, self.agents_per_layer
            )));
        }
        Ok(())
    }

    pub fn total_calls(&self) -> u32 {
        self.layers.saturating_mul(self.agents_per_layer)
    }
}

/// Runs `layers x agents_per_layer` sequential calls of `model`.
///
/// Each layer's successful outputs, as assistant messages, are the next
/// layer's input. Returns the first successful output of the last layer.
/// A layer with no successful output stops layering with
/// [`MoaError::EmptyLayer`].
pub async fn generate_layered(
    generator: &dyn Generate,
    model: &str,
    messages: &[Message],
    options: &GenerationOptions,
    shape: LayerShape,
) -> MoaResult<String> {
    shape.validate()?;

    let mut current = messages.to_vec();
    let mut last_output = None;

    for layer in 1..=shape.layers {
        let mut outputs = Vec::with_capacity(shape.agents_per_layer as usize);
        for agent in 1..=shape.agents_per_layer {
            match generator.generate(model, &current, options).await? {
                Some(text) => {
                    tracing::debug!(model, layer, agent, output = %preview(&text, 20), "layer agent finished");
                    outputs.push(text);
                }
                None => tracing::warn!(model, layer, agent, "layer agent produced no output"),
            }
        }

        if outputs.is_empty() {
            tracing::error!(model, layer, agents = shape.agents_per_layer, "layer produced no output; stopping");
            return Err(MoaError::EmptyLayer {
                layer,
                agents: shape.agents_per_layer,
            });
        }

        tracing::info!(model, layer, outputs = outputs.len(), "layer complete");
        last_output = outputs.first().cloned();
        current = outputs.into_iter().map(Message::assistant).collect();
    }

    last_output.ok_or_else(|| {
        MoaError::InvalidConfig("layered generation ran no layers".to_string())
    })
}

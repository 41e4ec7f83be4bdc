use crate::caller::{GenerationOptions, Generate};
use crate::error::MoaResult;
use crate::message::{Message, Role};

pub const SYNTHESIS_PREAMBLE: &str = "You have been provided with a set of responses from various open-source models to the latest user query. Your task is to synthesize these responses into a single, high-quality response. It is crucial to critically evaluate the information provided in these responses, recognizing that some of it may be biased or incorrect. Your response should not simply replicate the given answers but should offer a refined, accurate, and comprehensive reply to the instruction. Ensure your response is well-structured, coherent, and adheres to the highest standards of accuracy and reliability. \n\nResponses from models:";

pub fn synthesis_prompt(references: &[String]) -> String {
    let mut prompt = SYNTHESIS_PREAMBLE.to_string();
    for (index, reference) in references.iter().enumerate() {
        prompt.push_str(&format!("\n{}. {}", index + 1, reference));
    }
    prompt
}

/// Returns a new message list with the references folded into the system
/// message. The input slice is never modified.
pub fn inject_references(messages: &[Message], references: &[String]) -> Vec<Message> {
    let mut injected = messages.to_vec();
    if references.is_empty() {
        return injected;
    }

    let prompt = synthesis_prompt(references);
    match injected.first_mut() {
        Some(first) if first.role == Role::System => {
            first.content.push_str("\n\n");
            first.content.push_str(&prompt);
        }
        _ => injected.insert(0, Message::system(prompt)),
    }
    injected
}

pub async fn generate_with_references(
    generator: &dyn Generate,
    model: &str,
    messages: &[Message],
    references: &[String],
    options: &GenerationOptions,
) -> MoaResult<Option<String>> {
    if references.is_empty() {
        return generator.generate(model, messages, options).await;
    }
    let injected = inject_references(messages, references);
    generator.generate(model, &injected, options).await
}

//! Mixture-of-Agents orchestration.
//!
//! - `references`: inject reference outputs into a synthesis system message
//! - `layered`: chain `layers x agents_per_layer` calls of one model
//! - `rounds`: reference rounds followed by one aggregate call
//! - `conversation`: single-turn vs multi-turn message history

pub mod conversation;
pub mod layered;
pub mod references;
pub mod rounds;

pub use conversation::Conversation;
pub use layered::{LayerShape, generate_layered};
pub use references::{SYNTHESIS_PREAMBLE, generate_with_references, inject_references};
pub use rounds::{MoaOutcome, MoaPlan, run_moa};

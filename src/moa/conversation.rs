use crate::message::{Message, Role};

/// Message history across CLI turns.
///
/// Single-turn mode starts every prompt from an empty history; multi-turn
/// mode keeps user and assistant messages between prompts.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    multi_turn: bool,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(multi_turn: bool) -> Self {
        Self {
            multi_turn,
            messages: Vec::new(),
        }
    }

    pub fn is_multi_turn(&self) -> bool {
        self.multi_turn
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == Role::User)
            .count()
    }

    /// Record the user's instruction and return the messages to send.
    pub fn begin_turn(&mut self, instruction: &str) -> Vec<Message> {
        if !self.multi_turn {
            self.messages.clear();
        }
        self.messages.push(Message::user(instruction));
        self.messages.clone()
    }

    pub fn record_answer(&mut self, answer: &str) {
        if self.multi_turn {
            self.messages.push(Message::assistant(answer));
        }
    }

    /// Drop the dangling user message of a turn that failed.
    pub fn abandon_turn(&mut self) {
        if self
            .messages
            .last()
            .is_some_and(|message| message.role == Role::User)
        {
            self.messages.pop();
        }
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }
}

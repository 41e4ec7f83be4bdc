use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde_json::json;

use crate::caller::Generate;
use crate::config::{RuntimeConfig, validate_temperature};
use crate::error::format_cli_error;
use crate::moa::{Conversation, MoaPlan, run_moa};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Status,
    Help,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let command = trimmed
        .trim_start_matches('/')
        .split_whitespace()
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();

    match command.as_str() {
        "exit" | "quit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "reset" => ParsedChatCommand::Command(ChatCommand::Reset),
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

pub fn print_chat_help<W: Write>(output: &mut W) -> Result<()> {
    writeln!(output, "Chat commands:")?;
    writeln!(output, "- /help: show command quick reference")?;
    writeln!(output, "- /status: show models, rounds and conversation state")?;
    writeln!(output, "- /reset: forget the multi-turn conversation so far")?;
    writeln!(output, "- exit | quit: end interactive chat")?;
    Ok(())
}

pub fn welcome_message(cfg: &RuntimeConfig) -> String {
    let mut lines = vec![
        "# MoA (Mixture-of-Agents)".to_string(),
        String::new(),
        "Reference models answer first; the aggregate model synthesizes their responses into the final answer.".to_string(),
        String::new(),
    ];
    lines.push(format!(
        "- {}   <--- Aggregate model",
        cfg.aggregate_model.as_deref().unwrap_or("<not configured>")
    ));
    for (index, model) in cfg.reference_models.iter().enumerate() {
        lines.push(format!("- {}   <--- Reference model {}", model, index + 1));
    }
    lines.join("\n")
}

/// Read one line. `None` on end of input.
fn read_input_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("failed to read input from stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Ask until the answer parses and passes `check`; an empty answer keeps the default.
fn prompt_with_default<R, W, T, E>(
    input: &mut R,
    output: &mut W,
    question: &str,
    default: Option<T>,
    check: impl Fn(T) -> std::result::Result<T, E>,
) -> Result<Option<T>>
where
    R: BufRead,
    W: Write,
    T: FromStr + Display + Clone,
    T::Err: Display,
    E: Display,
{
    loop {
        match default.as_ref() {
            Some(value) => write!(output, "{question} [{value}]: ")?,
            None => write!(output, "{question}: ")?,
        }
        output.flush().context("failed to flush stdout")?;

        let Some(answer) = read_input_line(input)? else {
            return Ok(None);
        };
        if answer.is_empty() {
            if let Some(value) = default.clone() {
                return Ok(Some(value));
            }
            writeln!(output, "A value is required.")?;
            continue;
        }
        match answer.parse::<T>() {
            Ok(value) => match check(value) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => writeln!(output, "Invalid value '{answer}': {err}")?,
            },
            Err(err) => writeln!(output, "Invalid value '{answer}': {err}")?,
        }
    }
}

fn accept_model(model: String) -> std::result::Result<String, &'static str> {
    Ok(model)
}

fn accept_max_tokens(max_tokens: u32) -> std::result::Result<u32, &'static str> {
    if max_tokens == 0 {
        return Err("max tokens must be at least 1");
    }
    Ok(max_tokens)
}

fn print_status<W: Write>(
    output: &mut W,
    cfg: &RuntimeConfig,
    plan: &MoaPlan,
    conversation: &Conversation,
) -> Result<()> {
    writeln!(output, "Profile: {}", cfg.profile)?;
    writeln!(output, "Aggregate model: {}", plan.aggregate_model)?;
    writeln!(
        output,
        "Reference models: {}",
        if plan.reference_models.is_empty() {
            "<none>".to_string()
        } else {
            plan.reference_models.join(", ")
        }
    )?;
    writeln!(
        output,
        "Temperature: {} | Max tokens: {}",
        plan.options.temperature, plan.options.max_tokens
    )?;
    writeln!(
        output,
        "Rounds: {} | Strategy: {} | Layers: {} x {} agents",
        plan.rounds,
        plan.strategy.label(),
        plan.shape.layers,
        plan.shape.agents_per_layer
    )?;
    writeln!(
        output,
        "Multi-turn: {} | Turns so far: {}",
        conversation.is_multi_turn(),
        conversation.turns()
    )?;
    Ok(())
}

pub async fn run_chat(
    cfg: &RuntimeConfig,
    generator: &dyn Generate,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    run_chat_session(cfg, generator, telemetry, &mut input, &mut output).await
}

pub async fn run_chat_session<R: BufRead, W: Write>(
    cfg: &RuntimeConfig,
    generator: &dyn Generate,
    telemetry: &TelemetrySink,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    writeln!(output, "{}\n", welcome_message(cfg))?;
    writeln!(
        output,
        "To get started, answer the questions below (press enter to use the defaults):"
    )?;

    let Some(aggregate_model) = prompt_with_default(
        input,
        output,
        "1. What main model do you want to use?",
        cfg.aggregate_model.clone(),
        accept_model,
    )?
    else {
        return Ok(());
    };
    writeln!(output, "Selected {aggregate_model}.")?;

    let Some(temperature) = prompt_with_default(
        input,
        output,
        "2. What temperature do you want to use?",
        Some(cfg.temperature),
        validate_temperature,
    )?
    else {
        return Ok(());
    };
    writeln!(output, "Selected {temperature}.")?;

    let Some(max_tokens) = prompt_with_default(
        input,
        output,
        "3. What max tokens do you want to use?",
        Some(cfg.max_tokens),
        accept_max_tokens,
    )?
    else {
        return Ok(());
    };
    writeln!(output, "Selected {max_tokens}.")?;

    let mut session_cfg = cfg.clone();
    session_cfg.aggregate_model = Some(aggregate_model);
    session_cfg.temperature = temperature;
    session_cfg.max_tokens = max_tokens;
    let plan = MoaPlan::from_config(&session_cfg)?;

    telemetry.emit(
        "chat.started",
        json!({
            "aggregate_model": plan.aggregate_model.clone(),
            "reference_models": plan.reference_models.clone(),
            "multi_turn": session_cfg.multi_turn,
        }),
    );
    tracing::info!(
        aggregate_model = %plan.aggregate_model,
        references = plan.reference_models.len(),
        rounds = plan.rounds,
        "chat session started"
    );

    let mut conversation = Conversation::new(session_cfg.multi_turn);
    writeln!(output, "\nType exit or quit to leave, /help for commands.")?;

    loop {
        write!(output, "\nPrompt >> ")?;
        output.flush().context("failed to flush stdout")?;
        let Some(line) = read_input_line(input)? else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        match parse_chat_command(&line) {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::UnknownCommand(command) => {
                writeln!(output, "Unknown command '{command}'. Use /help.")?;
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Exit) => {
                writeln!(output, "Goodbye!")?;
                break;
            }
            ParsedChatCommand::Command(ChatCommand::Help) => {
                print_chat_help(output)?;
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Status) => {
                print_status(output, &session_cfg, &plan, &conversation)?;
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Reset) => {
                conversation.reset();
                writeln!(output, "Conversation cleared.")?;
                continue;
            }
        }

        let messages = conversation.begin_turn(&line);
        writeln!(output, "Querying all the models...")?;
        output.flush().context("failed to flush stdout")?;

        match run_moa(generator, &plan, &messages).await {
            Ok(outcome) => {
                conversation.record_answer(&outcome.answer);
                telemetry.emit(
                    "chat.turn_completed",
                    json!({
                        "references": outcome.references.len(),
                        "answer_chars": outcome.answer.chars().count(),
                    }),
                );
                writeln!(output, "\n## Final answer from {}\n", plan.aggregate_model)?;
                writeln!(output, "{}", outcome.answer)?;
            }
            Err(err) => {
                conversation.abandon_turn();
                let err = anyhow::Error::new(err);
                telemetry.emit("chat.turn_failed", json!({"error": err.to_string()}));
                tracing::error!(error = %err, "chat turn failed");
                writeln!(
                    output,
                    "{}",
                    format_cli_error(&err, session_cfg.show_sensitive_config)
                )?;
            }
        }
    }

    Ok(())
}

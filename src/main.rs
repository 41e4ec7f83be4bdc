use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use moa_cli::caller::build_model_caller;
use moa_cli::chat::run_chat;
use moa_cli::cli::{Cli, Commands, ModelCommands, ProfileCommands, TelemetryCommands, command_label};
use moa_cli::config::{ConfigFile, RuntimeConfig, load_config_file, resolve_runtime_config};
use moa_cli::doctor::run_doctor;
use moa_cli::error::{categorize_error, format_cli_error};
use moa_cli::profiles::{run_models_list, run_profiles_list, run_profiles_show};
use moa_cli::runner::{run_ask, run_layered_prompt};
use moa_cli::telemetry::{TelemetrySink, run_telemetry_report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_sensitive = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let file = load_config_file(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &file)?;
    let command = cli.command.unwrap_or(Commands::Chat);
    let telemetry = TelemetrySink::new(&cfg, command_label(&command));
    tracing::debug!(
        command = %command_label(&command),
        profile = %cfg.profile,
        telemetry = telemetry.is_enabled(),
        "dispatching command"
    );

    let started = Instant::now();
    telemetry.emit("command.started", json!({}));
    let result = dispatch(command, &file, &cfg, &telemetry).await;
    let duration_ms = started.elapsed().as_millis();
    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({ "duration_ms": duration_ms })),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "duration_ms": duration_ms,
                "category": categorize_error(err).code(),
                "error": err.to_string(),
            }),
        ),
    }
    result
}

async fn dispatch(
    command: Commands,
    file: &ConfigFile,
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
) -> Result<()> {
    match command {
        Commands::Ask { prompt } => {
            let caller = build_model_caller(cfg, telemetry)?;
            let outcome = run_ask(cfg, &caller, &prompt.join(" ")).await?;
            tracing::info!(references = outcome.references.len(), "Aggregate answer ready");
            println!("{}", outcome.answer);
        }
        Commands::Chat => {
            let caller = build_model_caller(cfg, telemetry)?;
            run_chat(cfg, &caller, telemetry).await?;
        }
        Commands::Layered { prompt } => {
            let caller = build_model_caller(cfg, telemetry)?;
            let answer = run_layered_prompt(cfg, &caller, &prompt.join(" ")).await?;
            println!("{answer}");
        }
        Commands::Doctor => run_doctor(cfg)?,
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(file, cfg)?,
            ProfileCommands::Show => run_profiles_show(cfg)?,
        },
        Commands::Models { command } => match command {
            ModelCommands::List => run_models_list(cfg)?,
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(cfg, path, limit)?,
        },
    }

    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

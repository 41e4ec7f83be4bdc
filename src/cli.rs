use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

/// How each reference model produces its reference for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStrategy {
    /// One call per reference model, with the previous round's references injected.
    Direct,
    /// Each reference model runs the layered aggregator.
    Layered,
}

impl ReferenceStrategy {
    pub fn label(self) -> &'static str {
        match self {
            ReferenceStrategy::Direct => "direct",
            ReferenceStrategy::Layered => "layered",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum ModelCommands {
    #[command(about = "List models with a configured endpoint")]
    List,
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  moa-cli ask \"Top things to do in NYC\"\n\
  moa-cli --aggregate-model llama3-70b-8192 --reference-model gemma-7b-it --reference-model mixtral-8x7b-32768 chat\n\
  moa-cli --rounds 2 --strategy layered --layers 2 --agents-per-layer 3 ask \"Explain MoA\"\n\
  moa-cli layered \"Summarize the tradeoffs of rate limiting\"\n\
  moa-cli --profile groq doctor\n\
  moa-cli profiles list\n\
  moa-cli models list\n\
  moa-cli telemetry report --limit 2000\n\
\n\
Configuration:\n\
  - Models are declared in .moa/config.toml under [models.\"<id>\"] with api_base and api_key_env.\n\
  - Profiles under [profiles.<name>] pick the aggregate model, reference models and MoA shape.\n\
  - Flags override the profile; the profile overrides built-in defaults.";

#[derive(Debug, Parser)]
#[command(name = "moa-cli")]
#[command(about = "Mixture-of-Agents prompting: reference models, layered aggregation, and a synthesis model")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "MOA_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "MOA_CONFIG", default_value = ".moa/config.toml")]
    pub config_path: String,

    #[arg(long, env = "MOA_AGGREGATE_MODEL")]
    pub aggregate_model: Option<String>,

    #[arg(long = "reference-model", env = "MOA_REFERENCE_MODELS", value_delimiter = ',')]
    pub reference_models: Vec<String>,

    #[arg(long, env = "MOA_TEMPERATURE")]
    pub temperature: Option<f64>,

    #[arg(long, env = "MOA_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    #[arg(long, env = "MOA_ROUNDS")]
    pub rounds: Option<u32>,

    #[arg(long, env = "MOA_LAYERS")]
    pub layers: Option<u32>,

    #[arg(long, env = "MOA_AGENTS_PER_LAYER")]
    pub agents_per_layer: Option<u32>,

    #[arg(long, env = "MOA_MULTI_TURN", action = clap::ArgAction::Set)]
    pub multi_turn: Option<bool>,

    #[arg(long, env = "MOA_STRATEGY", value_enum)]
    pub strategy: Option<ReferenceStrategy>,

    #[arg(long, env = "MOA_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "MOA_API_KEY_ENV")]
    pub api_key_env: Option<String>,

    #[arg(long, env = "MOA_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    #[arg(long, env = "MOA_MAX_BACKOFF_SECS")]
    pub max_backoff_secs: Option<u64>,

    #[arg(long, env = "MOA_DEFAULT_RETRY_AFTER_SECS")]
    pub default_retry_after_secs: Option<u64>,

    #[arg(long, env = "MOA_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "MOA_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "MOA_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "MOA_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run one Mixture-of-Agents turn and print the aggregate answer")]
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    #[command(about = "Run interactive chat mode (exit or quit to leave)")]
    Chat,
    #[command(about = "Run the layered aggregator alone on the aggregate model")]
    Layered {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    #[command(about = "Validate model endpoints and API key availability")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Inspect the configured model registry")]
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Layered { .. } => "layered".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Models { command } => match command {
            ModelCommands::List => "models.list".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}

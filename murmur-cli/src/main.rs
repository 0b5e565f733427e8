//! Main entry point for the Murmur CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use shared::config::{ClientConfig, ConfigOverrides};
use std::{io, path::PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use uuid::Uuid;

mod commands;

use commands::config::ConfigFormat;

/// Murmur CLI
#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Command-line client for Murmur conversations", long_about = None)]
struct Cli {
    /// Path to the configuration file (optional)
    #[arg(
        long,
        short,
        global = true,
        help = "Path to the configuration file (e.g., config.yaml or config.json). If not provided, defaults and MURMUR_* variables are used."
    )]
    config: Option<PathBuf>,

    /// Base URL of the Murmur API
    #[arg(
        long,
        global = true,
        help = "Base URL of the Murmur API (e.g., https://chat.example.com/api/). Overrides the configuration file."
    )]
    api_base_url: Option<Url>,

    /// Bearer token for the Murmur API
    #[arg(
        long,
        global = true,
        help = "Bearer token sent with every request. Overrides MURMUR_AUTH_TOKEN."
    )]
    auth_token: Option<String>,

    /// Logging level
    #[arg(
        long,
        global = true,
        help = "Logging level or filter directive (e.g., debug, client=trace). RUST_LOG takes precedence."
    )]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the Murmur CLI
#[derive(Subcommand)]
enum Commands {
    /// Follow a conversation's realtime changes until Ctrl+C
    Follow {
        /// Conversation to follow
        #[arg(long, help = "ID of the conversation to follow")]
        conversation: Uuid,

        /// Participant the subscription belongs to
        #[arg(long, help = "ID of the participant following the conversation")]
        participant: Uuid,
    },

    /// Send a message and stream the AI reply
    Send {
        /// Conversation to post into
        #[arg(long, help = "ID of the conversation to post into")]
        conversation: Uuid,

        /// Participant sending the message
        #[arg(long, help = "ID of the participant sending the message")]
        participant: Uuid,

        /// Message text
        #[arg(help = "Text of the message to send")]
        text: String,

        /// Image to attach
        #[arg(long, help = "URL of an image to attach to the message")]
        image_url: Option<String>,

        /// Persona that should answer
        #[arg(long, help = "ID of the AI persona that should answer")]
        persona: Option<Uuid>,

        /// Read the reply in one piece
        #[arg(
            long,
            help = "Buffer the whole reply before processing it instead of reading it incrementally"
        )]
        buffered: bool,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate
        #[arg(
            long,
            short,
            value_enum,
            default_value_t = ConfigFormat::Yaml,
            help = "Format of the configuration file to generate (yaml or json)"
        )]
        format: ConfigFormat,

        /// Where to write the file
        #[arg(
            long,
            short,
            help = "Path of the generated file. Defaults to config.yaml or config.json in the current directory."
        )]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script
        #[arg(
            long,
            short,
            value_enum,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Follow {
            conversation,
            participant,
        } => {
            let config = load_config(cli.config, cli.api_base_url, cli.auth_token, cli.log_level)?;
            init_tracing(&config.log_level);
            commands::follow::follow(&config, conversation, participant).await?;
        }
        Commands::Send {
            conversation,
            participant,
            text,
            image_url,
            persona,
            buffered,
        } => {
            let mut config =
                load_config(cli.config, cli.api_base_url, cli.auth_token, cli.log_level)?;
            if buffered {
                config.streaming.incremental = false;
            }
            init_tracing(&config.log_level);
            let message = commands::send::Outgoing {
                conversation_id: conversation,
                participant_id: participant,
                text,
                image_url,
                persona_id: persona,
            };
            commands::send::send(&config, message).await?;
        }
        Commands::Config { format, output } => {
            commands::config::generate_config(format, output)?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell, &mut io::stdout());
        }
    }

    Ok(())
}

fn load_config(
    path: Option<PathBuf>,
    api_base_url: Option<Url>,
    auth_token: Option<String>,
    log_level: Option<String>,
) -> Result<ClientConfig> {
    let overrides = ConfigOverrides {
        api_base_url,
        auth_token,
        log_level,
    };
    ClientConfig::load_config(path, overrides).context("failed to load configuration")
}

/// Logs go to stderr so stdout carries only conversation output.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

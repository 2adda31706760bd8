//! RagDesk CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Start the HTTP chat gateway
//! - `ask`      — Send one question through the orchestrator
//! - `classify` — Show which specialists would answer a query
//! - `config`   — Inspect or initialize configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ragdesk",
    about = "RagDesk — multi-specialist RAG chat orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (defaults to ~/.ragdesk/config.toml)
    #[arg(short, long, global = true, env = "RAGDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question
    Ask {
        /// The question to send
        #[arg(short, long)]
        message: String,

        /// Caller identity used to scope the session
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,

        /// Image description to attach to the session before asking
        #[arg(long)]
        image: Option<String>,
    },

    /// Classify a query without calling any model
    Classify {
        /// The query to classify
        query: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Validate the configuration
    Validate,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ask {
            message,
            user,
            session,
            stream,
            image,
        } => {
            let args = commands::ask::AskArgs {
                message,
                user,
                session,
                stream,
                image,
            };
            commands::ask::run(config_path, args).await?
        }
        Commands::Classify { query } => commands::classify::run(config_path, &query)?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Init => commands::config_cmd::init(config_path)?,
        },
    }

    Ok(())
}

//! Concierge CLI — the main entry point.
//!
//! Commands:
//! - `replay`   — Run a session over a JSON-lines event script
//! - `graph`    — Print the behavioral transition graph
//! - `config`   — Show, validate or locate the configuration
//! - `profile`  — Show a stored visitor profile

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "concierge",
    about = "Concierge — behavioral runtime for embedded conversational agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Use this config file instead of ~/.concierge/config.toml
    #[arg(long, global = true, env = "CONCIERGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a session from a JSON-lines event script
    Replay {
        /// Events, one JSON object per line
        events: PathBuf,

        /// Hydrated signals, one JSON object per line (last line repeats)
        #[arg(long)]
        signals_file: Option<PathBuf>,

        /// Scripted generator replies, one per line (none = fallback only)
        #[arg(long)]
        replies: Option<PathBuf>,

        /// Visitor id for the session
        #[arg(long, default_value = "replay")]
        visitor: String,

        /// Persist profiles in this directory instead of in memory
        #[arg(long)]
        profile_dir: Option<PathBuf>,
    },

    /// Print the transition graph
    Graph {
        /// Graphviz output
        #[arg(long)]
        dot: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show a stored visitor profile
    Profile {
        visitor: String,

        /// Profile directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Replay {
            events,
            signals_file,
            replies,
            visitor,
            profile_dir,
        } => {
            let options = commands::replay::ReplayOptions {
                events,
                signals_file,
                replies,
                visitor,
                profile_dir,
            };
            commands::replay::run(config_path, options).await?
        }
        Commands::Graph { dot } => commands::graph::run(dot)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
        Commands::Profile { visitor, dir } => {
            commands::profile::run(config_path, &visitor, dir).await?
        }
    }

    Ok(())
}

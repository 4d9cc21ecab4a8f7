mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "isobox")]
#[command(about = "Run untrusted JavaScript on single-use execution hosts")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script once and print the result as JSON
    Run {
        /// Script file, or `-` for stdin
        script: PathBuf,

        /// Module file whose `module.exports` are returned
        #[arg(short, long)]
        module: Option<PathBuf>,

        /// Environment value passed to the host (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Do not capture console output
        #[arg(long)]
        no_console: bool,

        /// Use the simple wrapper (no module, no capabilities)
        #[arg(long)]
        legacy: bool,

        /// Run in an in-process V8 host instead of the remote loader
        #[arg(long)]
        local: bool,

        /// Remote loader base URL (overrides `loader_url` from the config)
        #[arg(long)]
        loader_url: Option<String>,
    },
    /// Manage long-lived named workers
    Workers {
        #[command(subcommand)]
        command: WorkersCommand,
    },
}

#[derive(Subcommand)]
pub enum WorkersCommand {
    /// Create a named worker from a script
    Create {
        /// Worker id
        id: String,

        /// Script file, or `-` for stdin
        script: PathBuf,

        /// Module file
        #[arg(short, long)]
        module: Option<PathBuf>,

        /// Environment value (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Do not capture console output
        #[arg(long)]
        no_console: bool,
    },
    /// Show a named worker
    Get {
        /// Worker id
        id: String,
    },
    /// Delete a named worker
    Delete {
        /// Worker id
        id: String,
    },
    /// List named workers
    List,
    /// Send a request to a named worker
    Execute {
        /// Worker id
        id: String,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,

        /// Request header (NAME=VALUE, repeatable)
        #[arg(short = 'H', long = "header", value_name = "NAME=VALUE")]
        headers: Vec<String>,
    },
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    // stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "isobox={},isobox_sandbox={}",
                    log_level, log_level
                ))
            }),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            script,
            module,
            env,
            no_console,
            legacy,
            local,
            loader_url,
        } => {
            let args = commands::RunArgs {
                script,
                module,
                env,
                capture_console: !no_console,
                legacy,
                local,
                loader_url,
            };
            let result = commands::execute_run(&config, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Workers { command } => {
            let output = commands::execute_workers(&config, command).await?;
            println!("{}", output);
            Ok(())
        }
    }
}

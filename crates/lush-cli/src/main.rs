//! lush: run observable command pipelines from the terminal.
//!
//! Drives the lush-core library: chains commands stdout → stdin, streams the
//! final output, and can dump per-command metadata (status, scrollback,
//! pipe targets) as JSON once everything has finished.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lush_core::SessionConfig;
use tracing::{error, info};

/// Observable command pipelines
#[derive(Parser, Debug)]
#[command(name = "lush", version, about = "Run and inspect observable command pipelines")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "~/.lush/config.toml")]
    config: String,

    /// Scrollback size per output stream, in bytes
    #[arg(long, global = true)]
    scrollback: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a pipeline; separate stages with a quoted '|'
    Run {
        /// Print command metadata as JSON to stderr when done
        #[arg(long)]
        metadata: bool,

        /// Stages, e.g. `echo hi '|' tr a-z A-Z`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },

    /// Run a command unobserved and print only the tail of its output
    Tail {
        /// Number of trailing bytes to print
        #[arg(short = 'c', long, default_value_t = 256)]
        bytes: usize,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting lush");

    let config_path = PathBuf::from(&cli.config);
    let config = match SessionConfig::load(Some(&config_path), cli.scrollback) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Command::Run { metadata, argv } => commands::run::run(config, &argv, metadata).await,
        Command::Tail { bytes, argv } => commands::tail::run(config, &argv, bytes).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("lush: {e:#}");
            std::process::exit(1);
        }
    }
}

//! Ember diagnostic CLI
//!
//! Drives an in-process engine through a bundle lifecycle and prints what
//! an uninstall leaves behind.

mod commands;
mod output;
mod scenario;

use clap::{Parser, Subcommand};
use ember_engine::defaults::DEFAULT_CONFIG_FILE;
use ember_engine::EngineConfig;
use output::StyledOutput;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Stale reference diagnostics for bundle-based runtimes", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Colorize output: auto, always or never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Uninstall a service provider whose service is still tracked
    Scenario {
        /// Mark the provider corrected and force a stale-reference scan
        #[arg(long)]
        correct: bool,
        /// Collect as part of the uninstall
        #[arg(long)]
        collect: bool,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("EMBER_LOG").unwrap_or_else(|_| level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = EngineConfig::from_file_or_default(&cli.config)?;

    match cli.command {
        Commands::Scenario {
            correct,
            collect,
            json,
        } => {
            if collect {
                config.uninstall.collect = true;
            }
            commands::scenario::execute(commands::scenario::ScenarioArgs {
                config,
                correct,
                json,
                color: cli.color,
            })
        }
        Commands::Config => commands::config::execute(&config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = output::resolve_color_choice(Some(&cli.color));
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            StyledOutput::new(color).stderr_error(&format!("error: {:#}", e));
            ExitCode::FAILURE
        }
    }
}

//! Kiln CLI: a command-line driver for the incremental build ledger.
//!
//! Provides `kiln status` to check build outputs described by compiler
//! dependency files, `kiln update` to record them after a build, and
//! `kiln stats` to inspect the stored ledger.

#![warn(missing_docs)]

mod session;
mod stats;
mod status;
mod update;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "KILN_LOG";

/// Kiln: incremental build bookkeeping.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln build ledger")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report which outputs need rebuilding.
    Status(StatusArgs),
    /// Record outputs after a build and save the ledger.
    Update(UpdateArgs),
    /// Print ledger statistics.
    Stats,
}

/// Arguments for the `kiln status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Dependency files (`.d`) naming each output and its inputs.
    #[arg(required = true)]
    pub depfiles: Vec<PathBuf>,

    /// Command line the outputs are built with; a change makes them stale.
    #[arg(long)]
    pub extra: Option<String>,

    /// List every stale input instead of stopping at the first.
    #[arg(long)]
    pub all: bool,
}

/// Arguments for the `kiln update` subcommand.
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Dependency files (`.d`) naming each output and its inputs.
    #[arg(required = true)]
    pub depfiles: Vec<PathBuf>,

    /// Command line the outputs were built with.
    #[arg(long)]
    pub extra: Option<String>,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Report format.
    pub format: OutputFormat,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        format: cli.format,
        config: cli.config,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Status(ref args) => status::run(args, &global),
        Command::Update(ref args) => update::run(args, &global),
        Command::Stats => stats::run(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `KILN_LOG` wins over the verbosity flags.
fn init_logging(global: &GlobalArgs) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(global)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_log_level(global: &GlobalArgs) -> &'static str {
    if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    }
}

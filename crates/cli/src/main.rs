//! stow - one command line over S3, SFTP and local storage

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

mod backend;
mod commands;
mod exit_code;
mod output;

use backend::Context;
use commands::Commands;
use exit_code::ExitCode;
use output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "stow", version, about = "Move files between S3, SFTP and local storage")]
pub struct Cli {
    /// Profile to operate on (default: the profile marked as default)
    #[arg(short, long, global = true, env = "STOW_PROFILE")]
    pub profile: Option<String>,

    /// Profiles file [default: $STOW_CONFIG_DIR/profiles.toml]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output strict JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };
    let ctx = Context {
        profile: cli.profile,
        config: cli.config,
    };

    let code: ExitCode = commands::execute(cli.command, &ctx, output_config).await;
    std::process::exit(code.as_i32());
}

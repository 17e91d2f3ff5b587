//! Subcommands
//!
//! Every command returns an [`ExitCode`]; failures are reported through the
//! formatter before returning.

use clap::Subcommand;
use stow_core::Error;

use crate::backend::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

pub mod completions;
pub mod copy;
pub mod delete;
pub mod exists;
pub mod get;
pub mod link;
pub mod list;
pub mod profiles;
pub mod put;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List files and directories
    #[command(visible_alias = "ls")]
    List(list::ListArgs),

    /// Download a file
    Get(get::GetArgs),

    /// Upload a file
    Put(put::PutArgs),

    /// Delete files
    #[command(visible_alias = "rm")]
    Delete(delete::DeleteArgs),

    /// Check whether a path exists
    Exists(exists::ExistsArgs),

    /// Copy a file within a profile or to another profile
    #[command(visible_alias = "cp")]
    Copy(copy::CopyArgs),

    /// Generate a time-limited URL for direct access
    Link(link::LinkArgs),

    /// Show configured profiles
    Profiles(profiles::ProfilesArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

pub async fn execute(command: Commands, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    match command {
        Commands::List(args) => list::execute(args, ctx, output_config).await,
        Commands::Get(args) => get::execute(args, ctx, output_config).await,
        Commands::Put(args) => put::execute(args, ctx, output_config).await,
        Commands::Delete(args) => delete::execute(args, ctx, output_config).await,
        Commands::Exists(args) => exists::execute(args, ctx, output_config).await,
        Commands::Copy(args) => copy::execute(args, ctx, output_config).await,
        Commands::Link(args) => link::execute(args, ctx, output_config).await,
        Commands::Profiles(args) => profiles::execute(args, ctx, output_config),
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Print `error` with its storage classification and map it to an exit code
pub(crate) fn fail(formatter: &Formatter, error: &anyhow::Error) -> ExitCode {
    let kind = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(Error::kind_name);
    formatter.error_with_kind(&format!("{error:#}"), kind);
    ExitCode::from_anyhow(error)
}

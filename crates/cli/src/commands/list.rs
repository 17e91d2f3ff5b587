//! list command - List files and directories
//!
//! Human output is printed as entries arrive, so huge listings start
//! immediately. JSON output collects the full listing into one document.

use anyhow::Result;
use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;
use stow_core::{ListEntry, ListOptions};

use crate::backend::{Backend, Context};
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List files and directories
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory to list, relative to the profile root
    #[arg(default_value = "")]
    pub path: String,

    /// List every file below the path instead of direct children
    #[arg(short, long)]
    pub recursive: bool,

    /// Show sizes and modification times
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Debug, Serialize)]
struct ListOutput {
    profile: String,
    path: String,
    recursive: bool,
    entries: Vec<ListEntry>,
    count: usize,
}

/// Execute the list command
pub async fn execute(args: ListArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter).await {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

async fn run(args: &ListArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let backend = ctx.open().await?;
    backend
        .run(async |backend| print_listing(args, backend, formatter).await)
        .await
}

async fn print_listing(args: &ListArgs, backend: &Backend, formatter: &Formatter) -> Result<()> {
    let options = ListOptions {
        recursive: args.recursive,
    };
    let mut entries = backend.storage.list(&args.path, options).await?;

    if formatter.is_json() {
        let collected: Vec<ListEntry> = entries.try_collect().await?;
        formatter.json(&ListOutput {
            profile: backend.profile.clone(),
            path: args.path.clone(),
            recursive: args.recursive,
            count: collected.len(),
            entries: collected,
        });
    } else {
        while let Some(entry) = entries.try_next().await? {
            formatter.println(&format_entry(&entry, args.long, formatter));
        }
    }
    Ok(())
}

fn format_entry(entry: &ListEntry, long: bool, formatter: &Formatter) -> String {
    let name = if entry.is_dir {
        formatter.style_dir(&entry.path)
    } else {
        formatter.style_file(&entry.path)
    };
    if !long {
        return name;
    }

    let date = entry
        .last_modified
        .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19));
    let size = if entry.is_dir {
        "DIR".to_string()
    } else {
        humansize::format_size(entry.size, humansize::BINARY)
    };
    format!(
        "[{}] {:>10} {}",
        formatter.style_date(&date),
        formatter.style_size(&size),
        name
    )
}

//! copy command - Copy a file within a profile or across profiles
//!
//! Same-profile copies and copies between two S3 or two local profiles use
//! the backend's native copy when it has one; everything else is streamed.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use stow_core::Progress;

use crate::backend::{Backend, Context};
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{BarReporter, Formatter, OutputConfig};

/// Copy a file within a profile or to another profile
#[derive(Args, Debug)]
pub struct CopyArgs {
    /// Source file in the selected profile
    pub source: String,

    /// Destination path
    pub dest: String,

    /// Profile to copy into [default: the source profile]
    #[arg(long, value_name = "PROFILE")]
    pub to_profile: Option<String>,
}

#[derive(Debug, Serialize)]
struct CopyOutput {
    from_profile: String,
    source: String,
    to_profile: String,
    dest: String,
}

/// Execute the copy command
pub async fn execute(args: CopyArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter).await {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

async fn run(args: &CopyArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let source = ctx.open().await?;
    source
        .run(async |source| {
            match &args.to_profile {
                Some(name) if *name != source.profile => {
                    let target = ctx.open_named(Some(name)).await?;
                    target
                        .run(async |target| transfer(args, source, Some(target), formatter).await)
                        .await
                }
                _ => transfer(args, source, None, formatter).await,
            }
        })
        .await
}

async fn transfer(
    args: &CopyArgs,
    source: &Backend,
    target: Option<&Backend>,
    formatter: &Formatter,
) -> Result<()> {
    let bar = formatter
        .progress_enabled()
        .then(|| Arc::new(BarReporter::new(args.source.clone(), None)));
    let progress: Option<Progress> = bar.clone().map(|b| b as Progress);

    let copied = source
        .storage
        .copy(
            &args.source,
            &args.dest,
            target.map(|t| t.storage.as_ref()),
            progress,
        )
        .await;
    if let Some(bar) = bar {
        bar.finish();
    }
    copied?;

    let from_profile = &source.profile;
    let to_profile = target.map_or(from_profile, |t| &t.profile);
    if formatter.is_json() {
        formatter.json(&CopyOutput {
            from_profile: from_profile.clone(),
            source: args.source.clone(),
            to_profile: to_profile.clone(),
            dest: args.dest.clone(),
        });
    } else {
        formatter.success(&format!(
            "{from_profile}:{} -> {to_profile}:{}",
            args.source, args.dest
        ));
    }
    Ok(())
}

//! put command - Upload a file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use clap::Args;
use serde::Serialize;
use stow_core::Progress;
use stow_core::stream::from_async_read;

use crate::backend::{Backend, Context};
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{BarReporter, Formatter, OutputConfig};

/// Upload a file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file; `-` reads from stdin
    pub source: PathBuf,

    /// Remote destination [default: the local file name at the profile root]
    pub dest: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    profile: String,
    source: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

/// Execute the put command
pub async fn execute(args: PutArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter).await {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

fn remote_target(source: &Path, dest: Option<&str>) -> Result<String> {
    if let Some(dest) = dest {
        if dest.ends_with('/') {
            let name = file_name(source)?;
            return Ok(format!("{dest}{name}"));
        }
        return Ok(dest.to_string());
    }
    file_name(source).map(str::to_string)
}

fn file_name(source: &Path) -> Result<&str> {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n != "-")
        .ok_or_else(|| anyhow!("a destination is required for {}", source.display()))
}

async fn run(args: &PutArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let dest = remote_target(&args.source, args.dest.as_deref())?;
    let backend = ctx.open().await?;
    backend
        .run(async |backend| upload(args, &dest, backend, formatter).await)
        .await
}

async fn upload(args: &PutArgs, dest: &str, backend: &Backend, formatter: &Formatter) -> Result<()> {
    let chunk_size = backend.storage.chunk_size();

    let (source, size_hint) = if args.source == Path::new("-") {
        (from_async_read(tokio::io::stdin(), chunk_size), None)
    } else {
        let file = tokio::fs::File::open(&args.source)
            .await
            .map_err(|e| stow_core::Error::io_at(args.source.display(), e))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("reading {}", args.source.display()))?
            .len();
        (from_async_read(file, chunk_size), Some(size))
    };

    let bar = formatter
        .progress_enabled()
        .then(|| Arc::new(BarReporter::new(dest, size_hint)));
    let progress: Option<Progress> = bar.clone().map(|b| b as Progress);

    backend
        .storage
        .write(dest, source, size_hint, progress)
        .await?;
    if let Some(bar) = bar {
        bar.finish();
    }

    if formatter.is_json() {
        formatter.json(&PutOutput {
            profile: backend.profile.clone(),
            source: args.source.display().to_string(),
            path: dest.to_string(),
            size_bytes: size_hint,
        });
    } else {
        formatter.success(&format!("{} -> {}:{dest}", args.source.display(), backend.profile));
    }
    Ok(())
}

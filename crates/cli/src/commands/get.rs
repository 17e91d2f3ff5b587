//! get command - Download a file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;
use stow_core::{ByteStream, Progress};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::backend::{Backend, Context};
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{BarReporter, Formatter, OutputConfig};

/// Download a file
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Remote file, relative to the profile root
    pub path: String,

    /// Local destination; `-` writes to stdout [default: the remote file name]
    pub dest: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    profile: String,
    path: String,
    dest: String,
    bytes: u64,
}

/// Execute the get command
pub async fn execute(args: GetArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter).await {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

fn to_stdout(dest: Option<&Path>) -> bool {
    dest.is_some_and(|d| d == Path::new("-"))
}

/// Where a download lands: `dest` itself, or the remote name inside `dest`
fn local_target(remote: &str, dest: Option<&Path>) -> Result<PathBuf> {
    let name = remote
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .ok_or_else(|| anyhow!("'{remote}' does not name a file"))?;
    Ok(match dest {
        None => PathBuf::from(name),
        Some(dir) if dir.is_dir() => dir.join(name),
        Some(path) => path.to_path_buf(),
    })
}

async fn pump<W: AsyncWrite + Unpin>(mut source: ByteStream, out: &mut W) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = source.try_next().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

async fn run(args: &GetArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let backend = ctx.open().await?;
    backend
        .run(async |backend| download(args, backend, formatter).await)
        .await
}

async fn download(args: &GetArgs, backend: &Backend, formatter: &Formatter) -> Result<()> {
    let stdout = to_stdout(args.dest.as_deref());

    let bar = (!stdout && formatter.progress_enabled())
        .then(|| Arc::new(BarReporter::new(args.path.clone(), None)));
    let progress: Option<Progress> = bar.clone().map(|b| b as Progress);
    let source = backend.storage.read(&args.path, progress).await?;

    let (dest, bytes) = if stdout {
        let bytes = pump(source, &mut tokio::io::stdout()).await?;
        ("-".to_string(), bytes)
    } else {
        let target = local_target(&args.path, args.dest.as_deref())?;
        let mut file = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("creating {}", target.display()))?;
        let pumped = pump(source, &mut file).await;
        drop(file);
        match pumped {
            Ok(bytes) => (target.display().to_string(), bytes),
            Err(e) => {
                // never leave a truncated download behind
                let _ = tokio::fs::remove_file(&target).await;
                return Err(e);
            }
        }
    };
    if let Some(bar) = bar {
        bar.finish();
    }

    if formatter.is_json() {
        formatter.json(&GetOutput {
            profile: backend.profile.clone(),
            path: args.path.clone(),
            dest,
            bytes,
        });
    } else if !stdout {
        formatter.success(&format!(
            "{} -> {} ({})",
            args.path,
            dest,
            humansize::format_size(bytes, humansize::BINARY)
        ));
    }
    Ok(())
}

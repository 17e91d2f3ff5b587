//! delete command - Delete files
//!
//! Deleting a path that does not exist succeeds, so the command is safe to
//! repeat. Every path is attempted even after a failure.

use clap::Args;
use serde::Serialize;

use crate::backend::Context;
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Delete files
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Files to delete, relative to the profile root
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DeleteOutput {
    profile: String,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<DeleteFailure>,
}

#[derive(Debug, Serialize)]
struct DeleteFailure {
    path: String,
    error: String,
    kind: &'static str,
}

/// Execute the delete command
pub async fn execute(args: DeleteArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let backend = match ctx.open().await {
        Ok(b) => b,
        Err(e) => return fail(&formatter, &e),
    };

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut code = ExitCode::Success;

    for path in args.paths {
        match backend.storage.delete(&path).await {
            Ok(()) => {
                formatter.success(&format!("Removed {path}"));
                deleted.push(path);
            }
            Err(e) => {
                code = ExitCode::from_error(&e);
                if !formatter.is_json() {
                    formatter.error_with_kind(&format!("{path}: {e}"), Some(e.kind_name()));
                }
                failed.push(DeleteFailure {
                    path,
                    error: e.to_string(),
                    kind: e.kind_name(),
                });
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&DeleteOutput {
            profile: backend.profile.clone(),
            deleted,
            failed,
        });
    }

    backend.close().await;
    code
}

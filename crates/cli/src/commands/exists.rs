//! exists command - Check whether a path exists
//!
//! Exits with 0 when the path exists and with the not-found code otherwise,
//! so it can be used directly in shell conditionals.

use clap::Args;
use serde::Serialize;

use crate::backend::Context;
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Check whether a path exists
#[derive(Args, Debug)]
pub struct ExistsArgs {
    /// Path relative to the profile root
    pub path: String,
}

#[derive(Debug, Serialize)]
struct ExistsOutput {
    profile: String,
    path: String,
    exists: bool,
}

/// Execute the exists command
pub async fn execute(args: ExistsArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let backend = match ctx.open().await {
        Ok(b) => b,
        Err(e) => return fail(&formatter, &e),
    };

    let exists = match backend.storage.exists(&args.path).await {
        Ok(exists) => exists,
        Err(e) => {
            let code = fail(&formatter, &anyhow::Error::from(e));
            backend.close().await;
            return code;
        }
    };

    if formatter.is_json() {
        formatter.json(&ExistsOutput {
            profile: backend.profile.clone(),
            path: args.path,
            exists,
        });
    } else if exists {
        formatter.println(&format!("{} exists", args.path));
    } else {
        formatter.println(&format!("{} does not exist", args.path));
    }

    backend.close().await;
    if exists {
        ExitCode::Success
    } else {
        ExitCode::NotFound
    }
}

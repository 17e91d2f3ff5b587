//! link command - Generate time-limited access URLs
//!
//! Only backends that can sign URLs (S3) support this; others exit with the
//! unsupported-feature code. Signing never contacts the store, so a URL for a
//! missing object is still issued and fails when used.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use jiff::Timestamp;
use serde::Serialize;
use stow_core::{AccessMethod, Error};

use crate::backend::Context;
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Generate a time-limited URL for direct access
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// File relative to the profile root
    pub path: String,

    /// Expiration time (e.g., 30m, 1h, 7d)
    #[arg(short, long, default_value = "7d")]
    pub expire: String,

    /// Generate an upload URL instead of a download URL
    #[arg(long)]
    pub upload: bool,
}

#[derive(Debug, Serialize)]
struct LinkOutput {
    url: String,
    path: String,
    method: AccessMethod,
    expires_at: Timestamp,
    expires_secs: u64,
    expires_in: String,
}

/// Execute the link command
pub async fn execute(args: LinkArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter).await {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

async fn run(args: &LinkArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let expires_secs = parse_expiration(&args.expire).map_err(Error::Config)?;
    let method = if args.upload {
        AccessMethod::Put
    } else {
        AccessMethod::Get
    };

    let backend = ctx.open().await?;
    let signed = backend
        .storage
        .generate_access_url(&args.path, method, Duration::from_secs(expires_secs))
        .await;
    backend.close().await;
    let access = signed?;

    let expires_in = format_duration(expires_secs);
    if formatter.is_json() {
        formatter.json(&LinkOutput {
            url: access.url,
            path: args.path.clone(),
            method: access.method,
            expires_at: access.expires_at,
            expires_secs,
            expires_in,
        });
    } else {
        let url_type = if args.upload { "upload" } else { "download" };
        formatter.println(&format!("Access URL ({url_type}):"));
        formatter.println(&formatter.style_url(&access.url));
        formatter.println("");
        formatter.println(&format!("Expires in: {expires_in}"));
        if args.upload {
            formatter.println("");
            formatter.println("Upload with: curl -X PUT -T <file> \"<url>\"");
        }
    }
    Ok(())
}

/// Parse expiration string (e.g., "90", "1h", "7d")
fn parse_expiration(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Expiration cannot be empty".to_string());
    }

    let (num_str, suffix) = if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        let idx = s.len() - 1;
        (&s[..idx], &s[idx..])
    } else {
        (s, "s")
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid expiration number: {num_str}"))?;

    let unit = match suffix.to_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return Err(format!("Unknown expiration suffix: {suffix}")),
    };

    match num.checked_mul(unit) {
        Some(0) => Err("Expiration must be greater than zero".to_string()),
        Some(seconds) => Ok(seconds),
        None => Err(format!("Expiration is too large: {s}")),
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{days}d {hours}h")
        } else {
            format!("{days} day(s)")
        }
    } else if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{hours}h {mins}m")
        } else {
            format!("{hours} hour(s)")
        }
    } else if secs >= 60 {
        format!("{} minute(s)", secs / 60)
    } else {
        format!("{secs} second(s)")
    }
}

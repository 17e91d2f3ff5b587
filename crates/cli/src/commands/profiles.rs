//! profiles command - Show configured profiles
//!
//! Credentials are never printed; only where each profile points.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use stow_core::{BackendConfig, BackendKind, Profiles};

use crate::backend::Context;
use crate::commands::fail;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Show configured profiles
#[derive(Args, Debug)]
pub struct ProfilesArgs {
    /// Only print the location of the profiles file
    #[arg(long)]
    pub path: bool,
}

#[derive(Debug, Serialize)]
struct ProfilesOutput {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    profiles: Vec<ProfileInfo>,
}

#[derive(Debug, Serialize)]
struct ProfileInfo {
    name: String,
    #[serde(rename = "type")]
    kind: BackendKind,
    location: String,
    default: bool,
}

/// Execute the profiles command
pub fn execute(args: ProfilesArgs, ctx: &Context, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match run(&args, ctx, &formatter) {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&formatter, &e),
    }
}

fn run(args: &ProfilesArgs, ctx: &Context, formatter: &Formatter) -> Result<()> {
    let manager = ctx.manager()?;
    let path = manager.path().display().to_string();
    if args.path {
        if formatter.is_json() {
            formatter.json(&serde_json::json!({ "path": path }));
        } else {
            formatter.println(&path);
        }
        return Ok(());
    }

    let profiles = ctx.profiles()?;
    let infos = describe(&profiles);

    if formatter.is_json() {
        formatter.json(&ProfilesOutput {
            path,
            default: profiles.default_name().map(str::to_string),
            profiles: infos,
        });
        return Ok(());
    }

    if infos.is_empty() {
        formatter.warning(&format!("No profiles configured in {path}"));
        return Ok(());
    }

    let mut table = formatter.table(&["NAME", "TYPE", "LOCATION", "DEFAULT"]);
    for info in &infos {
        table.add_row(vec![
            formatter.style_name(&info.name),
            info.kind.to_string(),
            formatter.style_url(&info.location),
            if info.default { "*".into() } else { String::new() },
        ]);
    }
    formatter.println(&table.to_string());
    Ok(())
}

fn describe(profiles: &Profiles) -> Vec<ProfileInfo> {
    let default = profiles.default_name();
    profiles
        .profiles
        .iter()
        .map(|(name, config)| ProfileInfo {
            name: name.clone(),
            kind: config.kind(),
            location: location(config),
            default: default == Some(name.as_str()),
        })
        .collect()
}

/// Where a profile points, without credentials
fn location(config: &BackendConfig) -> String {
    match config {
        BackendConfig::Local(local) => local.root.display().to_string(),
        BackendConfig::S3(s3) => {
            let mut loc = format!("s3://{}", s3.bucket);
            let prefix = s3.prefix.trim_matches('/');
            if !prefix.is_empty() {
                loc.push('/');
                loc.push_str(prefix);
            }
            if let Some(endpoint) = &s3.endpoint {
                loc.push_str(&format!(" ({endpoint})"));
            }
            loc
        }
        BackendConfig::Sftp(sftp) => {
            format!("{}@{}:{}{}", sftp.username, sftp.host, sftp.port, sftp.root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_core::{LocalConfig, S3Config, SftpConfig};

    #[test]
    fn test_location_hides_credentials() {
        let mut s3 = S3Config::new("media");
        s3.prefix = "/exports/".into();
        s3.endpoint = Some("http://localhost:9000".into());
        s3.access_key = Some("AKIA".into());
        s3.secret_key = Some("hunter2".into());
        let loc = location(&BackendConfig::S3(s3));
        assert_eq!(loc, "s3://media/exports (http://localhost:9000)");
        assert!(!loc.contains("hunter2"));

        let mut sftp = SftpConfig::new("files.example.com", "deploy");
        sftp.root = "/srv/data".into();
        assert_eq!(
            location(&BackendConfig::Sftp(sftp)),
            "deploy@files.example.com:22/srv/data"
        );

        assert_eq!(
            location(&BackendConfig::Local(LocalConfig::new("/var/stow"))),
            "/var/stow"
        );
    }

    #[test]
    fn test_describe_marks_default() {
        let profiles = Profiles::parse(
            r#"
default = "b"

[profiles.a]
type = "local"
root = "/tmp/a"

[profiles.b]
type = "s3"
bucket = "photos"
"#,
        )
        .unwrap();
        let infos = describe(&profiles);
        assert_eq!(infos.len(), 2);
        assert!(!infos[0].default);
        assert!(infos[1].default);
        assert_eq!(infos[1].kind, BackendKind::S3);
    }
}

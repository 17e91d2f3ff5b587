//! Golden tests for verifying JSON output format stability
//!
//! Every test runs the `stow` binary against a throwaway profiles file with a
//! local profile and an S3 profile that is only used for offline URL signing,
//! so no network services are needed.
//!
//! Run with: `cargo test -p stow-cli --features golden`

#![cfg(feature = "golden")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Throwaway profiles file plus a data directory for the `scratch` profile
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir(dir.path().join("data")).unwrap();
        let profiles = format!(
            r#"default = "scratch"

[profiles.scratch]
type = "local"
root = {:?}

[profiles.media]
type = "s3"
bucket = "media"
prefix = "exports"
endpoint = "http://127.0.0.1:9000"
access_key = "stow-test"
secret_key = "stow-test-secret"
force_path_style = true
"#,
            dir.path().join("data")
        );
        std::fs::write(dir.path().join("profiles.toml"), profiles).unwrap();
        Self { dir }
    }

    fn data(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn seed(&self, rel: &str, content: &str) {
        let path = self.data().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn stow(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_stow"))
            .args(args)
            .arg("--config")
            .arg(self.dir.path().join("profiles.toml"))
            .env_remove("STOW_PROFILE")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute stow")
    }
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("stdout should be valid JSON")
}

fn stderr_json(output: &Output) -> serde_json::Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    serde_json::from_str(&stderr).expect("stderr should be valid JSON")
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().expect("stow exited without a code")
}

mod profiles_tests {
    use super::*;

    #[test]
    fn test_profiles_json() {
        let env = TestEnv::new();
        let output = env.stow(&["profiles", "--json"]);
        assert!(output.status.success(), "Command should succeed");

        let json = stdout_json(&output);
        insta::assert_json_snapshot!(json, {
            ".path" => "[path]",
            ".profiles[1].location" => "[root]",
        }, @r#"
        {
          "default": "scratch",
          "path": "[path]",
          "profiles": [
            {
              "default": false,
              "location": "s3://media/exports (http://127.0.0.1:9000)",
              "name": "media",
              "type": "s3"
            },
            {
              "default": true,
              "location": "[root]",
              "name": "scratch",
              "type": "local"
            }
          ]
        }
        "#);
        assert!(!String::from_utf8_lossy(&output.stdout).contains("stow-test-secret"));
    }

    #[test]
    fn test_unknown_profile_is_usage_error() {
        let env = TestEnv::new();
        let output = env.stow(&["list", "--json", "-p", "nowhere"]);
        assert_eq!(exit_code(&output), 2);
        assert_eq!(stderr_json(&output)["kind"], "config");
    }
}

mod file_tests {
    use super::*;

    #[test]
    fn test_list_json() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");
        env.seed("docs/b.txt", "nested");

        let output = env.stow(&["list", "--json"]);
        assert!(output.status.success(), "Command should succeed");

        let mut json = stdout_json(&output);
        json["entries"]
            .as_array_mut()
            .unwrap()
            .sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
        insta::assert_json_snapshot!(json, {
            ".entries[0].last_modified" => "[mtime]",
        }, @r#"
        {
          "count": 2,
          "entries": [
            {
              "is_dir": false,
              "last_modified": "[mtime]",
              "path": "a.txt",
              "size": 5
            },
            {
              "is_dir": true,
              "path": "docs/",
              "size": 0
            }
          ],
          "path": "",
          "profile": "scratch",
          "recursive": false
        }
        "#);
    }

    #[test]
    fn test_list_recursive_returns_files_only() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");
        env.seed("docs/deep/b.txt", "nested");

        let output = env.stow(&["ls", "-r", "--json"]);
        assert!(output.status.success());

        let json = stdout_json(&output);
        let mut paths: Vec<&str> = json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        paths.sort();
        assert_eq!(paths, ["a.txt", "docs/deep/b.txt"]);
    }

    #[test]
    fn test_list_missing_directory() {
        let env = TestEnv::new();
        let output = env.stow(&["list", "nope", "--json"]);
        assert_eq!(exit_code(&output), 5);
        assert_eq!(stderr_json(&output)["kind"], "not_found");
    }

    #[test]
    fn test_exists_json() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");

        let output = env.stow(&["exists", "a.txt", "--json"]);
        assert!(output.status.success());
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "exists": true,
          "path": "a.txt",
          "profile": "scratch"
        }
        "#);

        let output = env.stow(&["exists", "nope.txt", "--json"]);
        assert_eq!(exit_code(&output), 5);
        assert_eq!(stdout_json(&output)["exists"], false);
    }

    #[test]
    fn test_put_get_round_trip() {
        let env = TestEnv::new();
        let source = env.dir.path().join("upload.txt");
        std::fs::write(&source, "hello world").unwrap();

        let output = env.stow(&["put", source.to_str().unwrap(), "inbox/", "--json"]);
        assert!(output.status.success(), "put should succeed");
        insta::assert_json_snapshot!(stdout_json(&output), {
            ".source" => "[source]",
        }, @r#"
        {
          "path": "inbox/upload.txt",
          "profile": "scratch",
          "size_bytes": 11,
          "source": "[source]"
        }
        "#);

        let dest = env.dir.path().join("download.txt");
        let output = env.stow(&["get", "inbox/upload.txt", dest.to_str().unwrap(), "--json"]);
        assert!(output.status.success(), "get should succeed");
        insta::assert_json_snapshot!(stdout_json(&output), {
            ".dest" => "[dest]",
        }, @r#"
        {
          "bytes": 11,
          "dest": "[dest]",
          "path": "inbox/upload.txt",
          "profile": "scratch"
        }
        "#);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "hello world");
    }

    #[test]
    fn test_get_missing_leaves_no_file() {
        let env = TestEnv::new();
        let dest = env.dir.path().join("never.txt");
        let output = env.stow(&["get", "missing.txt", dest.to_str().unwrap(), "--json"]);
        assert_eq!(exit_code(&output), 5);
        assert!(!Path::new(&dest).exists());
    }

    #[test]
    fn test_copy_json() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");

        let output = env.stow(&["cp", "a.txt", "backup/a.txt", "--json"]);
        assert!(output.status.success(), "copy should succeed");
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "dest": "backup/a.txt",
          "from_profile": "scratch",
          "source": "a.txt",
          "to_profile": "scratch"
        }
        "#);
        assert_eq!(
            std::fs::read_to_string(env.data().join("backup/a.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_delete_is_idempotent() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");

        let output = env.stow(&["rm", "a.txt", "missing.txt", "--json"]);
        assert!(output.status.success(), "delete should succeed");
        insta::assert_json_snapshot!(stdout_json(&output), @r#"
        {
          "deleted": [
            "a.txt",
            "missing.txt"
          ],
          "profile": "scratch"
        }
        "#);
        assert!(!env.data().join("a.txt").exists());
    }

    #[test]
    fn test_traversal_is_rejected() {
        let env = TestEnv::new();
        let output = env.stow(&["exists", "../profiles.toml", "--json"]);
        assert_eq!(exit_code(&output), 2);
        assert_eq!(stderr_json(&output)["kind"], "invalid_path");
    }
}

mod link_tests {
    use super::*;

    #[test]
    fn test_link_unsupported_on_local() {
        let env = TestEnv::new();
        env.seed("a.txt", "hello");

        let output = env.stow(&["link", "a.txt", "--json"]);
        assert_eq!(exit_code(&output), 6);
        insta::assert_json_snapshot!(stderr_json(&output), @r#"
        {
          "error": "Unsupported operation: local backend 'scratch' cannot generate access URLs",
          "kind": "unsupported"
        }
        "#);
    }

    #[test]
    fn test_link_signs_missing_object() {
        let env = TestEnv::new();
        let output = env.stow(&["link", "-p", "media", "not-uploaded-yet.bin", "--json"]);
        assert!(output.status.success(), "signing should not need the object");

        let json = stdout_json(&output);
        let url = json["url"].as_str().unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/media/exports/not-uploaded-yet.bin?"));
        assert!(url.contains("X-Amz-Expires=604800"));
        insta::assert_json_snapshot!(json, {
            ".url" => "[url]",
            ".expires_at" => "[expires_at]",
        }, @r#"
        {
          "expires_at": "[expires_at]",
          "expires_in": "7 day(s)",
          "expires_secs": 604800,
          "method": "GET",
          "path": "not-uploaded-yet.bin",
          "url": "[url]"
        }
        "#);
    }

    #[test]
    fn test_link_upload_url() {
        let env = TestEnv::new();
        let output = env.stow(&[
            "link", "-p", "media", "inbox/new.csv", "--upload", "--expire", "1h", "--json",
        ]);
        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json["method"], "PUT");
        assert_eq!(json["expires_secs"], 3600);
        assert!(json["url"].as_str().unwrap().contains("X-Amz-Expires=3600"));
    }

    #[test]
    fn test_link_rejects_zero_expiry() {
        let env = TestEnv::new();
        let output = env.stow(&["link", "a.txt", "--expire", "0", "--json"]);
        assert_eq!(exit_code(&output), 2);
        assert_eq!(stderr_json(&output)["kind"], "config");
    }
}
